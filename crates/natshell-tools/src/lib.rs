//! The eight tools an agent turn can call, plus the `natshell_help`
//! pseudo-tool, dispatched through a [`ToolHost`]. Grounded on
//! `deepseek_tools::LocalToolHost`/`ToolHost`, narrowed to NatShell's fixed
//! tool set rather than the teacher's plugin-extensible registry.

mod browse;
mod fs_ops;
mod git_tool;
mod output;
mod run_code;
mod shell;

pub use browse::{list_directory, search_files, DirEntryInfo, SearchMatch};
pub use fs_ops::{edit_file, read_file, write_file, FileReadTracker};
pub use git_tool::git_tool;
pub use output::{truncate_tool_output, DEFAULT_MAX_OUTPUT_BYTES, MAX_OUTPUT_BYTES_CEILING};
pub use run_code::{run_code, Language, RunOutcome};
pub use shell::{filtered_env, is_sudo_command, looks_long_running, timeout_for, SudoCache, DEFAULT_TIMEOUT};

use natshell_core::{CancelToken, ToolCall, ToolDefinition};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Execution(String),
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Per-call context: working directory, shared sudo cache, and the
/// read-tracker `edit_file` consults. One `ToolContext` lives for the
/// whole session so the tracker and sudo cache persist across turns.
pub struct ToolContext {
    pub cwd: PathBuf,
    pub sudo_cache: Arc<SudoCache>,
    pub read_tracker: Arc<FileReadTracker>,
    pub backups: Arc<natshell_store::BackupStore>,
    pub max_output_bytes: usize,
}

pub trait ToolHost {
    fn execute(&self, call: &ToolCall, ctx: &ToolContext, cancel: &CancelToken) -> ToolOutcome;
}

pub struct DefaultToolHost;

impl ToolHost for DefaultToolHost {
    fn execute(&self, call: &ToolCall, ctx: &ToolContext, cancel: &CancelToken) -> ToolOutcome {
        let result = dispatch(call, ctx, cancel);
        match result {
            Ok(outcome) => ToolOutcome {
                success: outcome.success,
                output: truncate_tool_output(&outcome.output, ctx.max_output_bytes),
            },
            Err(err) => ToolOutcome::failure(truncate_tool_output(&err.to_string(), ctx.max_output_bytes)),
        }
    }
}

fn dispatch(call: &ToolCall, ctx: &ToolContext, cancel: &CancelToken) -> Result<ToolOutcome, ToolError> {
    let args = &call.arguments;
    match call.name.as_str() {
        "execute_shell" => {
            let cmd = require_str(args, "cmd")?;
            let timeout = shell::timeout_for(cmd);
            let sudo_password = ctx.sudo_cache.get();
            let outcome = shell::run(cmd, &ctx.cwd, timeout, cancel, sudo_password.as_deref())
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            if outcome.needs_sudo_password {
                return Ok(ToolOutcome {
                    success: false,
                    output: "AWAIT_SUDO: this command needs a sudo password".to_string(),
                });
            }
            let rendered = format!(
                "exit={:?} timed_out={} cancelled={}\nstdout:\n{}\nstderr:\n{}",
                outcome.exit_code, outcome.timed_out, outcome.cancelled, outcome.stdout, outcome.stderr
            );
            Ok(ToolOutcome {
                success: outcome.exit_code == Some(0) && !outcome.timed_out && !outcome.cancelled,
                output: rendered,
            })
        }
        "read_file" => {
            let path = require_path(args, &ctx.cwd)?;
            let max_lines = args.get("max_lines").and_then(|v| v.as_u64()).map(|n| n as usize);
            read_file(&path, max_lines, &ctx.read_tracker)
        }
        "write_file" => {
            let path = require_path(args, &ctx.cwd)?;
            let content = require_str(args, "content")?;
            let append = args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);
            write_file(&path, content, append, &ctx.backups)
        }
        "edit_file" => {
            let path = require_path(args, &ctx.cwd)?;
            let search = require_str(args, "search")?;
            let replace = args.get("replace").and_then(|v| v.as_str()).unwrap_or("");
            edit_file(&path, search, replace, &ctx.read_tracker, &ctx.backups)
        }
        "run_code" => {
            let language = require_str(args, "language")?;
            let source = require_str(args, "source")?;
            let outcome = run_code(language, source)?;
            Ok(ToolOutcome {
                success: outcome.exit_code == Some(0) && !outcome.timed_out,
                output: format!(
                    "exit={:?} timed_out={}\nstdout:\n{}\nstderr:\n{}",
                    outcome.exit_code, outcome.timed_out, outcome.stdout, outcome.stderr
                ),
            })
        }
        "list_directory" => {
            let path = args
                .get("path")
                .and_then(|v| v.as_str())
                .map(|p| ctx.cwd.join(p))
                .unwrap_or_else(|| ctx.cwd.clone());
            let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(false);
            let entries = list_directory(&path, recursive)?;
            let rendered = entries
                .into_iter()
                .map(|e| format!("{}{}", e.path, if e.is_dir { "/" } else { "" }))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(ToolOutcome::success(rendered))
        }
        "search_files" => {
            let content = args.get("content").and_then(|v| v.as_str());
            let name = args.get("name").and_then(|v| v.as_str());
            let matches = search_files(&ctx.cwd, content, name)?;
            let rendered = matches
                .into_iter()
                .map(|m| match (m.line_number, m.line) {
                    (Some(n), Some(line)) => format!("{}:{}: {}", m.path, n, line),
                    _ => m.path,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(ToolOutcome::success(rendered))
        }
        "git_tool" => {
            let subcommand = require_str(args, "subcommand")?;
            let extra: Vec<String> = args
                .get("args")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            let output = git_tool(&ctx.cwd, subcommand, &extra)?;
            Ok(ToolOutcome::success(output))
        }
        "natshell_help" => Ok(ToolOutcome::success(HELP_TEXT)),
        other => Err(ToolError::Validation(format!("unknown tool: {other}"))),
    }
}

fn require_str<'a>(args: &'a serde_json::Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::Validation(format!("'{field}' is required")))
}

fn require_path(args: &serde_json::Value, cwd: &std::path::Path) -> Result<PathBuf, ToolError> {
    let raw = args
        .get("path")
        .or_else(|| args.get("file_path"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::Validation("'path' is required".to_string()))?;
    Ok(cwd.join(raw))
}

const HELP_TEXT: &str = "\
NatShell tools:
  execute_shell   run a shell command through bash -c
  read_file       read a file, tracking its hash for edit_file
  write_file      overwrite or append to a file (backs up first)
  edit_file       replace one exact match of text in a previously-read file
  run_code        run a snippet in python/javascript/bash/ruby/perl/php/c/cpp/rust/go
  list_directory  list a directory, optionally recursive and gitignore-aware
  search_files    search file contents by regex or filenames by glob
  git_tool        git status/diff/log/branch/commit/stash (commit rejects history-rewriting flags)

Slash commands: /help /clear /cmd /model /compact /plan /exeplan /undo /save /load /sessions /keys /history";

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "execute_shell".to_string(),
            description: "Run a shell command through bash -c.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"cmd": {"type": "string"}},
                "required": ["cmd"]
            }),
        },
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file's contents.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "max_lines": {"type": "integer"}
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Overwrite or append to a file.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "append": {"type": "boolean"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "edit_file".to_string(),
            description: "Replace one exact occurrence of text in a previously-read file.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "search": {"type": "string"},
                    "replace": {"type": "string"}
                },
                "required": ["path", "search", "replace"]
            }),
        },
        ToolDefinition {
            name: "run_code".to_string(),
            description: "Run a code snippet in an isolated temporary directory.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "language": {"type": "string"},
                    "source": {"type": "string"}
                },
                "required": ["language", "source"]
            }),
        },
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List the contents of a directory.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "recursive": {"type": "boolean"}
                }
            }),
        },
        ToolDefinition {
            name: "search_files".to_string(),
            description: "Search file contents by regex or filenames by glob.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string"},
                    "name": {"type": "string"}
                }
            }),
        },
        ToolDefinition {
            name: "git_tool".to_string(),
            description: "Run a narrow set of git subcommands.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "subcommand": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["subcommand"]
            }),
        },
        ToolDefinition {
            name: "natshell_help".to_string(),
            description: "Describe available tools and slash commands.".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx(cwd: PathBuf) -> ToolContext {
        let backup_dir = tempfile::tempdir().unwrap();
        ToolContext {
            cwd,
            sudo_cache: Arc::new(SudoCache::new()),
            read_tracker: Arc::new(FileReadTracker::new()),
            backups: Arc::new(natshell_store::BackupStore::open(backup_dir.into_path(), 10).unwrap()),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    #[test]
    fn dispatches_execute_shell() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let cancel = CancelToken::new();
        let call = ToolCall {
            id: "1".to_string(),
            name: "execute_shell".to_string(),
            arguments: serde_json::json!({"cmd": "echo hi"}),
        };
        let outcome = host.execute(&call, &ctx, &cancel);
        assert!(outcome.success);
        assert!(outcome.output.contains("hi"));
    }

    #[test]
    fn unknown_tool_reports_failure_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let cancel = CancelToken::new();
        let call = ToolCall {
            id: "1".to_string(),
            name: "not_a_real_tool".to_string(),
            arguments: serde_json::json!({}),
        };
        let outcome = host.execute(&call, &ctx, &cancel);
        assert!(!outcome.success);
    }

    #[test]
    fn natshell_help_lists_tools() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let cancel = CancelToken::new();
        let call = ToolCall {
            id: "1".to_string(),
            name: "natshell_help".to_string(),
            arguments: serde_json::json!({}),
        };
        let outcome = host.execute(&call, &ctx, &cancel);
        assert!(outcome.success);
        assert!(outcome.output.contains("execute_shell"));
    }

    #[test]
    fn tool_definitions_cover_all_eight_tools_plus_help() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 9);
    }
}
