//! `git_tool`: a narrow subcommand surface over the `git` binary.
//! `commit` rejects history-rewriting flags outright, since a rewritten
//! commit can silently discard what a user thought they'd already recorded.

use crate::ToolError;
use std::path::Path;
use std::process::Command;

const REWRITE_FLAGS: &[&str] = &[
    "--amend",
    "--author=",
    "--date=",
    "--reset-author",
    "--allow-empty-message",
];

pub fn git_tool(cwd: &Path, subcommand: &str, args: &[String]) -> Result<String, ToolError> {
    match subcommand {
        "status" | "diff" | "log" | "branch" | "stash" => run_git(cwd, subcommand, args),
        "commit" => {
            if let Some(flag) = args.iter().find(|a| is_rewrite_flag(a)) {
                return Err(ToolError::Validation(format!(
                    "refusing to run git commit with '{flag}': history-rewriting flags are not allowed"
                )));
            }
            run_git(cwd, "commit", args)
        }
        other => Err(ToolError::Validation(format!(
            "unsupported git subcommand: {other}"
        ))),
    }
}

fn is_rewrite_flag(arg: &str) -> bool {
    REWRITE_FLAGS.iter().any(|flag| arg == *flag || arg.starts_with(flag))
}

fn run_git(cwd: &Path, subcommand: &str, args: &[String]) -> Result<String, ToolError> {
    let output = Command::new("git")
        .arg(subcommand)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| ToolError::Execution(e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        Err(ToolError::Execution(format!("{stdout}{stderr}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_amend() {
        let dir = tempfile::tempdir().unwrap();
        let err = git_tool(dir.path(), "commit", &["--amend".to_string()]).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn rejects_author_override() {
        let dir = tempfile::tempdir().unwrap();
        let err = git_tool(
            dir.path(),
            "commit",
            &["--author=Evil <evil@example.com>".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn unsupported_subcommand_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = git_tool(dir.path(), "push", &[]).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn status_runs_on_a_real_repo() {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git")
            .arg("init")
            .current_dir(dir.path())
            .output()
            .unwrap();
        let out = git_tool(dir.path(), "status", &[]).unwrap();
        assert!(!out.is_empty());
    }
}
