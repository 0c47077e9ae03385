//! Interactive read-eval-print loop: slash commands plus the ordinary
//! agent turn. Grounded on `deepseek_cli`'s chat REPL loop, narrowed to
//! NatShell's own command set and rebuilding the agent loop fresh each
//! turn so `/model switch` and friends can swap the engine without
//! fighting the borrow checker over a long-lived `AgentLoop`.

use crate::{cancel_token_for_turn, classify_level, new_session_record, parse_session_id, render_event, render_history, SYSTEM_PROMPT};
use anyhow::Result;
use natshell_agent::{compact, AgentLoop, StopReason};
use natshell_core::{ChatMessage, Config, Role};
use natshell_llm::InferenceEngine;
use natshell_policy::SafetyClassifier;
use natshell_store::SessionStore;
use natshell_tools::{tool_definitions, ToolContext, ToolHost};
use std::io::{self, Write};

pub struct ReplState {
    pub config_root: std::path::PathBuf,
    pub cfg: Config,
    pub engine: Box<dyn InferenceEngine>,
    pub classifier: SafetyClassifier,
    pub sessions: SessionStore,
    pub tool_ctx: ToolContext,
    pub tool_host: natshell_tools::DefaultToolHost,
}

pub fn run(mut state: ReplState) -> Result<i32> {
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut pending_plan: Option<String> = None;
    let stdin = io::stdin();

    println!("NatShell -- type /help for commands, Ctrl-C to cancel a turn");

    loop {
        print!("> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF (piped input or Ctrl-D)
        }
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            if handle_slash_command(rest, &mut state, &mut history, &mut pending_plan)? {
                break;
            }
            continue;
        }

        run_turn(&mut state, &mut history, line);
    }

    Ok(0)
}

/// Returns `Ok(true)` if the REPL should exit.
fn handle_slash_command(
    rest: &str,
    state: &mut ReplState,
    history: &mut Vec<ChatMessage>,
    pending_plan: &mut Option<String>,
) -> Result<bool> {
    let mut parts = rest.splitn(2, ' ');
    let cmd = parts.next().unwrap_or("");
    let arg = parts.next().unwrap_or("").trim();

    match cmd {
        "exit" | "quit" => return Ok(true),

        "help" => {
            println!(
                "commands: /help /clear /cmd <command> /model [list|use <path>|switch|local|default] \
/compact /plan <text> /exeplan run /undo <path> /save [name] /load <id> /sessions /keys /history /exit"
            );
        }

        "clear" => {
            history.clear();
            *pending_plan = None;
            println!("history cleared");
        }

        "cmd" => {
            if arg.is_empty() {
                println!("usage: /cmd <shell command>");
            } else {
                run_raw_command(state, arg);
            }
        }

        "model" => handle_model_command(arg, state),

        "compact" => {
            let mut full = vec![ChatMessage::system(SYSTEM_PROMPT.to_string())];
            full.extend(history.iter().cloned());
            let cancel = natshell_core::CancelToken::new();
            match compact(&full, state.engine.as_ref(), state.engine.context_window(), &cancel) {
                Ok(compacted) => {
                    *history = compacted.into_iter().filter(|m| m.role != Role::System).collect();
                    println!("history compacted to {} messages", history.len());
                }
                Err(err) => println!("compaction failed: {err}"),
            }
        }

        "plan" => {
            if arg.is_empty() {
                println!("usage: /plan <what you want to accomplish>");
            } else {
                *pending_plan = Some(run_plan_turn(state, history, arg));
            }
        }

        "exeplan" => {
            if arg == "run" {
                match pending_plan.take() {
                    Some(plan) => run_turn(state, history, &plan),
                    None => println!("no pending plan; run /plan <text> first"),
                }
            } else {
                println!("usage: /exeplan run");
            }
        }

        "undo" => {
            if arg.is_empty() {
                println!("usage: /undo <path>");
            } else {
                let path = state.tool_ctx.cwd.join(arg);
                match state.tool_ctx.backups.undo(&path) {
                    Ok(diff) => println!("{diff}"),
                    Err(err) => println!("undo failed: {err}"),
                }
            }
        }

        "save" => {
            let mut record = new_session_record(history.clone());
            if !arg.is_empty() {
                record.messages.insert(0, ChatMessage::system(format!("[named session: {arg}]")));
            }
            match state.sessions.save(&record) {
                Ok(()) => println!("saved session {}", record.id),
                Err(err) => println!("save failed: {err}"),
            }
        }

        "load" => {
            if arg.is_empty() {
                println!("usage: /load <session-id>");
            } else if parse_session_id(arg).is_none() {
                println!("not a valid session id");
            } else {
                match state.sessions.load(arg) {
                    Ok(record) => {
                        *history = record.messages;
                        println!("loaded session {} ({} messages)", record.id, history.len());
                    }
                    Err(err) => println!("load failed: {err}"),
                }
            }
        }

        "sessions" => match state.sessions.list() {
            Ok(ids) => {
                for id in ids {
                    println!("{id}");
                }
            }
            Err(err) => println!("could not list sessions: {err}"),
        },

        "keys" => handle_keys_command(arg, state),

        "history" => render_history(history),

        other => println!("unknown command: /{other} (try /help)"),
    }

    Ok(false)
}

fn handle_model_command(arg: &str, state: &mut ReplState) {
    match arg {
        "" | "list" => {
            println!("active engine: {}", state.engine.name());
            println!("local model path: {:?}", state.cfg.model.path);
            println!("remote url: {:?}", state.cfg.remote.url);
        }
        "local" | "default" => {
            state.cfg.engine.preferred = natshell_core::EnginePreference::Local;
            state.engine = Box::new(crate::build_local_engine(&state.cfg));
            println!("switched to local engine");
        }
        "switch" => {
            state.cfg.engine.preferred = match state.cfg.engine.preferred {
                natshell_core::EnginePreference::Remote => natshell_core::EnginePreference::Local,
                _ => natshell_core::EnginePreference::Remote,
            };
            match crate::build_engine(&state.cfg) {
                Ok(engine) => {
                    state.engine = engine;
                    println!("switched to {}", state.engine.name());
                }
                Err(err) => println!("switch failed: {err}"),
            }
        }
        other if other.starts_with("use ") => {
            let path = other.trim_start_matches("use ").trim();
            state.cfg.model.path = Some(std::path::PathBuf::from(path));
            state.cfg.engine.preferred = natshell_core::EnginePreference::Local;
            state.engine = Box::new(crate::build_local_engine(&state.cfg));
            println!("local model path set to {path}");
        }
        _ => println!("usage: /model [list|use <path>|switch|local|default]"),
    }
}

fn handle_keys_command(arg: &str, state: &mut ReplState) {
    if arg.is_empty() {
        let configured = if state.cfg.remote.api_key.is_some() { "set" } else { "unset" };
        println!("remote API key: {configured} (use /keys set <key> to persist one)");
        return;
    }
    let mut parts = arg.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some("set"), Some(key)) if !key.trim().is_empty() => {
            state.cfg.remote.api_key = Some(key.trim().to_string());
            match state.cfg.save(&state.config_root) {
                Ok(()) => println!("API key saved to config"),
                Err(err) => println!("could not save config: {err}"),
            }
        }
        (Some("clear"), _) => {
            state.cfg.remote.api_key = None;
            match state.cfg.save(&state.config_root) {
                Ok(()) => println!("API key cleared"),
                Err(err) => println!("could not save config: {err}"),
            }
        }
        _ => println!("usage: /keys [set <key>|clear]"),
    }
}

fn run_raw_command(state: &ReplState, cmd: &str) {
    let call = natshell_core::ToolCall {
        id: "cmd".to_string(),
        name: "execute_shell".to_string(),
        arguments: serde_json::json!({ "cmd": cmd }),
    };
    let level = classify_level(&state.classifier, &call);
    if level == natshell_policy::Level::Blocked {
        println!("blocked by safety policy");
        return;
    }
    if level == natshell_policy::Level::Confirm && !confirm_prompt(cmd) {
        println!("declined");
        return;
    }
    let cancel = natshell_core::CancelToken::new();
    let outcome = state.tool_host.execute(&call, &state.tool_ctx, &cancel);
    println!("{}", outcome.output);
}

fn confirm_prompt(what: &str) -> bool {
    print!("confirm `{what}`? [y/N] ");
    io::stdout().flush().ok();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Ask the active engine to describe a plan without calling tools, so
/// `/exeplan run` has something concrete to resubmit as a normal turn.
fn run_plan_turn(state: &ReplState, history: &[ChatMessage], goal: &str) -> String {
    let cancel = natshell_core::CancelToken::new();
    let mut messages = vec![ChatMessage::system(
        "Describe a short, numbered plan to accomplish the user's goal. Do not call any tools; \
just describe the steps in plain text.",
    )];
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(goal));

    match state
        .engine
        .chat_completion(&messages, None, state.cfg.agent.temperature, state.cfg.agent.max_tokens, &cancel)
    {
        Ok(completion) => {
            let text = completion.text.unwrap_or_else(|| goal.to_string());
            println!("{text}");
            text
        }
        Err(err) => {
            println!("could not draft a plan: {err}");
            goal.to_string()
        }
    }
}

fn run_turn(state: &mut ReplState, history: &mut Vec<ChatMessage>, input: &str) {
    let cancel = cancel_token_for_turn();
    let mut agent = AgentLoop::new(
        state.engine.as_ref(),
        &state.tool_host,
        &state.classifier,
        &state.tool_ctx,
        tool_definitions(),
        SYSTEM_PROMPT.to_string(),
        state.cfg.agent.temperature,
        state.cfg.agent.max_tokens,
        cancel,
    )
    .with_history(history.clone());

    let result = agent.run_turn(
        input,
        |event| render_event(&event, true),
        |call| confirm_prompt(&format!("{}({})", call.name, call.arguments)),
        prompt_for_sudo_password,
    );

    *history = agent.messages.into_iter().filter(|m| m.role != Role::System).collect();

    if let StopReason::Error(message) = result.stop_reason {
        eprintln!("turn ended with an error: {message}");
    }
}

fn prompt_for_sudo_password() -> Option<String> {
    rpassword::prompt_password("sudo password: ").ok()
}
