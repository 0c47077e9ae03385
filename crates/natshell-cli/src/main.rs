//! NatShell entry point: flag parsing, engine selection, and the REPL.
//! Grounded on `deepseek_cli::Cli`'s clap-derive flag surface, narrowed to
//! NatShell's own flags, and on the teacher's print/chat split: `--headless`
//! takes the role the teacher's `--print` mode played.

use anyhow::{Context, Result};
use clap::Parser;
use natshell_agent::AgentLoop;
use natshell_core::{CancelToken, ChatMessage, Config, EnginePreference, Role, SafetyMode, SessionId, ToolCall};
use natshell_errors::{errors, ErrorHandler};
use natshell_llm::{FallbackEngine, InferenceEngine, LocalEngine, MockLocalBackend, RemoteEngine};
use natshell_policy::{classifier_from_config, Level, SafetyClassifier};
use natshell_store::{BackupStore, SessionRecord, SessionStore};
use natshell_tools::{tool_definitions, DefaultToolHost, FileReadTracker, SudoCache, ToolContext, ToolHost};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

mod repl;

const SYSTEM_PROMPT: &str = "You are NatShell, an interactive natural-language shell. \
Use the available tools to inspect and act on the user's system. The safety \
gate intercepts risky shell commands on its own; you do not need to ask \
permission yourself before calling a tool, but you should explain what \
you are about to do.";

#[derive(Parser)]
#[command(name = "natshell", about = "An interactive natural-language shell", long_about = None)]
struct Cli {
    /// Path to a local model file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// OpenAI-compatible remote endpoint URL.
    #[arg(long)]
    remote: Option<String>,

    /// Model name to request from the remote endpoint.
    #[arg(long = "remote-model")]
    remote_model: Option<String>,

    /// Download a model checkpoint by its hf-hub repo id, then exit.
    #[arg(long)]
    download: Option<String>,

    /// Override the configuration directory (defaults to the XDG config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging to stderr.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Run a single prompt non-interactively and exit.
    #[arg(long)]
    headless: Option<String>,

    /// Force safety mode to yolo for this process only. Does not touch the
    /// saved config.
    #[arg(long = "danger-fast")]
    danger_fast: bool,

    /// Reserved: MCP transport is not implemented in this crate.
    #[arg(long)]
    mcp: bool,
}

fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let handler = ErrorHandler::new(verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{}", handler.render(&errors::internal(err.to_string())));
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    if cli.mcp {
        eprintln!("note: --mcp is reserved; no MCP transport ships in this build");
    }

    let config_root = cli.config.clone().unwrap_or_else(natshell_core::config_dir);
    let mut cfg = Config::ensure(&config_root).context("loading configuration")?;

    if let Some(model) = &cli.model {
        cfg.model.path = Some(model.clone());
    }
    if let Some(url) = &cli.remote {
        cfg.remote.url = Some(url.clone());
    }
    if let Some(name) = &cli.remote_model {
        cfg.remote.model = Some(name.clone());
    }
    if let Ok(api_key) = std::env::var("NATSHELL_API_KEY") {
        cfg.remote.api_key = Some(api_key);
    }
    if cli.danger_fast {
        cfg.safety.mode = SafetyMode::Yolo;
    }

    if let Some(repo_id) = &cli.download {
        return download_model(repo_id);
    }

    let engine = build_engine(&cfg)?;
    let classifier = classifier_from_config(&cfg.safety).context("compiling safety patterns")?;

    let data_root = natshell_core::data_dir();
    let sessions = SessionStore::open(data_root.join("sessions")).context("opening session store")?;
    let backup_dir = cfg
        .backup
        .dir
        .clone()
        .unwrap_or_else(|| data_root.join("backups"));
    let backups =
        BackupStore::open(backup_dir, cfg.backup.max_per_file as usize).context("opening backup store")?;

    let tool_ctx = ToolContext {
        cwd: std::env::current_dir().context("reading current directory")?,
        sudo_cache: Arc::new(SudoCache::new()),
        read_tracker: Arc::new(FileReadTracker::new()),
        backups: Arc::new(backups),
        max_output_bytes: natshell_tools::DEFAULT_MAX_OUTPUT_BYTES,
    };
    let tool_host = DefaultToolHost;

    if let Some(prompt) = cli.headless {
        return run_headless(engine.as_ref(), &classifier, &tool_ctx, &tool_host, &prompt, &cfg);
    }

    repl::run(repl::ReplState {
        config_root,
        cfg,
        engine,
        classifier,
        sessions,
        tool_ctx,
        tool_host,
    })
}

fn build_engine(cfg: &Config) -> Result<Box<dyn InferenceEngine>> {
    let wants_remote = matches!(cfg.engine.preferred, EnginePreference::Remote)
        || (matches!(cfg.engine.preferred, EnginePreference::Auto) && cfg.remote.url.is_some());

    if !wants_remote {
        return Ok(Box::new(build_local_engine(cfg)));
    }

    let url = cfg
        .remote
        .url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("remote engine selected but no --remote url is configured"))?;
    let model = cfg.remote.model.clone().unwrap_or_else(|| "default".to_string());
    let api_key = cfg.remote.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        eprintln!("warning: no remote API key configured (set NATSHELL_API_KEY or run /keys)");
    }
    let remote = RemoteEngine::new(url, model, api_key, cfg.model.n_ctx.max(128_000));
    Ok(Box::new(FallbackEngine::new(
        Box::new(remote),
        Box::new(build_local_engine(cfg)),
    )))
}

/// No concrete transformer architecture is wired into this build (see
/// `natshell_llm::local_backend::candle_backend`'s `CausalModel` trait,
/// which has no implementer here), so the local engine degrades to a fixed
/// response until one is plugged in. Local-only sessions still exercise the
/// whole agent loop and safety gate against a real, if static, backend.
fn build_local_engine(cfg: &Config) -> LocalEngine {
    let notice = if cfg.model.path.is_some() {
        "local model configured but no transformer backend is compiled into this build"
    } else {
        "no local model configured; pass --model or --download one"
    };
    LocalEngine::new(Box::new(MockLocalBackend::new(notice, cfg.model.n_ctx)))
}

fn download_model(repo_id: &str) -> Result<i32> {
    #[cfg(feature = "local-ml")]
    {
        let path = natshell_llm::candle_backend::ensure_downloaded(repo_id)
            .context("downloading model checkpoint")?;
        println!("downloaded {repo_id} to {}", path.display());
        Ok(0)
    }
    #[cfg(not(feature = "local-ml"))]
    {
        eprintln!("cannot download {repo_id}: this build was compiled without the local-ml feature");
        Ok(1)
    }
}

static SIGINT_CANCEL: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_sigint(_signum: libc::c_int) {
    if let Some(token) = SIGINT_CANCEL.get() {
        token.cancel();
    }
}

/// Return the process-wide cancel token backing SIGINT, installing the
/// signal handler on first use. The token is shared (its internal flag is
/// an `Arc`) rather than replaced each turn, since `AgentLoop::run_turn`
/// resets it at the start of every turn it runs.
fn cancel_token_for_turn() -> CancelToken {
    let token = SIGINT_CANCEL.get_or_init(|| {
        #[cfg(unix)]
        unsafe {
            libc::signal(libc::SIGINT, on_sigint as usize as libc::sighandler_t);
        }
        CancelToken::new()
    });
    token.clone()
}

fn run_headless(
    engine: &dyn InferenceEngine,
    classifier: &SafetyClassifier,
    tool_ctx: &ToolContext,
    tool_host: &dyn ToolHost,
    prompt: &str,
    cfg: &Config,
) -> Result<i32> {
    let cancel = cancel_token_for_turn();
    let mut agent = AgentLoop::new(
        engine,
        tool_host,
        classifier,
        tool_ctx,
        tool_definitions(),
        SYSTEM_PROMPT.to_string(),
        cfg.agent.temperature,
        cfg.agent.max_tokens,
        cancel,
    );

    let result = agent.run_turn(
        prompt,
        |event| render_event(&event, false),
        |_call| false, // headless mode cannot prompt; decline anything needing confirmation
        || None,
    );

    Ok(match result.stop_reason {
        natshell_agent::StopReason::Finished => 0,
        _ => 1,
    })
}

/// Render one `AgentEvent` to stdout/stderr for both headless and REPL use.
pub(crate) fn render_event(event: &natshell_core::AgentEvent, interactive: bool) {
    use natshell_core::AgentEvent;
    match event {
        AgentEvent::Thinking => {
            if interactive {
                eprint!("\rthinking...");
                let _ = std::io::stderr().flush();
            }
        }
        AgentEvent::Executing(call) => {
            println!("$ {}", describe_call(call));
        }
        AgentEvent::ToolResult { success, output, .. } => {
            let marker = if *success { "ok" } else { "failed" };
            println!("[{marker}] {}", output.trim_end());
        }
        AgentEvent::ConfirmNeeded(call) => {
            println!("confirmation required: {}", describe_call(call));
        }
        AgentEvent::Blocked { call, reason } => {
            println!("blocked: {} ({reason})", describe_call(call));
        }
        AgentEvent::Response(text) => {
            println!("{text}");
        }
        AgentEvent::Error { kind, message } => {
            eprintln!("error [{kind}]: {message}");
        }
    }
}

fn describe_call(call: &ToolCall) -> String {
    format!("{}({})", call.name, call.arguments)
}

pub(crate) fn classify_level(classifier: &SafetyClassifier, call: &ToolCall) -> Level {
    if call.name != "execute_shell" {
        return Level::Safe;
    }
    let cmd = call.arguments.get("cmd").and_then(|v| v.as_str()).unwrap_or("");
    classifier.classify(cmd).level
}

pub(crate) fn render_history(messages: &[ChatMessage]) {
    for message in messages {
        let role = match message.role {
            Role::System => continue,
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        if let Some(content) = &message.content {
            println!("[{role}] {content}");
        }
        for call in &message.tool_calls {
            println!("[{role}] -> {}({})", call.name, call.arguments);
        }
    }
}

pub(crate) fn new_session_record(messages: Vec<ChatMessage>) -> SessionRecord {
    let mut record = SessionRecord::new();
    record.messages = messages;
    record
}

pub(crate) fn parse_session_id(raw: &str) -> Option<SessionId> {
    SessionId::parse(raw)
}
