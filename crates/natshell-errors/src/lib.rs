//! Error taxonomy and terminal-facing formatting, grounded on
//! `deepseek-errors`'s `EnhancedError`/`ErrorHandler` shape but restructured
//! around NatShell's own error kinds. Only [`ErrorKind::UserInput`],
//! [`ErrorKind::EngineFatal`], [`ErrorKind::SecurityRefused`], and
//! [`ErrorKind::Internal`] are meant to reach a user as a top-level error;
//! tool errors (`ToolExecution`, `ToolValidation`) are fed back into the
//! conversation as structured tool results instead, never surfaced here.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UserInput,
    SafetyBlocked,
    SafetyDeclined,
    ToolExecution,
    ToolValidation,
    EngineTransport,
    EngineFatal,
    SecurityRefused,
    Internal,
}

impl ErrorKind {
    /// Whether this kind is meant to ever reach the user as a top-level
    /// error rather than being folded back into a tool result.
    pub fn reaches_user(self) -> bool {
        matches!(
            self,
            ErrorKind::UserInput
                | ErrorKind::EngineFatal
                | ErrorKind::SecurityRefused
                | ErrorKind::Internal
        )
    }

    fn label(self) -> &'static str {
        match self {
            ErrorKind::UserInput => "Input error",
            ErrorKind::SafetyBlocked => "Blocked",
            ErrorKind::SafetyDeclined => "Declined",
            ErrorKind::ToolExecution => "Tool error",
            ErrorKind::ToolValidation => "Validation error",
            ErrorKind::EngineTransport => "Connection error",
            ErrorKind::EngineFatal => "Engine error",
            ErrorKind::SecurityRefused => "Refused",
            ErrorKind::Internal => "Internal error",
        }
    }
}

/// A structured error with a title, a message, and ranked suggestions for
/// what the user might try next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl EnhancedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            title: kind.label().to_string(),
            kind,
            message: redact(message.into()),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn format(&self, verbose: bool) -> String {
        let mut out = format!("{}: {}", self.title, self.message);
        if verbose {
            out.push_str(&format!("\n  kind: {:?}", self.kind));
        }
        for suggestion in &self.suggestions {
            out.push_str(&format!("\n  - {suggestion}"));
        }
        out
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

impl std::error::Error for EnhancedError {}

/// Strips anything that looks like a secret (API key, bearer token, sudo
/// password echoed in an error string) before it is ever stored in an
/// `EnhancedError` or logged. Conservative and cheap; not a substitute for
/// not putting secrets in error strings in the first place.
fn redact(message: String) -> String {
    let needle_markers = ["api_key=", "Bearer ", "password=", "token="];
    let mut out = message;
    for marker in needle_markers {
        if let Some(start) = out.find(marker) {
            let value_start = start + marker.len();
            let end = out[value_start..]
                .find(|c: char| c.is_whitespace())
                .map(|i| value_start + i)
                .unwrap_or(out.len());
            out.replace_range(value_start..end, "[redacted]");
        }
    }
    out
}

pub struct ErrorHandler {
    pub verbose: bool,
}

impl ErrorHandler {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn render(&self, error: &EnhancedError) -> String {
        error.format(self.verbose)
    }

    /// Exit code for headless mode: any user-surfaced error is exit code 1.
    pub fn exit_code(&self, error: &EnhancedError) -> i32 {
        if error.kind.reaches_user() { 1 } else { 0 }
    }
}

pub mod errors {
    use super::{EnhancedError, ErrorKind};

    pub fn missing_api_key() -> EnhancedError {
        EnhancedError::new(
            ErrorKind::UserInput,
            "no remote API key configured".to_string(),
        )
        .with_suggestion("set NATSHELL_API_KEY or run /keys")
        .with_suggestion("or run with --model to use a local model instead")
    }

    pub fn engine_transport(detail: impl Into<String>) -> EnhancedError {
        EnhancedError::new(ErrorKind::EngineTransport, detail.into())
    }

    pub fn engine_fatal(detail: impl Into<String>) -> EnhancedError {
        EnhancedError::new(ErrorKind::EngineFatal, detail.into())
            .with_suggestion("check --model / --remote configuration")
    }

    pub fn security_refused(detail: impl Into<String>) -> EnhancedError {
        EnhancedError::new(ErrorKind::SecurityRefused, detail.into())
    }

    pub fn safety_blocked(reason: impl Into<String>) -> EnhancedError {
        EnhancedError::new(ErrorKind::SafetyBlocked, reason.into())
    }

    pub fn internal(detail: impl Into<String>) -> EnhancedError {
        EnhancedError::new(ErrorKind::Internal, detail.into())
    }
}
