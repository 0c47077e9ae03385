//! Inference engine abstraction: a local backend (bundled tokenizer + LM),
//! a remote OpenAI-compatible backend, and a fallback wrapper that swaps
//! remote for local mid-turn on transport failure.

mod fallback;
mod local;
mod local_backend;
mod remote;

pub use fallback::FallbackEngine;
pub use local::{detect_context_window, LocalEngine};
pub use local_backend::{LocalGenBackend, MockLocalBackend};
#[cfg(feature = "local-ml")]
pub use local_backend::candle_backend;
pub use remote::RemoteEngine;

use natshell_core::{CancelToken, ChatMessage, FinishReason, LlmToolCall, ToolDefinition};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error talking to engine: {0}")]
    Transport(String),
    #[error("engine returned a fatal error: {0}")]
    Fatal(String),
    #[error("request was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: Option<String>,
    pub tool_calls: Vec<LlmToolCall>,
    pub finish_reason: FinishReason,
}

/// A backend capable of producing one assistant turn from a message
/// history, optionally constrained to a set of callable tools.
pub trait InferenceEngine: Send + Sync {
    fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, EngineError>;

    fn context_window(&self) -> u32;

    fn name(&self) -> &str;
}

/// Step-budget table keyed by context window size, generalized from the
/// teacher's flat `DEFAULT_MAX_TURNS=50` into a table that scales with how
/// much room the model actually has to reason in. Linearly interpolated
/// between table entries.
pub fn step_budget_for_context_window(window: u32) -> u32 {
    const TABLE: [(u32, u32); 5] = [
        (4096, 15),
        (8192, 25),
        (16384, 35),
        (32768, 50),
        (262144, 75),
    ];

    if window <= TABLE[0].0 {
        return TABLE[0].1;
    }
    if window >= TABLE[TABLE.len() - 1].0 {
        return TABLE[TABLE.len() - 1].1;
    }
    for pair in TABLE.windows(2) {
        let (lo_w, lo_v) = pair[0];
        let (hi_w, hi_v) = pair[1];
        if window >= lo_w && window <= hi_w {
            let span = (hi_w - lo_w) as f64;
            let frac = (window - lo_w) as f64 / span;
            return (lo_v as f64 + frac * (hi_v as f64 - lo_v as f64)).round() as u32;
        }
    }
    TABLE[TABLE.len() - 1].1
}
