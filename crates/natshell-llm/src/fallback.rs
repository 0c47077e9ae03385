//! Wraps a preferred engine and a local fallback: if the preferred engine
//! fails after its own retries, the fallback swaps in the local engine for
//! the rest of the current user turn and logs the substitution once. The
//! next user turn re-attempts the preferred engine.

use crate::{CompletionResult, EngineError, InferenceEngine};
use natshell_core::{CancelToken, ChatMessage, ToolDefinition};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct FallbackEngine {
    preferred: Box<dyn InferenceEngine>,
    local: Box<dyn InferenceEngine>,
    substituted_this_turn: AtomicBool,
}

impl FallbackEngine {
    pub fn new(preferred: Box<dyn InferenceEngine>, local: Box<dyn InferenceEngine>) -> Self {
        Self {
            preferred,
            local,
            substituted_this_turn: AtomicBool::new(false),
        }
    }

    /// Call at the start of each new user turn so the preferred engine is
    /// retried rather than staying pinned to the fallback indefinitely.
    pub fn start_new_turn(&self) {
        self.substituted_this_turn.store(false, Ordering::SeqCst);
    }

    pub fn did_substitute_this_turn(&self) -> bool {
        self.substituted_this_turn.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for FallbackEngine {
    fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, EngineError> {
        if self.substituted_this_turn.load(Ordering::SeqCst) {
            return self
                .local
                .chat_completion(messages, tools, temperature, max_tokens, cancel);
        }

        match self
            .preferred
            .chat_completion(messages, tools, temperature, max_tokens, cancel)
        {
            Ok(result) => Ok(result),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(err) => {
                eprintln!(
                    "warning: {} engine failed ({err}); falling back to local for the rest of this turn",
                    self.preferred.name()
                );
                self.substituted_this_turn.store(true, Ordering::SeqCst);
                self.local
                    .chat_completion(messages, tools, temperature, max_tokens, cancel)
            }
        }
    }

    fn context_window(&self) -> u32 {
        if self.substituted_this_turn.load(Ordering::SeqCst) {
            self.local.context_window()
        } else {
            self.preferred.context_window()
        }
    }

    fn name(&self) -> &str {
        if self.substituted_this_turn.load(Ordering::SeqCst) {
            "local (fallback)"
        } else {
            self.preferred.name()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natshell_core::FinishReason;

    struct AlwaysFails;
    impl InferenceEngine for AlwaysFails {
        fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _temperature: f32,
            _max_tokens: u32,
            _cancel: &CancelToken,
        ) -> Result<CompletionResult, EngineError> {
            Err(EngineError::Transport("connection refused".to_string()))
        }
        fn context_window(&self) -> u32 {
            128000
        }
        fn name(&self) -> &str {
            "remote"
        }
    }

    struct AlwaysSucceeds;
    impl InferenceEngine for AlwaysSucceeds {
        fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _temperature: f32,
            _max_tokens: u32,
            _cancel: &CancelToken,
        ) -> Result<CompletionResult, EngineError> {
            Ok(CompletionResult {
                text: Some("ok".to_string()),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
            })
        }
        fn context_window(&self) -> u32 {
            4096
        }
        fn name(&self) -> &str {
            "local"
        }
    }

    #[test]
    fn falls_back_to_local_on_remote_failure() {
        let engine = FallbackEngine::new(Box::new(AlwaysFails), Box::new(AlwaysSucceeds));
        let cancel = CancelToken::new();
        let result = engine
            .chat_completion(&[], None, 0.2, 100, &cancel)
            .unwrap();
        assert_eq!(result.text.as_deref(), Some("ok"));
        assert!(engine.did_substitute_this_turn());
    }

    #[test]
    fn stays_on_local_for_rest_of_turn_after_substitution() {
        let engine = FallbackEngine::new(Box::new(AlwaysFails), Box::new(AlwaysSucceeds));
        let cancel = CancelToken::new();
        engine.chat_completion(&[], None, 0.2, 100, &cancel).unwrap();
        assert_eq!(engine.name(), "local (fallback)");
    }

    #[test]
    fn new_turn_retries_preferred_engine() {
        let engine = FallbackEngine::new(Box::new(AlwaysFails), Box::new(AlwaysSucceeds));
        let cancel = CancelToken::new();
        engine.chat_completion(&[], None, 0.2, 100, &cancel).unwrap();
        engine.start_new_turn();
        assert_eq!(engine.name(), "remote");
    }
}
