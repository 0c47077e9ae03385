//! The ReAct agent loop: `IDLE → REASONING → GATE → {AWAIT_CONFIRM, EXECUTE}
//! → REASONING | terminate`, with an `AWAIT_SUDO` replay-once branch off
//! `EXECUTE` and a cancel transition from any state back to `IDLE`.
//! Grounded on `deepseek_agent::tool_loop::ToolUseLoop`, narrowed from its
//! Architect/Editor/Apply/Verify pipeline to a single reason/act/observe
//! cycle, and from its flat `DEFAULT_MAX_TURNS` to
//! [`natshell_llm::step_budget_for_context_window`].

use crate::context;
use natshell_core::{AgentEvent, CancelToken, ChatMessage, ToolCall, ToolDefinition};
use natshell_llm::{step_budget_for_context_window, InferenceEngine};
use natshell_policy::{Level, SafetyClassifier};
use natshell_tools::{is_sudo_command, ToolContext, ToolHost};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Finished,
    StepBudgetExceeded,
    Cancelled,
    Error(String),
}

pub struct TurnResult {
    pub stop_reason: StopReason,
}

pub struct AgentLoop<'a> {
    engine: &'a dyn InferenceEngine,
    tool_host: &'a dyn ToolHost,
    classifier: &'a SafetyClassifier,
    tool_ctx: &'a ToolContext,
    tools: Vec<ToolDefinition>,
    pub messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    cancel: CancelToken,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        engine: &'a dyn InferenceEngine,
        tool_host: &'a dyn ToolHost,
        classifier: &'a SafetyClassifier,
        tool_ctx: &'a ToolContext,
        tools: Vec<ToolDefinition>,
        system_prompt: String,
        temperature: f32,
        max_tokens: u32,
        cancel: CancelToken,
    ) -> Self {
        Self {
            engine,
            tool_host,
            classifier,
            tool_ctx,
            tools,
            messages: vec![ChatMessage::system(system_prompt)],
            temperature,
            max_tokens,
            cancel,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.messages.extend(history);
        self
    }

    /// Run one full user turn: IDLE → REASONING, looping through GATE/EXECUTE
    /// until the model stops requesting tools, the step budget is exhausted,
    /// or the turn is cancelled.
    pub fn run_turn(
        &mut self,
        user_input: &str,
        mut on_event: impl FnMut(AgentEvent),
        mut confirm: impl FnMut(&ToolCall) -> bool,
        mut sudo_password: impl FnMut() -> Option<String>,
    ) -> TurnResult {
        self.cancel.reset();
        self.messages.push(ChatMessage::user(user_input));

        let max_steps = step_budget_for_context_window(self.engine.context_window());
        let mut steps = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                self.messages.push(ChatMessage::assistant(
                    "[cancelled by user; any pending tool calls in this batch were abandoned]",
                ));
                return TurnResult {
                    stop_reason: StopReason::Cancelled,
                };
            }

            if steps >= max_steps {
                self.messages.push(ChatMessage::assistant(
                    "[step budget exceeded for this turn; stopping before taking further action]",
                ));
                on_event(AgentEvent::Response(
                    "Step budget exceeded for this turn.".to_string(),
                ));
                return TurnResult {
                    stop_reason: StopReason::StepBudgetExceeded,
                };
            }
            steps += 1;

            if context::needs_compaction(&self.messages, self.max_tokens, self.engine.context_window()) {
                if let Ok(compacted) = context::compact(
                    &self.messages,
                    self.engine,
                    self.engine.context_window(),
                    &self.cancel,
                ) {
                    self.messages = compacted;
                }
            }

            on_event(AgentEvent::Thinking);
            let completion = self.engine.chat_completion(
                &self.messages,
                Some(&self.tools),
                self.temperature,
                self.max_tokens,
                &self.cancel,
            );

            let completion = match completion {
                Ok(c) => c,
                Err(natshell_llm::EngineError::Cancelled) => {
                    self.messages.push(ChatMessage::assistant(
                        "[cancelled by user; any pending tool calls in this batch were abandoned]",
                    ));
                    return TurnResult {
                        stop_reason: StopReason::Cancelled,
                    };
                }
                Err(err) => {
                    on_event(AgentEvent::Error {
                        kind: "engine_fatal".to_string(),
                        message: err.to_string(),
                    });
                    return TurnResult {
                        stop_reason: StopReason::Error(err.to_string()),
                    };
                }
            };

            if completion.tool_calls.is_empty() {
                let text = completion.text.unwrap_or_default();
                self.messages.push(ChatMessage::assistant(text.clone()));
                on_event(AgentEvent::Response(text));
                return TurnResult {
                    stop_reason: StopReason::Finished,
                };
            }

            self.messages
                .push(ChatMessage::assistant_tool_calls(completion.tool_calls.clone()));

            for llm_call in &completion.tool_calls {
                if self.cancel.is_cancelled() {
                    self.messages.push(ChatMessage::tool_result(
                        llm_call.id.clone(),
                        "[cancelled by user before this call ran]",
                    ));
                    continue;
                }

                let call: ToolCall = llm_call.clone().into();
                let verdict = self.classify(&call);

                match verdict {
                    Level::Blocked => {
                        on_event(AgentEvent::Blocked {
                            call: call.clone(),
                            reason: "blocked by safety policy".to_string(),
                        });
                        self.messages.push(ChatMessage::tool_result(
                            call.id.clone(),
                            "blocked by safety policy; this command was not run",
                        ));
                    }
                    Level::Confirm => {
                        on_event(AgentEvent::ConfirmNeeded(call.clone()));
                        if confirm(&call) {
                            self.execute_with_sudo(&call, &mut on_event, &mut sudo_password);
                        } else {
                            self.messages.push(ChatMessage::tool_result(
                                call.id.clone(),
                                "declined by user; this command was not run",
                            ));
                        }
                    }
                    Level::Safe => {
                        self.execute_with_sudo(&call, &mut on_event, &mut sudo_password);
                    }
                }
            }
        }
    }

    fn classify(&self, call: &ToolCall) -> Level {
        if call.name != "execute_shell" {
            return Level::Safe;
        }
        let cmd = call
            .arguments
            .get("cmd")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        self.classifier.classify(cmd).level
    }

    fn execute_with_sudo(
        &mut self,
        call: &ToolCall,
        on_event: &mut impl FnMut(AgentEvent),
        sudo_password: &mut impl FnMut() -> Option<String>,
    ) {
        on_event(AgentEvent::Executing(call.clone()));
        let outcome = self.tool_host.execute(call, self.tool_ctx, &self.cancel);

        let needs_sudo = !outcome.success
            && outcome.output.starts_with("AWAIT_SUDO")
            && call.name == "execute_shell"
            && call
                .arguments
                .get("cmd")
                .and_then(|v| v.as_str())
                .map(is_sudo_command)
                .unwrap_or(false);

        let outcome = if needs_sudo {
            match sudo_password() {
                Some(password) => {
                    self.tool_ctx.sudo_cache.set(password);
                    self.tool_host.execute(call, self.tool_ctx, &self.cancel)
                }
                None => outcome,
            }
        } else {
            outcome
        };

        on_event(AgentEvent::ToolResult {
            call_id: call.id.clone(),
            success: outcome.success,
            output: outcome.output.clone(),
        });
        self.messages
            .push(ChatMessage::tool_result(call.id.clone(), outcome.output));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natshell_core::{FinishReason, LlmToolCall, Role, SafetyConfig, SafetyMode};
    use natshell_llm::{CompletionResult, EngineError};
    use natshell_tools::{DefaultToolHost, FileReadTracker, SudoCache};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedEngine {
        responses: Mutex<Vec<CompletionResult>>,
        window: u32,
    }

    impl InferenceEngine for ScriptedEngine {
        fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _temperature: f32,
            _max_tokens: u32,
            _cancel: &CancelToken,
        ) -> Result<CompletionResult, EngineError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(CompletionResult {
                    text: Some("done".to_string()),
                    tool_calls: vec![],
                    finish_reason: FinishReason::Stop,
                })
            } else {
                Ok(responses.remove(0))
            }
        }
        fn context_window(&self) -> u32 {
            self.window
        }
        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn test_ctx(cwd: std::path::PathBuf) -> ToolContext {
        let backup_dir = tempfile::tempdir().unwrap();
        ToolContext {
            cwd,
            sudo_cache: Arc::new(SudoCache::new()),
            read_tracker: Arc::new(FileReadTracker::new()),
            backups: Arc::new(natshell_store::BackupStore::open(backup_dir.into_path(), 10).unwrap()),
            max_output_bytes: natshell_tools::DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    fn safe_classifier() -> SafetyClassifier {
        let cfg = SafetyConfig {
            mode: SafetyMode::Confirm,
            always_confirm: vec![],
            blocked: vec![],
            sensitive_paths: vec![],
        };
        natshell_policy::classifier_from_config(&cfg).unwrap()
    }

    #[test]
    fn plain_text_response_finishes_the_turn() {
        let engine = ScriptedEngine {
            responses: Mutex::new(vec![CompletionResult {
                text: Some("hello there".to_string()),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
            }]),
            window: 32768,
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let classifier = safe_classifier();
        let cancel = CancelToken::new();
        let mut agent_loop = AgentLoop::new(
            &engine,
            &host,
            &classifier,
            &ctx,
            vec![],
            "system".to_string(),
            0.2,
            512,
            cancel,
        );

        let result = agent_loop.run_turn("hi", |_| {}, |_| true, || None);
        assert_eq!(result.stop_reason, StopReason::Finished);
    }

    #[test]
    fn safe_tool_call_executes_without_confirmation() {
        let engine = ScriptedEngine {
            responses: Mutex::new(vec![
                CompletionResult {
                    text: None,
                    tool_calls: vec![LlmToolCall {
                        id: "1".to_string(),
                        name: "execute_shell".to_string(),
                        arguments: serde_json::json!({"cmd": "echo hi"}),
                    }],
                    finish_reason: FinishReason::ToolCalls,
                },
                CompletionResult {
                    text: Some("done".to_string()),
                    tool_calls: vec![],
                    finish_reason: FinishReason::Stop,
                },
            ]),
            window: 32768,
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let classifier = safe_classifier();
        let cancel = CancelToken::new();
        let mut agent_loop = AgentLoop::new(
            &engine,
            &host,
            &classifier,
            &ctx,
            vec![],
            "system".to_string(),
            0.2,
            512,
            cancel,
        );

        let confirm_calls = AtomicUsize::new(0);
        let result = agent_loop.run_turn(
            "run echo",
            |_| {},
            |_| {
                confirm_calls.fetch_add(1, Ordering::SeqCst);
                true
            },
            || None,
        );
        assert_eq!(result.stop_reason, StopReason::Finished);
        assert_eq!(confirm_calls.load(Ordering::SeqCst), 0);
        assert!(agent_loop
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.as_deref().unwrap_or("").contains("hi")));
    }

    #[test]
    fn blocked_command_never_reaches_confirm_or_execute() {
        let engine = ScriptedEngine {
            responses: Mutex::new(vec![
                CompletionResult {
                    text: None,
                    tool_calls: vec![LlmToolCall {
                        id: "1".to_string(),
                        name: "execute_shell".to_string(),
                        arguments: serde_json::json!({"cmd": "rm -rf /"}),
                    }],
                    finish_reason: FinishReason::ToolCalls,
                },
                CompletionResult {
                    text: Some("done".to_string()),
                    tool_calls: vec![],
                    finish_reason: FinishReason::Stop,
                },
            ]),
            window: 32768,
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let classifier = safe_classifier();
        let cancel = CancelToken::new();
        let mut agent_loop = AgentLoop::new(
            &engine,
            &host,
            &classifier,
            &ctx,
            vec![],
            "system".to_string(),
            0.2,
            512,
            cancel,
        );

        let confirm_calls = AtomicUsize::new(0);
        agent_loop.run_turn(
            "please delete everything",
            |_| {},
            |_| {
                confirm_calls.fetch_add(1, Ordering::SeqCst);
                true
            },
            || None,
        );
        assert_eq!(confirm_calls.load(Ordering::SeqCst), 0);
        assert!(agent_loop
            .messages
            .iter()
            .any(|m| m.content.as_deref().unwrap_or("").contains("blocked")));
    }

    #[test]
    fn declined_confirm_tool_call_is_not_executed() {
        let engine = ScriptedEngine {
            responses: Mutex::new(vec![
                CompletionResult {
                    text: None,
                    tool_calls: vec![LlmToolCall {
                        id: "1".to_string(),
                        name: "execute_shell".to_string(),
                        arguments: serde_json::json!({"cmd": "sudo ls"}),
                    }],
                    finish_reason: FinishReason::ToolCalls,
                },
                CompletionResult {
                    text: Some("done".to_string()),
                    tool_calls: vec![],
                    finish_reason: FinishReason::Stop,
                },
            ]),
            window: 32768,
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let classifier = safe_classifier();
        let cancel = CancelToken::new();
        let mut agent_loop = AgentLoop::new(
            &engine,
            &host,
            &classifier,
            &ctx,
            vec![],
            "system".to_string(),
            0.2,
            512,
            cancel,
        );

        agent_loop.run_turn("run sudo ls", |_| {}, |_| false, || None);
        assert!(agent_loop
            .messages
            .iter()
            .any(|m| m.content.as_deref().unwrap_or("").contains("declined")));
    }

    #[test]
    fn step_budget_exceeded_terminates_the_loop() {
        let infinite_tool_calls = CompletionResult {
            text: None,
            tool_calls: vec![LlmToolCall {
                id: "1".to_string(),
                name: "natshell_help".to_string(),
                arguments: serde_json::json!({}),
            }],
            finish_reason: FinishReason::ToolCalls,
        };
        let responses: Vec<CompletionResult> = (0..100).map(|_| infinite_tool_calls.clone()).collect();
        let engine = ScriptedEngine {
            responses: Mutex::new(responses),
            window: 4096,
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let host = DefaultToolHost;
        let classifier = safe_classifier();
        let cancel = CancelToken::new();
        let mut agent_loop = AgentLoop::new(
            &engine,
            &host,
            &classifier,
            &ctx,
            vec![],
            "system".to_string(),
            0.2,
            512,
            cancel,
        );

        let result = agent_loop.run_turn("keep going forever", |_| {}, |_| true, || None);
        assert_eq!(result.stop_reason, StopReason::StepBudgetExceeded);
    }
}
