//! Approximate-token-counting compaction. Grounded on
//! `deepseek_agent::tool_loop::ToolUseLoop`'s `compact_messages` and its
//! `COMPACTION_THRESHOLD_PCT`/`COMPACTION_TARGET_PCT` constants, generalized
//! from "keep the last 6 messages" to "keep a tail sized to roughly a third
//! of the context window".

use natshell_core::{CancelToken, ChatMessage, Role};
use natshell_llm::{EngineError, InferenceEngine};

const MIN_SAFETY_MARGIN_TOKENS: u32 = 256;
const SAFETY_MARGIN_FRACTION: f64 = 0.05;
const TAIL_FRACTION: f64 = 1.0 / 3.0;

const SUMMARIZE_PROMPT: &str = "Summarize the conversation so far in a few dense sentences, \
preserving file paths, decisions, and anything the user explicitly asked to remember. \
This summary replaces the messages it covers, so do not drop load-bearing facts.";

pub fn safety_margin(context_window: u32) -> u32 {
    ((context_window as f64 * SAFETY_MARGIN_FRACTION).round() as u32).max(MIN_SAFETY_MARGIN_TOKENS)
}

fn total_tokens(messages: &[ChatMessage]) -> u32 {
    messages.iter().map(ChatMessage::approx_tokens).sum()
}

pub fn needs_compaction(messages: &[ChatMessage], max_tokens: u32, context_window: u32) -> bool {
    let projected = total_tokens(messages) + max_tokens;
    let budget = context_window.saturating_sub(safety_margin(context_window));
    projected > budget
}

/// Replace the run of non-system messages preceding a tail sized to about
/// a third of the context window with one synthetic summary message
/// produced by a one-shot call to `engine`. The leading system message (if
/// any) is always preserved untouched.
pub fn compact(
    messages: &[ChatMessage],
    engine: &dyn InferenceEngine,
    context_window: u32,
    cancel: &CancelToken,
) -> Result<Vec<ChatMessage>, EngineError> {
    let system_prefix: Vec<ChatMessage> = messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .cloned()
        .collect();
    let rest = &messages[system_prefix.len()..];

    let tail_budget = (context_window as f64 * TAIL_FRACTION) as u32;
    let mut tail_start = rest.len();
    let mut tail_tokens = 0u32;
    while tail_start > 0 {
        let candidate_tokens = rest[tail_start - 1].approx_tokens();
        if tail_tokens + candidate_tokens > tail_budget {
            break;
        }
        tail_tokens += candidate_tokens;
        tail_start -= 1;
    }

    let to_summarize = &rest[..tail_start];
    let tail = &rest[tail_start..];

    if to_summarize.is_empty() {
        return Ok(messages.to_vec());
    }

    let mut summarize_request = to_summarize.to_vec();
    summarize_request.push(ChatMessage::user(SUMMARIZE_PROMPT));
    let completion = engine.chat_completion(&summarize_request, None, 0.2, 512, cancel)?;
    let summary_text = completion
        .text
        .unwrap_or_else(|| "(summary unavailable; prior context was compacted)".to_string());

    let mut out = system_prefix;
    out.push(ChatMessage::system(format!(
        "[compacted summary of earlier conversation]\n{summary_text}"
    )));
    out.extend_from_slice(tail);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use natshell_core::FinishReason;
    use natshell_core::ToolDefinition;

    struct StubEngine {
        window: u32,
    }

    impl InferenceEngine for StubEngine {
        fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _temperature: f32,
            _max_tokens: u32,
            _cancel: &CancelToken,
        ) -> Result<natshell_llm::CompletionResult, EngineError> {
            Ok(natshell_llm::CompletionResult {
                text: Some("summary of prior turns".to_string()),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
            })
        }
        fn context_window(&self) -> u32 {
            self.window
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn small_history_does_not_need_compaction() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        assert!(!needs_compaction(&messages, 512, 128_000));
    }

    #[test]
    fn oversized_history_needs_compaction() {
        let messages: Vec<ChatMessage> = (0..200)
            .map(|_| ChatMessage::user("x".repeat(2000)))
            .collect();
        assert!(needs_compaction(&messages, 512, 4096));
    }

    #[test]
    fn compaction_preserves_system_message_and_tail() {
        let cancel = CancelToken::new();
        let engine = StubEngine { window: 4096 };

        let mut messages = vec![ChatMessage::system("system prompt")];
        for i in 0..50 {
            messages.push(ChatMessage::user(format!("message {i}").repeat(50)));
        }
        messages.push(ChatMessage::user("the most recent message"));

        let compacted = compact(&messages, &engine, 4096, &cancel).unwrap();
        assert_eq!(compacted[0].role, Role::System);
        assert!(compacted.iter().any(|m| m
            .content
            .as_deref()
            .unwrap_or_default()
            .contains("compacted summary")));
        assert!(compacted
            .last()
            .unwrap()
            .content
            .as_deref()
            .unwrap()
            .contains("most recent message"));
        assert!(compacted.len() < messages.len());
    }

    #[test]
    fn safety_margin_respects_minimum() {
        assert_eq!(safety_margin(1000), MIN_SAFETY_MARGIN_TOKENS);
        assert_eq!(safety_margin(100_000), 5000);
    }
}
