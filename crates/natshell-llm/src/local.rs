//! Local backend: bundled tokenizer + LM via [`crate::local_backend`]. No
//! native tool-calling API, so tool schemas are inlined as text in the
//! system prompt and the model is asked to emit
//! `<tool_call>{"name":...,"arguments":{...}}</tool_call>` blocks, which
//! this module extracts; `<think>...</think>` reasoning spans are stripped
//! before the result reaches the agent loop.

use crate::local_backend::{GenOpts, LocalGenBackend};
use crate::{CompletionResult, EngineError, InferenceEngine};
use natshell_core::{CancelToken, ChatMessage, FinishReason, LlmToolCall, Role, ToolDefinition};
use regex::Regex;
use std::sync::LazyLock;

static TOOL_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").unwrap());
static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

pub struct LocalEngine {
    backend: Box<dyn LocalGenBackend>,
}

impl LocalEngine {
    pub fn new(backend: Box<dyn LocalGenBackend>) -> Self {
        Self { backend }
    }
}

impl InferenceEngine for LocalEngine {
    fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let prompt = render_prompt(messages, tools);
        let opts = GenOpts {
            max_tokens,
            temperature,
            stop_sequences: vec![],
        };
        let raw = self
            .backend
            .generate(&prompt, &opts)
            .map_err(|e| EngineError::Fatal(e.to_string()))?;

        Ok(parse_local_response(&raw))
    }

    fn context_window(&self) -> u32 {
        self.backend.context_window()
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn render_prompt(messages: &[ChatMessage], tools: Option<&[ToolDefinition]>) -> String {
    let mut out = String::new();
    if let Some(tools) = tools {
        if !tools.is_empty() {
            out.push_str("# Available tools\n");
            out.push_str(
                "Call a tool by emitting <tool_call>{\"name\":...,\"arguments\":{...}}</tool_call>.\n",
            );
            for tool in tools {
                out.push_str(&format!(
                    "- {}: {} params={}\n",
                    tool.name, tool.description, tool.parameters
                ));
            }
            out.push('\n');
        }
    }
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        if let Some(content) = &message.content {
            out.push_str(&format!("[{role}] {content}\n"));
        }
        for call in &message.tool_calls {
            out.push_str(&format!(
                "[{role}] <tool_call>{{\"name\":\"{}\",\"arguments\":{}}}</tool_call>\n",
                call.name, call.arguments
            ));
        }
    }
    out.push_str("[assistant] ");
    out
}

fn parse_local_response(raw: &str) -> CompletionResult {
    let without_think = THINK_RE.replace_all(raw, "");

    let mut tool_calls = Vec::new();
    for (idx, captures) in TOOL_CALL_RE.captures_iter(&without_think).enumerate() {
        let body = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            let name = value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let arguments = value
                .get("arguments")
                .cloned()
                .unwrap_or(serde_json::json!({}));
            if !name.is_empty() {
                tool_calls.push(LlmToolCall {
                    id: format!("local-{idx}"),
                    name,
                    arguments,
                });
            }
        }
    }

    let remaining_text = TOOL_CALL_RE.replace_all(&without_think, "").trim().to_string();

    let finish_reason = if !tool_calls.is_empty() {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    };

    CompletionResult {
        text: if remaining_text.is_empty() {
            None
        } else {
            Some(remaining_text)
        },
        tool_calls,
        finish_reason,
    }
}

/// Auto-detect a local model's context window from its filename: looks for
/// the largest size-looking integer token in the name (e.g. "...-4B-..." or
/// "...-262144...") and maps it through a couple of well-known conventions.
/// Falls back to 4096 when nothing recognizable is found.
static DIGIT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

pub fn detect_context_window(model_filename: &str) -> u32 {
    let lower = model_filename.to_lowercase();

    // A literal context-length run of digits, e.g. "32768" or "262144".
    for digits in DIGIT_RUN_RE.find_iter(&lower) {
        if digits.as_str().len() >= 4 {
            if let Ok(n) = digits.as_str().parse::<u32>() {
                if n >= 1024 {
                    return n;
                }
            }
        }
    }

    // A parameter-count token, e.g. "4b" or "8b", mapped to that size
    // class's conventional default context window.
    for token in lower.split(|c: char| !c.is_ascii_alphanumeric()) {
        if let Some(stripped) = token.strip_suffix('b') {
            if let Ok(params) = stripped.parse::<u32>() {
                return match params {
                    0..=4 => 4096,
                    5..=8 => 8192,
                    9..=16 => 16384,
                    _ => 32768,
                };
            }
        }
    }
    4096
}
