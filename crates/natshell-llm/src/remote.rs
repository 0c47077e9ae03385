//! OpenAI-compatible remote backend. Grounded on
//! `deepseek-llm::DeepSeekClient::complete_inner`'s retry/backoff loop:
//! retries transient transport errors and 502/503/504 with exponential
//! backoff honoring a `Retry-After` header, does not retry 400/401.

use crate::{CompletionResult, EngineError, InferenceEngine};
use natshell_core::{
    CancelToken, ChatMessage, FinishReason, LlmToolCall, Role, ToolDefinition,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const NETWORK_RETRY_BASE_MS: u64 = 1000;
const MAX_RETRIES: u32 = 2;

pub struct RemoteEngine {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: String,
    context_window: u32,
    warned_plaintext_key: AtomicBool,
}

impl RemoteEngine {
    pub fn new(url: String, model: String, api_key: String, context_window: u32) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            client,
            url,
            model,
            api_key,
            context_window,
            warned_plaintext_key: AtomicBool::new(false),
        }
    }

    fn warn_plaintext_key_once(&self) {
        if self.url.starts_with("http://")
            && !self.warned_plaintext_key.swap(true, Ordering::SeqCst)
        {
            eprintln!(
                "warning: sending API key to a non-TLS endpoint ({}); traffic is unencrypted",
                self.url
            );
        }
    }
}

impl InferenceEngine for RemoteEngine {
    fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, EngineError> {
        self.warn_plaintext_key_once();

        let payload = build_payload(&self.model, messages, tools, temperature, max_tokens);

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: serde_json::Value = resp
                            .json()
                            .map_err(|e| EngineError::Transport(e.to_string()))?;
                        return parse_completion(&body);
                    }

                    if attempt >= MAX_RETRIES || !should_retry_status(status.as_u16()) {
                        let body = resp.text().unwrap_or_default();
                        return Err(EngineError::Fatal(format!(
                            "remote engine returned {status}: {body}"
                        )));
                    }

                    let retry_after = parse_retry_after_seconds(resp.headers());
                    attempt += 1;
                    std::thread::sleep(retry_delay(NETWORK_RETRY_BASE_MS, attempt, retry_after));
                }
                Err(err) => {
                    if attempt >= MAX_RETRIES || !should_retry_transport_error(&err) {
                        return Err(EngineError::Transport(err.to_string()));
                    }
                    attempt += 1;
                    std::thread::sleep(retry_delay(NETWORK_RETRY_BASE_MS, attempt, None));
                }
            }
        }
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    fn name(&self) -> &str {
        "remote"
    }
}

fn build_payload(
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    temperature: f32,
    max_tokens: u32,
) -> serde_json::Value {
    let mut payload = json!({
        "model": model,
        "messages": messages.iter().map(render_message).collect::<Vec<_>>(),
        "temperature": temperature,
        "max_tokens": max_tokens,
    });
    if let Some(tools) = tools {
        payload["tools"] = json!(
            tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                }))
                .collect::<Vec<_>>()
        );
    }
    payload
}

fn render_message(m: &ChatMessage) -> serde_json::Value {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut value = json!({ "role": role });
    if let Some(content) = &m.content {
        value["content"] = json!(content);
    }
    if !m.tool_calls.is_empty() {
        value["tool_calls"] = json!(
            m.tool_calls
                .iter()
                .map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments.to_string() }
                }))
                .collect::<Vec<_>>()
        );
    }
    if let Some(id) = &m.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    value
}

fn parse_completion(body: &serde_json::Value) -> Result<CompletionResult, EngineError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| EngineError::Fatal("response had no choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| EngineError::Fatal("choice had no message".to_string()))?;

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let tool_calls: Vec<LlmToolCall> = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    let finish_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    };

    Ok(CompletionResult {
        text,
        tool_calls,
        finish_reason,
    })
}

fn parse_tool_call(value: &serde_json::Value) -> Option<LlmToolCall> {
    let id = value.get("id")?.as_str()?.to_string();
    let function = value.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let raw_args = function.get("arguments")?.as_str().unwrap_or("{}");
    let arguments = serde_json::from_str(raw_args).unwrap_or(json!({}));
    Some(LlmToolCall {
        id,
        name,
        arguments,
    })
}

fn should_retry_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn should_retry_transport_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

fn parse_retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds);
    }
    httpdate::parse_http_date(raw)
        .ok()
        .and_then(|when| when.duration_since(std::time::SystemTime::now()).ok())
        .map(|d| d.as_secs())
}

fn retry_delay(base_ms: u64, attempt: u32, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(seconds) = retry_after_seconds {
        return Duration::from_secs(seconds);
    }
    Duration::from_millis(base_ms * attempt as u64)
}

/// Minimal HTTP-date parsing so we don't pull in a whole crate just for the
/// rare server that returns `Retry-After` as a date rather than seconds.
mod httpdate {
    use std::time::SystemTime;

    pub fn parse_http_date(_raw: &str) -> Result<SystemTime, ()> {
        // HTTP-date retry-after is rare in practice; treat as "not present"
        // rather than guessing at a hand-rolled RFC 2822 parser.
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_uses_retry_after_when_present() {
        let d = retry_delay(1000, 1, Some(5));
        assert_eq!(d, Duration::from_secs(5));
    }

    #[test]
    fn retry_delay_backs_off_without_retry_after() {
        let first = retry_delay(1000, 1, None);
        let second = retry_delay(1000, 2, None);
        assert!(second > first);
    }

    #[test]
    fn should_retry_status_covers_server_errors_not_client_errors() {
        assert!(should_retry_status(503));
        assert!(!should_retry_status(401));
        assert!(!should_retry_status(400));
    }

    #[test]
    fn parse_completion_extracts_text() {
        let body = json!({
            "choices": [{
                "message": { "content": "hello" },
                "finish_reason": "stop"
            }]
        });
        let result = parse_completion(&body).unwrap();
        assert_eq!(result.text.as_deref(), Some("hello"));
        assert_eq!(result.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn parse_completion_extracts_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "execute_shell", "arguments": "{\"cmd\":\"ls\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let result = parse_completion(&body).unwrap();
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].name, "execute_shell");
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
    }
}
