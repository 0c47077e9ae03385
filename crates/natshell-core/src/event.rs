use crate::ToolCall;
use serde::{Deserialize, Serialize};

/// What the REPL's renderer receives as the agent loop progresses through
/// one user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    Thinking,
    Executing(ToolCall),
    ToolResult {
        call_id: String,
        success: bool,
        output: String,
    },
    ConfirmNeeded(ToolCall),
    Blocked {
        call: ToolCall,
        reason: String,
    },
    Response(String),
    Error {
        kind: String,
        message: String,
    },
}
