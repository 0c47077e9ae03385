//! The ReAct agent loop and its context manager. Grounded on
//! `deepseek_agent::tool_loop`, narrowed from the teacher's
//! Architect/Editor/Apply/Verify/Planner pipeline down to a single
//! reason-act-observe cycle plus the compaction logic that pipeline relied
//! on to stay inside a model's context window.

mod agent_loop;
mod context;

pub use agent_loop::{AgentLoop, StopReason, TurnResult};
pub use context::{compact, needs_compaction, safety_margin};
