//! Shared types for NatShell: the chat/tool wire shapes every other crate
//! speaks, the on-disk configuration model, and the agent-event stream the
//! front end renders.

mod cancel;
mod config;
mod event;
mod message;

pub use cancel::CancelToken;
pub use config::{
    AgentConfig, BackupConfig, Config, ConfigError, EngineConfig, EnginePreference, ModelConfig,
    RemoteConfig, SafetyConfig, SafetyMode,
};
pub use event::AgentEvent;
pub use message::{ChatMessage, FinishReason, LlmToolCall, Role, ToolCall, ToolDefinition};

pub type Result<T> = anyhow::Result<T>;

/// Root directory for a user's NatShell data, honoring `$XDG_DATA_HOME`.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        std::path::PathBuf::from(xdg).join("natshell")
    } else {
        home_dir().join(".local").join("share").join("natshell")
    }
}

/// Root directory for a user's NatShell configuration, honoring
/// `$XDG_CONFIG_HOME`.
pub fn config_dir() -> std::path::PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        std::path::PathBuf::from(xdg).join("natshell")
    } else {
        home_dir().join(".config").join("natshell")
    }
}

fn home_dir() -> std::path::PathBuf {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}

/// A 32-hex-character session id. Newtype so that path-joining code cannot
/// accept an arbitrary string without going through validation first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Parse a session id from its 32-hex-digit filename stem. Rejects
    /// anything that isn't exactly 32 lowercase hex digits so callers can
    /// safely join it onto a directory path without a traversal risk.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 32 || !raw.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return None;
        }
        let hyphenated = format!(
            "{}-{}-{}-{}-{}",
            &raw[0..8],
            &raw[8..12],
            &raw[12..16],
            &raw[16..20],
            &raw[20..32]
        );
        uuid::Uuid::parse_str(&hyphenated).ok().map(Self)
    }

    pub fn as_simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_rejects_wrong_length() {
        assert!(SessionId::parse("abc").is_none());
    }

    #[test]
    fn session_id_rejects_path_traversal() {
        assert!(SessionId::parse("../../../../etc/passwd").is_none());
        assert!(SessionId::parse("00000000000000000000000000000/").is_none());
    }

    #[test]
    fn session_id_rejects_uppercase() {
        let id = SessionId::new().as_simple();
        let upper = id.to_uppercase();
        assert!(SessionId::parse(&upper).is_none());
    }

    #[test]
    fn session_id_round_trips() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.as_simple()).expect("round trip");
        assert_eq!(id, parsed);
    }
}
