//! Session persistence, file backups, and unified diffs: the substrate
//! `natshell-cli`'s `/save`, `/load`, `/sessions`, and `/undo` commands and
//! `natshell-tools`'s `write_file`/`edit_file` sit on top of.

mod backup;
mod diff;
mod session;

pub use backup::{BackupStore, DEFAULT_MAX_BACKUPS_PER_FILE};
pub use diff::{unified_diff, DiffLine, Hunk};
pub use session::{SessionRecord, SessionStore, MAX_SESSION_BYTES};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize session: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse session file: {source}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid session id: {raw}")]
    InvalidSessionId { raw: String },
    #[error("session would be {bytes} bytes, exceeding the {max} byte cap")]
    SessionTooLarge { bytes: u64, max: u64 },
    #[error("refusing to follow symlinked path component: {path}")]
    SymlinkRejected { path: PathBuf },
    #[error("no backup available for {path}")]
    NoBackupAvailable { path: PathBuf },
}
