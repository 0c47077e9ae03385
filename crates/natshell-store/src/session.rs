//! File-based session persistence: one JSON file per session under a
//! `0o700` directory, named by a validated 32-hex-digit id so a session id
//! read from user input can never be joined onto a path outside the
//! sessions directory. Grounded on the hardening idiom in
//! `deepseek-cli::context` (owner-only file permissions on a sensitive
//! file) generalized from "one API-key file" to "every session file".

use crate::StoreError;
use natshell_core::{ChatMessage, SessionId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MAX_SESSION_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub messages: Vec<ChatMessage>,
}

impl SessionRecord {
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        Self {
            id: SessionId::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Create (if necessary) the sessions directory with `0o700`
    /// permissions and return a handle to it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        set_owner_only_dir(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.id);
        let body = serde_json::to_vec_pretty(record)
            .map_err(|source| StoreError::Serialize { source })?;
        if body.len() as u64 > MAX_SESSION_BYTES {
            return Err(StoreError::SessionTooLarge {
                bytes: body.len() as u64,
                max: MAX_SESSION_BYTES,
            });
        }

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|source| {
            StoreError::Io {
                path: path.clone(),
                source,
            }
        })?;
        use std::io::Write;
        tmp.write_all(&body).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600));
        }
        tmp.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Load a session by its raw id string. Rejects any string that is not
    /// exactly 32 lowercase hex digits before it is ever used to build a
    /// path.
    pub fn load(&self, raw_id: &str) -> Result<SessionRecord, StoreError> {
        let id = SessionId::parse(raw_id).ok_or_else(|| StoreError::InvalidSessionId {
            raw: raw_id.to_string(),
        })?;
        let path = self.path_for(&id);
        let body = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| StoreError::Deserialize { source })
    }

    pub fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if let Some(id) = SessionId::parse(stem) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(unix)]
fn set_owner_only_dir(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|source| {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_owner_only_dir(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let mut record = SessionRecord::new();
        record.messages.push(ChatMessage::user("hello"));
        store.save(&record).unwrap();

        let loaded = store.load(&record.id.as_simple()).unwrap();
        assert_eq!(loaded.messages.len(), 1);
    }

    #[test]
    fn load_rejects_path_traversal_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let err = store.load("../../../../etc/passwd").unwrap_err();
        assert!(matches!(err, StoreError::InvalidSessionId { .. }));
    }

    #[test]
    fn oversized_session_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let mut record = SessionRecord::new();
        record
            .messages
            .push(ChatMessage::user("x".repeat((MAX_SESSION_BYTES + 1) as usize)));
        let err = store.save(&record).unwrap_err();
        assert!(matches!(err, StoreError::SessionTooLarge { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn sessions_dir_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let sessions_dir = dir.path().join("sessions");
        let _store = SessionStore::open(&sessions_dir).unwrap();
        let mode = fs::metadata(&sessions_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn list_only_returns_valid_session_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let record = SessionRecord::new();
        store.save(&record).unwrap();
        fs::write(dir.path().join("not-a-session.json"), b"{}").unwrap();

        let ids = store.list().unwrap();
        assert_eq!(ids, vec![record.id]);
    }
}
