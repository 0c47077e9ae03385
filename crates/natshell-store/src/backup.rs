//! Backup-before-mutation and `/undo`. Grounded on the stage/apply idiom in
//! the teacher's patch store, simplified from event-sourced patches to a
//! plain copy-on-write: before `write_file`/`edit_file` touches a file, a
//! full snapshot is copied into a `0o700` backup directory as
//! `<basename>.<unix_timestamp_nanos>.bak`; `/undo` restores the newest
//! snapshot for a path and reports the diff it reversed.

use crate::diff::unified_diff;
use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_BACKUPS_PER_FILE: usize = 10;

pub struct BackupStore {
    root: PathBuf,
    max_per_file: usize,
}

impl BackupStore {
    pub fn open(root: impl Into<PathBuf>, max_per_file: usize) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        set_owner_only_dir(&root)?;
        Ok(Self { root, max_per_file })
    }

    /// Snapshot `path`'s current contents before it is mutated. `path` must
    /// already exist; refuses to follow a path whose parent is a symlink,
    /// since a symlinked ancestor could redirect the backup somewhere the
    /// caller doesn't expect.
    pub fn snapshot(&self, path: &Path, nonce: u128) -> Result<PathBuf, StoreError> {
        reject_symlink_ancestors(path)?;
        let contents = fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed");
        let backup_name = format!("{basename}.{nonce}.bak");
        let backup_path = self.root.join(&backup_name);

        fs::write(&backup_path, &contents).map_err(|source| StoreError::Io {
            path: backup_path.clone(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&backup_path, fs::Permissions::from_mode(0o600));
        }

        self.prune(basename)?;
        Ok(backup_path)
    }

    /// Restore the newest backup for `path`, returning the diff from the
    /// restored version back to what was on disk before the restore.
    pub fn undo(&self, path: &Path) -> Result<String, StoreError> {
        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed");
        let newest = self
            .backups_for(basename)?
            .into_iter()
            .max_by_key(|(nonce, _)| *nonce)
            .ok_or_else(|| StoreError::NoBackupAvailable {
                path: path.to_path_buf(),
            })?;

        let backup_contents = fs::read_to_string(&newest.1).map_err(|source| StoreError::Io {
            path: newest.1.clone(),
            source,
        })?;
        let current_contents = fs::read_to_string(path).unwrap_or_default();

        fs::write(path, &backup_contents).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        fs::remove_file(&newest.1).map_err(|source| StoreError::Io {
            path: newest.1.clone(),
            source,
        })?;

        Ok(unified_diff(
            &current_contents,
            &backup_contents,
            "before-undo",
            "after-undo",
            5,
        ))
    }

    fn backups_for(&self, basename: &str) -> Result<Vec<(u128, PathBuf)>, StoreError> {
        let prefix = format!("{basename}.");
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(nonce_str) = rest.strip_suffix(".bak") {
                    if let Ok(nonce) = nonce_str.parse::<u128>() {
                        out.push((nonce, entry.path()));
                    }
                }
            }
        }
        Ok(out)
    }

    fn prune(&self, basename: &str) -> Result<(), StoreError> {
        let mut backups = self.backups_for(basename)?;
        if backups.len() <= self.max_per_file {
            return Ok(());
        }
        backups.sort_by_key(|(nonce, _)| *nonce);
        let excess = backups.len() - self.max_per_file;
        for (_, path) in backups.into_iter().take(excess) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

fn reject_symlink_ancestors(path: &Path) -> Result<(), StoreError> {
    let mut current = PathBuf::new();
    for component in path.components() {
        current.push(component);
        if current == path {
            continue;
        }
        if let Ok(meta) = fs::symlink_metadata(&current) {
            if meta.file_type().is_symlink() {
                return Err(StoreError::SymlinkRejected {
                    path: current.clone(),
                });
            }
        }
    }
    Ok(())
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
    fn snapshot_then_undo_restores_original_contents() {
        let workdir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let target = workdir.path().join("notes.txt");
        fs::write(&target, "original\n").unwrap();

        let store = BackupStore::open(backup_dir.path(), DEFAULT_MAX_BACKUPS_PER_FILE).unwrap();
        store.snapshot(&target, 1).unwrap();
        fs::write(&target, "modified\n").unwrap();

        store.undo(&target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "original\n");
    }

    #[test]
    fn undo_with_no_backup_fails_loudly() {
        let workdir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let target = workdir.path().join("notes.txt");
        fs::write(&target, "hi\n").unwrap();

        let store = BackupStore::open(backup_dir.path(), DEFAULT_MAX_BACKUPS_PER_FILE).unwrap();
        let err = store.undo(&target).unwrap_err();
        assert!(matches!(err, StoreError::NoBackupAvailable { .. }));
    }

    #[test]
    fn prunes_oldest_backup_beyond_cap() {
        let workdir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let target = workdir.path().join("notes.txt");
        fs::write(&target, "v0\n").unwrap();

        let store = BackupStore::open(backup_dir.path(), 2).unwrap();
        for nonce in 1..=3u128 {
            fs::write(&target, format!("v{nonce}\n")).unwrap();
            store.snapshot(&target, nonce).unwrap();
        }

        let remaining = store.backups_for("notes.txt").unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.iter().any(|(n, _)| *n == 1));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinked_ancestor() {
        let workdir = tempfile::tempdir().unwrap();
        let real_dir = workdir.path().join("real");
        fs::create_dir(&real_dir).unwrap();
        let link = workdir.path().join("link");
        std::os::unix::fs::symlink(&real_dir, &link).unwrap();
        let target = link.join("notes.txt");
        fs::write(real_dir.join("notes.txt"), "hi\n").unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        let store = BackupStore::open(backup_dir.path(), DEFAULT_MAX_BACKUPS_PER_FILE).unwrap();
        let err = store.snapshot(&target, 1).unwrap_err();
        assert!(matches!(err, StoreError::SymlinkRejected { .. }));
    }
}
