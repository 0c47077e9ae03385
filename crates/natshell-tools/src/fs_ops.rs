//! `read_file`, `write_file`, and `edit_file`. Grounded on the
//! `sha256`-tracked read-before-edit invariant in `deepseek-tools::fs.read`
//! / `fs.edit`, narrowed to exactly-one-match edits (the teacher replaces
//! every occurrence by default; NatShell's safety invariant requires the
//! caller to pin down a single location) with `strsim`-ranked suggestions
//! when nothing matches.

use crate::{ToolError, ToolOutcome};
use natshell_store::{unified_diff, BackupStore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const EDIT_DIFF_CONTEXT: usize = 5;
const MAX_FUZZY_SUGGESTIONS: usize = 3;

/// Records which files have been read this session and the sha256 of what
/// was read, so `edit_file` can refuse to touch a file that was never read
/// or has changed on disk since.
#[derive(Default)]
pub struct FileReadTracker {
    hashes: Mutex<HashMap<PathBuf, String>>,
}

impl FileReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: &Path, content: &str) {
        let hash = hash_content(content);
        self.hashes
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), hash);
    }

    pub fn was_read_with_hash(&self, path: &Path, hash: &str) -> bool {
        self.hashes
            .lock()
            .unwrap()
            .get(path)
            .map(|tracked| tracked == hash)
            .unwrap_or(false)
    }
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn read_file(path: &Path, max_lines: Option<usize>, tracker: &FileReadTracker) -> Result<ToolOutcome, ToolError> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolError::Execution(e.to_string()))?;
    tracker.record(path, &content);

    let rendered = match max_lines {
        Some(limit) => {
            let lines: Vec<&str> = content.lines().collect();
            if lines.len() > limit {
                format!(
                    "{}\n… ({} of {} lines shown) …",
                    lines[..limit].join("\n"),
                    limit,
                    lines.len()
                )
            } else {
                content.clone()
            }
        }
        None => content.clone(),
    };

    Ok(ToolOutcome::success(rendered))
}

pub fn write_file(
    path: &Path,
    content: &str,
    append: bool,
    backups: &BackupStore,
) -> Result<ToolOutcome, ToolError> {
    if path.exists() && !append {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        backups
            .snapshot(path, nonce)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
    }

    if append {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| ToolError::Execution(e.to_string()))?;
    } else {
        std::fs::write(path, content).map_err(|e| ToolError::Execution(e.to_string()))?;
    }

    Ok(ToolOutcome::success(format!(
        "wrote {} bytes to {}",
        content.len(),
        path.display()
    )))
}

pub fn edit_file(
    path: &Path,
    search: &str,
    replace: &str,
    tracker: &FileReadTracker,
    backups: &BackupStore,
) -> Result<ToolOutcome, ToolError> {
    let current = std::fs::read_to_string(path).map_err(|e| ToolError::Execution(e.to_string()))?;
    let current_hash = hash_content(&current);

    if !tracker.was_read_with_hash(path, &current_hash) {
        return Err(ToolError::Validation(
            "file not read, or changed since read".to_string(),
        ));
    }

    let matches: Vec<usize> = current.match_indices(search).map(|(idx, _)| idx).collect();
    match matches.len() {
        0 => {
            let suggestions = fuzzy_suggestions(&current, search);
            let hint = if suggestions.is_empty() {
                String::new()
            } else {
                format!(" did you mean one of: {}?", suggestions.join(", "))
            };
            Err(ToolError::Validation(format!(
                "no match for the given search text in {}.{hint}",
                path.display()
            )))
        }
        1 => {
            let idx = matches[0];
            let updated = format!("{}{}{}", &current[..idx], replace, &current[idx + search.len()..]);

            let nonce = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            backups
                .snapshot(path, nonce)
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            std::fs::write(path, &updated).map_err(|e| ToolError::Execution(e.to_string()))?;
            tracker.record(path, &updated);

            let diff = unified_diff(
                &current,
                &updated,
                &path.display().to_string(),
                &path.display().to_string(),
                EDIT_DIFF_CONTEXT,
            );
            Ok(ToolOutcome::success(diff))
        }
        n => {
            let line_numbers = matching_line_numbers(&current, search);
            Err(ToolError::Validation(format!(
                "search text matches {n} times in {} (lines {}); narrow it to a unique match",
                path.display(),
                line_numbers
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }
}

fn matching_line_numbers(content: &str, search: &str) -> Vec<usize> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(search))
        .map(|(idx, _)| idx + 1)
        .collect()
}

fn fuzzy_suggestions(content: &str, search: &str) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = content
        .lines()
        .map(|line| (strsim::jaro_winkler(line, search), line))
        .filter(|(score, line)| *score > 0.6 && !line.trim().is_empty())
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(MAX_FUZZY_SUGGESTIONS)
        .map(|(_, line)| line.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_then_edit_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "hello world\n").unwrap();

        let tracker = FileReadTracker::new();
        read_file(&path, None, &tracker).unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        let backups = BackupStore::open(backup_dir.path(), 10).unwrap();
        let outcome = edit_file(&path, "world", "rust", &tracker, &backups).unwrap();
        assert!(outcome.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello rust\n");
    }

    #[test]
    fn edit_without_prior_read_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "hello world\n").unwrap();

        let tracker = FileReadTracker::new();
        let backup_dir = tempfile::tempdir().unwrap();
        let backups = BackupStore::open(backup_dir.path(), 10).unwrap();
        let err = edit_file(&path, "world", "rust", &tracker, &backups).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn edit_with_stale_read_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "hello world\n").unwrap();

        let tracker = FileReadTracker::new();
        read_file(&path, None, &tracker).unwrap();
        std::fs::write(&path, "hello mutated world\n").unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        let backups = BackupStore::open(backup_dir.path(), 10).unwrap();
        let err = edit_file(&path, "world", "rust", &tracker, &backups).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn ambiguous_match_is_rejected_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "foo\nfoo\n").unwrap();

        let tracker = FileReadTracker::new();
        read_file(&path, None, &tracker).unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let backups = BackupStore::open(backup_dir.path(), 10).unwrap();
        let err = edit_file(&path, "foo", "bar", &tracker, &backups).unwrap_err();
        match err {
            ToolError::Validation(msg) => {
                assert!(msg.contains("2 times"));
                assert!(msg.contains('1'));
                assert!(msg.contains('2'));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn no_match_offers_fuzzy_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "function helloWorld() {}\n").unwrap();

        let tracker = FileReadTracker::new();
        read_file(&path, None, &tracker).unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let backups = BackupStore::open(backup_dir.path(), 10).unwrap();
        let err = edit_file(&path, "function helloWrold", "x", &tracker, &backups).unwrap_err();
        match err {
            ToolError::Validation(msg) => assert!(msg.contains("did you mean")),
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn write_file_stages_backup_before_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "old\n").unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        let backups = BackupStore::open(backup_dir.path(), 10).unwrap();
        write_file(&path, "new\n", false, &backups).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");

        backups.undo(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\n");
    }
}
