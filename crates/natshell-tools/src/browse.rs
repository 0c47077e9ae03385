//! `list_directory` and `search_files`. Grounded on `deepseek-tools`'s
//! `fs.glob`/`fs.grep` dispatch split, using `ignore::WalkBuilder` so both
//! tools respect `.gitignore` the way the teacher's file tools do.

use crate::ToolError;
use ignore::WalkBuilder;
use regex::Regex;
use std::path::Path;

pub struct DirEntryInfo {
    pub path: String,
    pub is_dir: bool,
}

pub fn list_directory(path: &Path, recursive: bool) -> Result<Vec<DirEntryInfo>, ToolError> {
    if !path.is_dir() {
        return Err(ToolError::Validation(format!(
            "{} is not a directory",
            path.display()
        )));
    }

    let mut out = Vec::new();
    if recursive {
        let walker = WalkBuilder::new(path).build();
        for entry in walker {
            let entry = entry.map_err(|e| ToolError::Execution(e.to_string()))?;
            if entry.path() == path {
                continue;
            }
            out.push(DirEntryInfo {
                path: entry.path().display().to_string(),
                is_dir: entry.file_type().map(|t| t.is_dir()).unwrap_or(false),
            });
        }
    } else {
        let mut entries: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| ToolError::Execution(e.to_string()))?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            out.push(DirEntryInfo {
                path: entry.path().display().to_string(),
                is_dir: entry.file_type().map(|t| t.is_dir()).unwrap_or(false),
            });
        }
    }
    Ok(out)
}

#[derive(Debug)]
pub struct SearchMatch {
    pub path: String,
    pub line_number: Option<usize>,
    pub line: Option<String>,
}

/// Dispatches to content search when `content` is given, or filename glob
/// search when `name` is given. When both look present, content search
/// wins — a regex-looking pattern almost always means "search inside
/// files", not "match this literal filename".
pub fn search_files(
    root: &Path,
    content: Option<&str>,
    name: Option<&str>,
) -> Result<Vec<SearchMatch>, ToolError> {
    match (content, name) {
        (Some(pattern), _) => search_content(root, pattern),
        (None, Some(glob_pattern)) => search_names(root, glob_pattern),
        (None, None) => Err(ToolError::Validation(
            "search_files requires either 'content' or 'name'".to_string(),
        )),
    }
}

fn search_content(root: &Path, pattern: &str) -> Result<Vec<SearchMatch>, ToolError> {
    let re = Regex::new(pattern).map_err(|e| ToolError::Validation(format!("invalid regex: {e}")))?;
    let mut out = Vec::new();
    for entry in WalkBuilder::new(root).build() {
        let entry = entry.map_err(|e| ToolError::Execution(e.to_string()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (idx, line) in text.lines().enumerate() {
            if re.is_match(line) {
                out.push(SearchMatch {
                    path: entry.path().display().to_string(),
                    line_number: Some(idx + 1),
                    line: Some(line.to_string()),
                });
            }
        }
    }
    Ok(out)
}

fn search_names(root: &Path, glob_pattern: &str) -> Result<Vec<SearchMatch>, ToolError> {
    let full_pattern = root.join(glob_pattern);
    let pattern_str = full_pattern.to_string_lossy().to_string();
    let paths = glob::glob(&pattern_str).map_err(|e| ToolError::Validation(e.to_string()))?;
    let mut out = Vec::new();
    for entry in paths {
        if let Ok(path) = entry {
            out.push(SearchMatch {
                path: path.display().to_string(),
                line_number: None,
                line: None,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_non_recursive_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = list_directory(dir.path(), false).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn content_search_finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nlet x = TODO;\n").unwrap();

        let matches = search_files(dir.path(), Some("TODO"), None).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_number, Some(2));
    }

    #[test]
    fn name_search_finds_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        std::fs::write(dir.path().join("main.py"), "").unwrap();

        let matches = search_files(dir.path(), None, Some("*.rs")).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].path.ends_with("main.rs"));
    }

    #[test]
    fn neither_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = search_files(dir.path(), None, None).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
