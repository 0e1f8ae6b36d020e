//! File tools: read, write, list, search — with traversal rejection and
//! optional workspace-root confinement.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use bc_domain::{Error, Result};

pub const MAX_READ_LINES: usize = 2000;
pub const DEFAULT_SEARCH_RESULTS: usize = 50;

/// Resolve a tool-supplied path: reject `..` traversal, and when a
/// workspace root is set, confine relative paths beneath it and reject
/// absolute paths escaping it.
pub fn resolve_path(workspace: Option<&Path>, raw: &str) -> Result<PathBuf> {
    let candidate = Path::new(raw);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::ToolBlocked("path traversal ('..') rejected".into()));
    }

    match workspace {
        Some(root) => {
            let joined = if candidate.is_absolute() {
                if !candidate.starts_with(root) {
                    return Err(Error::ToolBlocked(format!(
                        "path escapes workspace root {}",
                        root.display()
                    )));
                }
                candidate.to_path_buf()
            } else {
                root.join(candidate)
            };
            Ok(joined)
        }
        None => Ok(candidate.to_path_buf()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file / write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
pub struct ReadResult {
    pub content: String,
    pub total_lines: usize,
    pub offset: usize,
    pub returned_lines: usize,
}

/// Read lines `[offset, offset+limit)` (1-based offset, limit capped).
pub fn read_file(workspace: Option<&Path>, raw: &str, offset: usize, limit: usize) -> Result<ReadResult> {
    let path = resolve_path(workspace, raw)?;
    let raw_text = std::fs::read_to_string(&path)
        .map_err(|e| Error::ToolValidation(format!("{}: {e}", path.display())))?;

    let offset = offset.max(1);
    let limit = limit.clamp(1, MAX_READ_LINES);
    let all: Vec<&str> = raw_text.lines().collect();
    let slice: Vec<&str> = all
        .iter()
        .skip(offset - 1)
        .take(limit)
        .copied()
        .collect();

    Ok(ReadResult {
        content: slice.join("\n"),
        total_lines: all.len(),
        offset,
        returned_lines: slice.len(),
    })
}

/// Write or append, creating parent directories.
pub fn write_file(workspace: Option<&Path>, raw: &str, content: &str, append: bool) -> Result<u64> {
    let path = resolve_path(workspace, raw)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if append {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(content.as_bytes())?;
    } else {
        std::fs::write(&path, content)?;
    }
    Ok(content.len() as u64)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_files / file_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

pub fn list_files(
    workspace: Option<&Path>,
    raw: &str,
    pattern: Option<&str>,
    recursive: bool,
) -> Result<Vec<FileEntry>> {
    let root = resolve_path(workspace, raw)?;
    let mut out = Vec::new();
    collect_entries(&root, pattern, recursive, 0, &mut out)?;
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

const MAX_DEPTH: usize = 16;

fn collect_entries(
    dir: &Path,
    pattern: Option<&str>,
    recursive: bool,
    depth: usize,
    out: &mut Vec<FileEntry>,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::ToolValidation(format!("{}: {e}", dir.display())))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = path.is_dir();
        let matches = pattern
            .map(|p| name.to_lowercase().contains(&p.to_lowercase()))
            .unwrap_or(true);
        if matches {
            out.push(FileEntry {
                path: path.display().to_string(),
                is_dir,
                size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            });
        }
        if is_dir && recursive {
            // Ignore unreadable subdirectories rather than failing the walk.
            let _ = collect_entries(&path, pattern, recursive, depth + 1, out);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Search by file name and/or content substring beneath a directory.
pub fn file_search(
    workspace: Option<&Path>,
    raw: &str,
    name: Option<&str>,
    content: Option<&str>,
    max_results: usize,
) -> Result<Vec<SearchMatch>> {
    let root = resolve_path(workspace, raw)?;
    let max_results = if max_results == 0 {
        DEFAULT_SEARCH_RESULTS
    } else {
        max_results
    };

    let mut files = Vec::new();
    collect_entries(&root, None, true, 0, &mut files)?;

    let mut matches = Vec::new();
    for entry in files.into_iter().filter(|e| !e.is_dir) {
        if matches.len() >= max_results {
            break;
        }
        let file_name = Path::new(&entry.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if let Some(name_pat) = name {
            if !file_name.contains(&name_pat.to_lowercase()) {
                continue;
            }
        }

        match content {
            Some(needle) => {
                let Ok(text) = std::fs::read_to_string(&entry.path) else {
                    continue;
                };
                let needle_lower = needle.to_lowercase();
                if let Some((idx, line)) = text
                    .lines()
                    .enumerate()
                    .find(|(_, l)| l.to_lowercase().contains(&needle_lower))
                {
                    matches.push(SearchMatch {
                        path: entry.path,
                        line: Some(idx + 1),
                        snippet: Some(line.chars().take(200).collect()),
                    });
                }
            }
            None => matches.push(SearchMatch {
                path: entry.path,
                line: None,
                snippet: None,
            }),
        }
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_rejected() {
        let err = resolve_path(None, "../etc/passwd").unwrap_err();
        assert!(matches!(err, Error::ToolBlocked(_)));
        let err = resolve_path(None, "a/b/../../../x").unwrap_err();
        assert!(matches!(err, Error::ToolBlocked(_)));
    }

    #[test]
    fn workspace_confines_relative_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path();

        let ok = resolve_path(Some(ws), "notes.md").unwrap();
        assert!(ok.starts_with(ws));

        let inside = ws.join("sub/file.txt");
        let ok = resolve_path(Some(ws), inside.to_str().unwrap()).unwrap();
        assert_eq!(ok, inside);

        let err = resolve_path(Some(ws), "/etc/passwd").unwrap_err();
        assert!(matches!(err, Error::ToolBlocked(_)));
    }

    #[test]
    fn read_respects_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "l1\nl2\nl3\nl4\nl5\n").unwrap();

        let result = read_file(None, path.to_str().unwrap(), 2, 2).unwrap();
        assert_eq!(result.content, "l2\nl3");
        assert_eq!(result.total_lines, 5);
        assert_eq!(result.returned_lines, 2);
    }

    #[test]
    fn write_creates_parents_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/f.txt");
        let raw = path.to_str().unwrap();

        write_file(None, raw, "one\n", false).unwrap();
        write_file(None, raw, "two\n", true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn list_filters_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alpha.rs"), "").unwrap();
        std::fs::write(dir.path().join("beta.md"), "").unwrap();

        let entries = list_files(None, dir.path().to_str().unwrap(), Some(".rs"), false).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("alpha.rs"));
    }

    #[test]
    fn content_search_reports_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "first\nneedle here\nlast\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "nothing\n").unwrap();

        let matches = file_search(
            None,
            dir.path().to_str().unwrap(),
            None,
            Some("NEEDLE"),
            10,
        )
        .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line, Some(2));
    }
}
