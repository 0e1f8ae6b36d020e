//! Atomic-rename file writes.
//!
//! Readers must never observe a partially written file, so every JSON
//! document is written to a `.tmp-<pid>` sibling and renamed into place.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use bc_domain::{Error, Result};

/// Write `value` as pretty JSON to `path` via a temp file + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_bytes_atomic(path, json.as_bytes())
}

/// Write raw bytes to `path` via a temp file + rename.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!(
        "{}tmp-{}",
        path.extension()
            .map(|e| format!("{}.", e.to_string_lossy()))
            .unwrap_or_default(),
        std::process::id()
    ));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON document. Returns `None` when the file does not exist;
/// a present-but-unparseable file is a [`Error::SessionCorrupt`]-class
/// problem the caller decides how to treat, surfaced as `Err`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let value = serde_json::from_str(&raw).map_err(|e| {
                Error::SessionCorrupt(format!("{}: {e}", path.display()))
            })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Append one JSON line to a log file. A single line stays below PIPE_BUF
/// for every record type we write, so concurrent appenders do not interleave.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "x".into(),
            count: 3,
        };
        write_json_atomic(&path, &doc).unwrap();
        let back: Doc = read_json(&path).unwrap().unwrap();
        assert_eq!(back, doc);
        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let result: Option<Doc> = read_json(&path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn read_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let result: Result<Option<Doc>> = read_json(&path);
        assert!(result.is_err());
    }

    #[test]
    fn jsonl_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        for i in 0..3 {
            append_jsonl(
                &path,
                &Doc {
                    name: "r".into(),
                    count: i,
                },
            )
            .unwrap();
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
    }
}
