//! Append-only token usage log.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bc_domain::Result;

use crate::atomic::append_jsonl;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub agent_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

/// Writer for `usage/usage.jsonl`.
#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn record(&self, agent_id: &str, model: &str, input_tokens: u64, output_tokens: u64) {
        let record = UsageRecord {
            agent_id: agent_id.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            timestamp: Utc::now(),
        };
        if let Err(e) = append_jsonl(&self.path, &record) {
            tracing::warn!(agent_id, error = %e, "usage append failed");
        }
    }

    pub fn read_all(&self) -> Result<Vec<UsageRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = UsageLog::new(dir.path().join("usage.jsonl"));
        log.record("main", "claude-sonnet", 120, 30);

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_id, "main");
        assert_eq!(records[0].input_tokens, 120);
        assert_eq!(records[0].output_tokens, 30);
    }
}
