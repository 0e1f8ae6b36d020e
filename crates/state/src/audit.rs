//! Append-only security audit log.
//!
//! One JSONL record per denied/blocked/rate-limited/elevated event, with
//! enough context to reconstruct the request.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bc_domain::Result;

use crate::atomic::append_jsonl;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
}

/// Writer for `logs/audit.jsonl`.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one event. Audit failures are logged, never propagated — the
    /// pipeline must not fail because the audit disk is unhappy.
    pub fn record(&self, event: &str, details: serde_json::Value) {
        let record = AuditRecord {
            event: event.to_string(),
            details,
            timestamp: Utc::now(),
            pid: std::process::id(),
        };
        if let Err(e) = append_jsonl(&self.path, &record) {
            tracing::warn!(event, error = %e, "audit append failed");
        }
    }

    /// Read back all records (CLI/debug surface).
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
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
