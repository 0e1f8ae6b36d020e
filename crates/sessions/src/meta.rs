//! Sidecar session metadata.
//!
//! Lives next to each transcript as `<name>.meta.json` and stays consistent
//! with the log: `compactionCount` increments exactly once per compactor
//! rewrite and never decreases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bc_domain::config::QueueMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session_id: String,
    pub updated_at: DateTime<Utc>,
    pub total_tokens: u64,
    pub compaction_count: u64,
    /// `compactionCount` at which the last pre-compaction memory flush ran.
    pub memory_flush_compaction_count: Option<u64>,
    pub queue_mode: QueueMode,
}

impl SessionMeta {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            updated_at: Utc::now(),
            total_tokens: 0,
            compaction_count: 0,
            memory_flush_compaction_count: None,
            queue_mode: QueueMode::default(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether the pre-compaction memory flush already ran at the current
    /// compaction generation.
    pub fn flushed_at_current_generation(&self) -> bool {
        self.memory_flush_compaction_count == Some(self.compaction_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_generation_tracking() {
        let mut meta = SessionMeta::new("s1");
        assert!(!meta.flushed_at_current_generation());

        meta.memory_flush_compaction_count = Some(0);
        assert!(meta.flushed_at_current_generation());

        meta.compaction_count += 1;
        assert!(!meta.flushed_at_current_generation());
    }

    #[test]
    fn camel_case_field_names() {
        let meta = SessionMeta::new("s1");
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"compactionCount\""));
        assert!(json.contains("\"queueMode\""));
    }
}
