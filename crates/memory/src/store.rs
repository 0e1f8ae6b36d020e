//! File-per-key memory store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bc_domain::Result;
use bc_state::{read_json, write_json_atomic, StateLayout};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

/// KV memory over `memory/<safekey>.json` files.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    layout: StateLayout,
}

impl MemoryStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// Store a value, replacing any existing entry for the key but keeping
    /// its creation time and access counter.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        tags: Vec<String>,
        source: Option<String>,
    ) -> Result<MemoryEntry> {
        let now = Utc::now();
        let existing = read_json::<MemoryEntry>(&self.layout.memory_file(key))?;
        let entry = MemoryEntry {
            key: key.to_string(),
            value: value.to_string(),
            tags,
            source,
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
            access_count: existing.map(|e| e.access_count).unwrap_or(0),
        };
        write_json_atomic(&self.layout.memory_file(key), &entry)?;
        Ok(entry)
    }

    /// Fetch an entry, bumping its access counter.
    pub fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let path = self.layout.memory_file(key);
        let Some(mut entry) = read_json::<MemoryEntry>(&path)? else {
            return Ok(None);
        };
        entry.access_count += 1;
        // Counter bump is best-effort; the read result matters more.
        if let Err(e) = write_json_atomic(&path, &entry) {
            tracing::debug!(key, error = %e, "access counter update failed");
        }
        Ok(Some(entry))
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        match std::fs::remove_file(self.layout.memory_file(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All entries, unordered.
    pub fn list(&self) -> Result<Vec<MemoryEntry>> {
        let mut entries = Vec::new();
        let dir = match std::fs::read_dir(self.layout.memory_dir()) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        for item in dir.filter_map(|e| e.ok()) {
            if item.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<MemoryEntry>(&item.path()) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %item.path().display(), error = %e,
                        "skipping unreadable memory entry");
                }
            }
        }
        Ok(entries)
    }
}
