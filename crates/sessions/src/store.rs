//! The session store: locked appends, idle reset, token estimation,
//! history windows, and compactor rewrites over the JSONL logs.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use bc_domain::Result;
use bc_state::{read_json, write_json_atomic, StateLayout};

use crate::meta::SessionMeta;
use crate::transcript::{parse_log, SessionEntry};

/// File-backed session store. One instance per process; per-key writer
/// mutexes serialize appends so header creation and line writes never
/// interleave (turn-level exclusion is the queue engine's job).
pub struct SessionStore {
    layout: StateLayout,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(layout: StateLayout) -> Self {
        Self {
            layout,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    fn writer(&self, session_key: &str) -> Arc<Mutex<()>> {
        self.writers
            .lock()
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── Append path ───────────────────────────────────────────────

    /// Append one entry, creating the header (and sidecar metadata) on
    /// first write, and bump `updatedAt`.
    pub fn append(&self, session_key: &str, entry: SessionEntry) -> Result<()> {
        let writer = self.writer(session_key);
        let _guard = writer.lock();

        let path = self.layout.session_file(session_key);
        let mut lines = String::new();

        if !path.exists() {
            let meta = self.load_or_create_meta(session_key)?;
            let header = SessionEntry::header(&meta.session_id);
            lines.push_str(&serde_json::to_string(&header)?);
            lines.push('\n');
        }

        lines.push_str(&serde_json::to_string(&entry)?);
        lines.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(lines.as_bytes())?;

        self.update_meta(session_key, |m| m.touch())?;
        Ok(())
    }

    // ── Read path ─────────────────────────────────────────────────

    pub fn load(&self, session_key: &str) -> Result<Vec<SessionEntry>> {
        let path = self.layout.session_file(session_key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(parse_log(&raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// The last `n` non-header entries in append order.
    pub fn load_last(&self, session_key: &str, n: usize) -> Result<Vec<SessionEntry>> {
        let entries = self.load(session_key)?;
        let body: Vec<SessionEntry> =
            entries.into_iter().filter(|e| !e.is_header()).collect();
        let skip = body.len().saturating_sub(n);
        Ok(body.into_iter().skip(skip).collect())
    }

    /// Estimated token count: file size in chars / 4. Only used for
    /// compaction decisions, so precision does not matter.
    pub fn estimated_tokens(&self, session_key: &str) -> u64 {
        std::fs::metadata(self.layout.session_file(session_key))
            .map(|m| m.len() / 4)
            .unwrap_or(0)
    }

    pub fn exists(&self, session_key: &str) -> bool {
        self.layout.session_file(session_key).exists()
    }

    /// Number of session files on disk; 0 when the directory is absent.
    pub fn session_count(&self) -> usize {
        std::fs::read_dir(self.layout.sessions_dir())
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| {
                        e.file_name().to_string_lossy().ends_with(".jsonl")
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// File stems of all sessions (safe-key encoded).
    pub fn list(&self) -> Vec<String> {
        std::fs::read_dir(self.layout.sessions_dir())
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        name.strip_suffix(".jsonl").map(String::from)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Metadata ──────────────────────────────────────────────────

    pub fn load_or_create_meta(&self, session_key: &str) -> Result<SessionMeta> {
        let path = self.layout.session_meta_file(session_key);
        if let Some(meta) = read_json::<SessionMeta>(&path)? {
            return Ok(meta);
        }
        let meta = SessionMeta::new(uuid::Uuid::new_v4().to_string());
        write_json_atomic(&path, &meta)?;
        Ok(meta)
    }

    pub fn update_meta(
        &self,
        session_key: &str,
        f: impl FnOnce(&mut SessionMeta),
    ) -> Result<SessionMeta> {
        let path = self.layout.session_meta_file(session_key);
        let mut meta = self.load_or_create_meta(session_key)?;
        f(&mut meta);
        write_json_atomic(&path, &meta)?;
        Ok(meta)
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Whether the session's last record is older than the idle window.
    /// `idle_minutes == 0` disables idle reset.
    pub fn is_idle_expired(&self, session_key: &str, idle_minutes: u64) -> bool {
        if idle_minutes == 0 {
            return false;
        }
        let entries = match self.load(session_key) {
            Ok(e) if !e.is_empty() => e,
            _ => return false,
        };
        let last_ts = entries.last().map(|e| e.ts).unwrap_or(0);
        let age_ms = Utc::now().timestamp_millis().saturating_sub(last_ts);
        age_ms > (idle_minutes as i64) * 60_000
    }

    /// Remove the transcript and sidecar. The next append starts a fresh
    /// session with a new id.
    pub fn reset(&self, session_key: &str) -> Result<()> {
        let writer = self.writer(session_key);
        let _guard = writer.lock();
        for path in [
            self.layout.session_file(session_key),
            self.layout.session_meta_file(session_key),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // ── Compactor surface ─────────────────────────────────────────

    /// Replace the whole log (header + body) via atomic rename. The
    /// compactor is the only caller; `bump_compaction` distinguishes a
    /// compaction rewrite from a plain history prune.
    pub fn rewrite(
        &self,
        session_key: &str,
        entries: &[SessionEntry],
        bump_compaction: bool,
    ) -> Result<()> {
        let writer = self.writer(session_key);
        let _guard = writer.lock();

        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        bc_state::atomic::write_bytes_atomic(
            &self.layout.session_file(session_key),
            buf.as_bytes(),
        )?;

        drop(_guard);
        self.update_meta(session_key, |m| {
            if bump_compaction {
                m.compaction_count += 1;
            }
            m.touch();
        })?;
        Ok(())
    }

    /// Trim the body to the newest `max_history` entries, keeping the
    /// header. No-op when already within bounds.
    pub fn prune(&self, session_key: &str, max_history: usize) -> Result<()> {
        let entries = self.load(session_key)?;
        if entries.is_empty() {
            return Ok(());
        }
        let (header, body): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.is_header());
        if body.len() <= max_history {
            return Ok(());
        }
        let skip = body.len() - max_history;
        let mut kept: Vec<SessionEntry> = Vec::with_capacity(max_history + 1);
        kept.extend(header.into_iter().take(1));
        kept.extend(body.into_iter().skip(skip));
        self.rewrite(session_key, &kept, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{validate_entries, EntryRole};

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path()).unwrap();
        (dir, SessionStore::new(layout))
    }

    #[test]
    fn first_append_writes_header() {
        let (_dir, store) = store();
        store
            .append("agent:main:cli:direct:me", SessionEntry::message(EntryRole::User, "hi"))
            .unwrap();

        let entries = store.load("agent:main:cli:direct:me").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_header());
        validate_entries(&entries).unwrap();
    }

    #[test]
    fn load_last_returns_tail_in_order() {
        let (_dir, store) = store();
        let key = "agent:main:cli:direct:me";
        for i in 0..5 {
            store
                .append(key, SessionEntry::message(EntryRole::User, format!("m{i}")))
                .unwrap();
        }
        let last = store.load_last(key, 2).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].message_text(), Some("m3"));
        assert_eq!(last[1].message_text(), Some("m4"));
    }

    #[test]
    fn session_count_zero_without_dir_entries() {
        let (_dir, store) = store();
        assert_eq!(store.session_count(), 0);
        store
            .append("k1", SessionEntry::message(EntryRole::User, "x"))
            .unwrap();
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn estimated_tokens_tracks_file_size() {
        let (_dir, store) = store();
        assert_eq!(store.estimated_tokens("nope"), 0);
        store
            .append("k1", SessionEntry::message(EntryRole::User, "a".repeat(400)))
            .unwrap();
        assert!(store.estimated_tokens("k1") >= 100);
    }

    #[test]
    fn reset_removes_log_and_meta() {
        let (_dir, store) = store();
        store
            .append("k1", SessionEntry::message(EntryRole::User, "x"))
            .unwrap();
        let old_id = store.load_or_create_meta("k1").unwrap().session_id;

        store.reset("k1").unwrap();
        assert!(!store.exists("k1"));

        // A new append mints a new session id.
        store
            .append("k1", SessionEntry::message(EntryRole::User, "y"))
            .unwrap();
        let new_id = store.load_or_create_meta("k1").unwrap().session_id;
        assert_ne!(old_id, new_id);
    }

    #[test]
    fn rewrite_bumps_compaction_count() {
        let (_dir, store) = store();
        let key = "k1";
        store
            .append(key, SessionEntry::message(EntryRole::User, "x"))
            .unwrap();
        let entries = store.load(key).unwrap();

        store.rewrite(key, &entries, true).unwrap();
        store.rewrite(key, &entries, true).unwrap();
        let meta = store.load_or_create_meta(key).unwrap();
        assert_eq!(meta.compaction_count, 2);
    }

    #[test]
    fn prune_keeps_header_and_tail() {
        let (_dir, store) = store();
        let key = "k1";
        for i in 0..10 {
            store
                .append(key, SessionEntry::message(EntryRole::User, format!("m{i}")))
                .unwrap();
        }
        store.prune(key, 3).unwrap();

        let entries = store.load(key).unwrap();
        assert_eq!(entries.len(), 4); // header + 3
        assert!(entries[0].is_header());
        assert_eq!(entries[1].message_text(), Some("m7"));
        // A prune is not a compaction.
        assert_eq!(store.load_or_create_meta(key).unwrap().compaction_count, 0);
    }

    #[test]
    fn idle_expiry_disabled_at_zero() {
        let (_dir, store) = store();
        store
            .append("k1", SessionEntry::message(EntryRole::User, "x"))
            .unwrap();
        assert!(!store.is_idle_expired("k1", 0));
        // Fresh session is never expired for a generous window.
        assert!(!store.is_idle_expired("k1", 60));
    }
}
