//! The fixed directory tree beneath the state root.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use bc_domain::Result;

/// Typed path resolution over the state root. All components resolve their
/// file locations through this — nothing builds state paths by hand.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    /// Open (and create) the state tree at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let layout = Self { root: root.into() };
        for dir in [
            layout.sessions_dir(),
            layout.memory_dir(),
            layout.session_locks_dir(),
            layout.lanes_root(),
            layout.pending_dir(),
            layout.abort_dir(),
            layout.queue_meta_dir(),
            layout.cron_dir(),
            layout.cron_runs_dir(),
            layout.logs_dir(),
            layout.usage_dir(),
            layout.pairing_dir(),
            layout.pairing_verified_dir(),
            layout.ratelimit_dir(),
            layout.events_dir(),
            layout.spawn_dir(),
            layout.approvals_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(layout)
    }

    /// The default root: `~/.bashclaw`, or `./.bashclaw` without a home dir.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bashclaw")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Fixed tree ────────────────────────────────────────────────

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn session_locks_dir(&self) -> PathBuf {
        self.root.join("queue").join("session_locks")
    }

    pub fn lanes_root(&self) -> PathBuf {
        self.root.join("queue").join("global_lanes")
    }

    pub fn lane_dir(&self, lane: &str) -> PathBuf {
        self.lanes_root().join(lane)
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.root.join("queue").join("pending")
    }

    pub fn abort_dir(&self) -> PathBuf {
        self.root.join("queue").join("abort")
    }

    pub fn queue_meta_dir(&self) -> PathBuf {
        self.root.join("queue").join("meta")
    }

    pub fn cron_dir(&self) -> PathBuf {
        self.root.join("cron")
    }

    pub fn cron_jobs_file(&self) -> PathBuf {
        self.cron_dir().join("jobs.json")
    }

    pub fn cron_runs_dir(&self) -> PathBuf {
        self.cron_dir().join("runs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn audit_log_file(&self) -> PathBuf {
        self.logs_dir().join("audit.jsonl")
    }

    pub fn usage_dir(&self) -> PathBuf {
        self.root.join("usage")
    }

    pub fn usage_log_file(&self) -> PathBuf {
        self.usage_dir().join("usage.jsonl")
    }

    pub fn pairing_dir(&self) -> PathBuf {
        self.root.join("pairing")
    }

    pub fn pairing_verified_dir(&self) -> PathBuf {
        self.pairing_dir().join("verified")
    }

    pub fn ratelimit_dir(&self) -> PathBuf {
        self.root.join("ratelimit")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn spawn_dir(&self) -> PathBuf {
        self.root.join("spawn")
    }

    pub fn approvals_dir(&self) -> PathBuf {
        self.root.join("approvals")
    }

    // ── Derived paths ─────────────────────────────────────────────

    /// Session transcript path for a session key.
    pub fn session_file(&self, session_key: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.jsonl", safe_key(session_key)))
    }

    /// Sidecar metadata path for a session key.
    pub fn session_meta_file(&self, session_key: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}.meta.json", safe_key(session_key)))
    }

    pub fn session_lock_file(&self, session_key: &str) -> PathBuf {
        self.session_locks_dir()
            .join(format!("{}.lock", safe_key(session_key)))
    }

    pub fn pending_file(&self, session_key: &str) -> PathBuf {
        self.pending_dir()
            .join(format!("{}.json", safe_key(session_key)))
    }

    pub fn abort_file(&self, session_key: &str) -> PathBuf {
        self.abort_dir()
            .join(format!("{}.abort", safe_key(session_key)))
    }

    pub fn memory_file(&self, key: &str) -> PathBuf {
        self.memory_dir().join(format!("{}.json", safe_key(key)))
    }

    pub fn spawn_file(&self, spawn_id: &str) -> PathBuf {
        self.spawn_dir().join(format!("{spawn_id}.json"))
    }

    pub fn approval_file(&self, session_key: &str, tool: &str) -> PathBuf {
        self.approvals_dir()
            .join(format!("{}.{}", safe_key(session_key), safe_key(tool)))
    }

    pub fn ratelimit_file(&self, sender_key: &str) -> PathBuf {
        self.ratelimit_dir()
            .join(format!("{}.json", safe_key(sender_key)))
    }

    pub fn cron_run_log(&self, job_id: &str) -> PathBuf {
        self.cron_runs_dir().join(format!("{}.jsonl", safe_key(job_id)))
    }
}

/// Encode an arbitrary key into a filesystem-safe name. Plain
/// `[A-Za-z0-9._-]` keys pass through; anything else keeps a readable
/// prefix and appends a short content hash so distinct keys never collide.
pub fn safe_key(key: &str) -> String {
    let clean: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean == key {
        return clean;
    }

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hex::encode(&hasher.finalize()[..6]);
    let prefix: String = clean.chars().take(80).collect();
    format!("{prefix}-{digest}")
}
