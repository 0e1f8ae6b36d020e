//! The shared runtime value constructed once at startup and passed down to
//! every component: config handle, state layout, stores, queue engine,
//! hook registry, and admission caches. Copy-on-reload config semantics —
//! callers take a snapshot per operation and see a consistent view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use bc_domain::Result;
use bc_memory::MemoryStore;
use bc_providers::{ModelCatalog, ProviderRegistry};
use bc_sessions::SessionStore;
use bc_state::{AuditLog, StateLayout, UsageLog};

use crate::config::{ConfigHandle, MODELS_FILE};
use crate::hooks::HookRegistry;
use crate::routing::admission::AdmissionState;
use crate::runtime::events::EventQueues;
use crate::runtime::queue::QueueEngine;
use crate::scheduler::jobs::JobStore;

/// Cooperative shutdown signal shared by the server, scheduler, and
/// signal handlers.
pub struct ShutdownSignal {
    notify: Notify,
    flag: AtomicBool,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self {
            notify: Notify::new(),
            flag: AtomicBool::new(false),
        }
    }
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<ConfigHandle>,
    pub layout: StateLayout,
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<MemoryStore>,
    pub providers: Arc<ProviderRegistry>,
    pub queue: Arc<QueueEngine>,
    pub hooks: Arc<HookRegistry>,
    pub events: Arc<EventQueues>,
    pub jobs: Arc<JobStore>,
    pub audit: AuditLog,
    pub usage: UsageLog,
    pub admission: Arc<AdmissionState>,
    pub started_at: DateTime<Utc>,
    pub shutdown: Arc<ShutdownSignal>,
}

impl Runtime {
    /// Build the runtime from a loaded config handle. The state root comes
    /// from `gateway.stateDir`, falling back to `~/.bashclaw`.
    pub fn new(config: Arc<ConfigHandle>) -> Result<Self> {
        let root = config
            .snapshot()
            .gateway
            .state_dir
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(StateLayout::default_root);
        Self::with_root(config, &root)
    }

    /// Build a runtime rooted at an explicit directory (tests, CLI with
    /// `BASHCLAW_STATE_DIR`).
    pub fn with_root(config: Arc<ConfigHandle>, root: &std::path::Path) -> Result<Self> {
        let layout = StateLayout::new(root)?;
        let snapshot = config.snapshot();
        let catalog = ModelCatalog::load(&layout.root().join(MODELS_FILE))?;
        let queue = Arc::new(QueueEngine::new(layout.clone(), snapshot.lanes.clone()));

        Ok(Self {
            sessions: Arc::new(SessionStore::new(layout.clone())),
            memory: Arc::new(MemoryStore::new(layout.clone())),
            providers: Arc::new(ProviderRegistry::new(catalog)),
            hooks: Arc::new(HookRegistry::new(&layout)),
            events: Arc::new(EventQueues::new(layout.clone())),
            jobs: Arc::new(JobStore::new(layout.clone())),
            audit: AuditLog::new(layout.audit_log_file()),
            usage: UsageLog::new(layout.usage_log_file()),
            admission: Arc::new(AdmissionState::default()),
            queue,
            layout,
            config,
            started_at: Utc::now(),
            shutdown: Arc::new(ShutdownSignal::default()),
        })
    }

    /// Propagate config changes that components cache (lane caps).
    pub fn apply_config(&self) {
        let snapshot = self.config.snapshot();
        self.queue.set_lanes(snapshot.lanes.clone());
    }

    /// Remember the agent's most recent conversation session so background
    /// producers (cron main-target, spawn results) know where to inject
    /// events.
    pub fn note_active_session(&self, agent_id: &str, session_key: &str) {
        let path = self
            .layout
            .queue_meta_dir()
            .join(format!("active_{}.json", bc_state::safe_key(agent_id)));
        if let Err(e) =
            bc_state::write_json_atomic(&path, &serde_json::json!({"sessionKey": session_key}))
        {
            tracing::debug!(agent_id, error = %e, "failed to note active session");
        }
    }

    /// The agent's last conversation session key, if any turn ran yet.
    pub fn last_active_session(&self, agent_id: &str) -> Option<String> {
        let path = self
            .layout
            .queue_meta_dir()
            .join(format!("active_{}.json", bc_state::safe_key(agent_id)));
        bc_state::read_json::<serde_json::Value>(&path)
            .ok()
            .flatten()
            .and_then(|v| {
                v.get("sessionKey")
                    .and_then(|s| s.as_str())
                    .map(String::from)
            })
    }
}
