//! The dual-layer queue engine.
//!
//! Layer 1 serializes turns per session key through a PID sentinel lock
//! file. Layer 2 bounds global parallelism per lane type through slot
//! files under `queue/global_lanes/<lane>/`. Pending messages and abort
//! markers implement the five queue modes for messages arriving while a
//! session's turn is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use bc_domain::config::{LaneConfig, LaneType, QueueMode};
use bc_domain::{Error, Result};
use bc_state::{read_json, write_json_atomic, FileLock, LockOptions, StateLayout};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message waiting for the session's current turn to finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub message: String,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<QueueMode>,
}

/// Content of a lane slot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LaneSlotRecord {
    lane_type: LaneType,
    pid: u32,
    started_at_ms: i64,
}

/// Outcome of [`QueueEngine::handle_busy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyOutcome {
    Queued,
    Collected,
    Interrupted,
}

/// A held lane slot; removes its file on drop.
pub struct LaneSlot {
    path: std::path::PathBuf,
}

impl Drop for LaneSlot {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e,
                    "failed to release lane slot");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct QueueEngine {
    layout: StateLayout,
    lanes: parking_lot::RwLock<LaneConfig>,
    /// Serializes lane count-then-create and pending read-modify-write.
    lane_guard: Mutex<()>,
    pending_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QueueEngine {
    pub fn new(layout: StateLayout, lanes: LaneConfig) -> Self {
        Self {
            layout,
            lanes: parking_lot::RwLock::new(lanes),
            lane_guard: Mutex::new(()),
            pending_guards: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh lane caps after a config reload.
    pub fn set_lanes(&self, lanes: LaneConfig) {
        *self.lanes.write() = lanes;
    }

    fn pending_guard(&self, session_key: &str) -> Arc<Mutex<()>> {
        self.pending_guards
            .lock()
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── Layer 1: session lock ─────────────────────────────────────

    /// True when a turn currently holds the session lock (dead holders
    /// do not count).
    pub fn is_busy(&self, session_key: &str) -> bool {
        let path = self.layout.session_lock_file(session_key);
        match FileLock::holder_pid(&path) {
            Some(pid) => bc_state::lock::pid_alive(pid),
            None => false,
        }
    }

    // ── Layer 2: lanes ────────────────────────────────────────────

    /// Count slot files with live holder PIDs.
    fn live_slots(&self, lane: LaneType) -> usize {
        let dir = self.layout.lane_dir(lane.as_str());
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                read_json::<LaneSlotRecord>(&e.path())
                    .ok()
                    .flatten()
                    .map(|slot| bc_state::lock::pid_alive(slot.pid))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Acquire a lane slot, waiting for capacity. Nested is unbounded and
    /// takes no slot file.
    async fn acquire_lane(&self, lane: LaneType) -> Result<Option<LaneSlot>> {
        let Some(cap) = self.lanes.read().max_concurrent_for(lane) else {
            return Ok(None);
        };

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(300);
        loop {
            {
                let _guard = self.lane_guard.lock();
                if self.live_slots(lane) < cap {
                    let path = self
                        .layout
                        .lane_dir(lane.as_str())
                        .join(format!("{}.slot", uuid::Uuid::new_v4()));
                    write_json_atomic(
                        &path,
                        &LaneSlotRecord {
                            lane_type: lane,
                            pid: std::process::id(),
                            started_at_ms: Utc::now().timestamp_millis(),
                        },
                    )?;
                    return Ok(Some(LaneSlot { path }));
                }
            }
            if std::time::Instant::now() >= deadline {
                return Err(Error::QueueTimeout(format!(
                    "lane {lane} at capacity for 300s"
                )));
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    /// How many live slots each lane holds (status surface).
    pub fn lane_occupancy(&self) -> HashMap<String, usize> {
        [LaneType::Main, LaneType::Cron, LaneType::Subagent]
            .into_iter()
            .map(|lane| (lane.as_str().to_string(), self.live_slots(lane)))
            .collect()
    }

    /// Release lane slots older than `older_than_ms` (stuck-run reap).
    pub fn reap_stuck_slots(&self, older_than_ms: u64) -> usize {
        let now = Utc::now().timestamp_millis();
        let mut reaped = 0;
        for lane in [LaneType::Main, LaneType::Cron, LaneType::Subagent] {
            let dir = self.layout.lane_dir(lane.as_str());
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let Ok(Some(slot)) = read_json::<LaneSlotRecord>(&entry.path()) else {
                    continue;
                };
                let age = now.saturating_sub(slot.started_at_ms) as u64;
                if age > older_than_ms || !bc_state::lock::pid_alive(slot.pid) {
                    if std::fs::remove_file(entry.path()).is_ok() {
                        tracing::warn!(lane = %lane, age_ms = age, "reaped stuck lane slot");
                        reaped += 1;
                    }
                }
            }
        }
        reaped
    }

    // ── Canonical entry point ─────────────────────────────────────

    /// Acquire the session lock, then a lane slot, run the callback, and
    /// release both in reverse order (drop order guarantees release on
    /// error and panic-unwind alike).
    pub async fn dual_enqueue<T, F, Fut>(
        &self,
        session_key: &str,
        lane: LaneType,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let lock_path = self.layout.session_lock_file(session_key);
        let session_lock = FileLock::acquire(&lock_path, LockOptions::default()).await?;
        let lane_slot = self.acquire_lane(lane).await?;

        let result = f().await;

        drop(lane_slot);
        session_lock.release();
        result
    }

    // ── Queue modes ───────────────────────────────────────────────

    /// Handle a message arriving while the session is busy.
    pub fn handle_busy(
        &self,
        session_key: &str,
        message: &str,
        mode: QueueMode,
    ) -> Result<BusyOutcome> {
        match mode.effective() {
            QueueMode::Followup => {
                self.push_pending(session_key, message, None)?;
                Ok(BusyOutcome::Queued)
            }
            QueueMode::Collect => {
                self.push_pending(session_key, message, Some(QueueMode::Collect))?;
                Ok(BusyOutcome::Collected)
            }
            QueueMode::Interrupt => {
                let guard = self.pending_guard(session_key);
                let _held = guard.lock();
                // Abort the in-flight turn, drop its backlog, keep only the
                // interrupting message.
                std::fs::write(self.layout.abort_file(session_key), b"1")?;
                let pending = vec![PendingMessage {
                    message: message.to_string(),
                    ts: Utc::now().timestamp_millis(),
                    mode: Some(QueueMode::Interrupt),
                }];
                write_json_atomic(&self.layout.pending_file(session_key), &pending)?;
                Ok(BusyOutcome::Interrupted)
            }
            QueueMode::Steer | QueueMode::SteerBacklog => unreachable!("effective() folds these"),
        }
    }

    fn push_pending(
        &self,
        session_key: &str,
        message: &str,
        mode: Option<QueueMode>,
    ) -> Result<()> {
        let guard = self.pending_guard(session_key);
        let _held = guard.lock();
        let path = self.layout.pending_file(session_key);
        let mut pending: Vec<PendingMessage> = read_json(&path)?.unwrap_or_default();
        pending.push(PendingMessage {
            message: message.to_string(),
            ts: Utc::now().timestamp_millis(),
            mode,
        });
        write_json_atomic(&path, &pending)
    }

    /// Take and clear the followup backlog. Collect-tagged entries are
    /// left in place — only the debounce flush consumes those, so the
    /// two drain paths never race for the same entries. An absent file
    /// drains to `[]`.
    pub fn drain_pending(&self, session_key: &str) -> Result<Vec<PendingMessage>> {
        self.drain_filtered(session_key, false)
    }

    /// Take and clear only the collect-tagged backlog.
    pub fn drain_collected(&self, session_key: &str) -> Result<Vec<PendingMessage>> {
        self.drain_filtered(session_key, true)
    }

    fn drain_filtered(&self, session_key: &str, collect: bool) -> Result<Vec<PendingMessage>> {
        let guard = self.pending_guard(session_key);
        let _held = guard.lock();
        let path = self.layout.pending_file(session_key);
        let pending: Vec<PendingMessage> = read_json(&path)?.unwrap_or_default();

        let (drained, kept): (Vec<PendingMessage>, Vec<PendingMessage>) = pending
            .into_iter()
            .partition(|p| (p.mode == Some(QueueMode::Collect)) == collect);

        if kept.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            write_json_atomic(&path, &kept)?;
        }
        Ok(drained)
    }

    /// Followup entries awaiting the next turn (collect-tagged entries
    /// are not counted; the debounce flush owns those).
    pub fn pending_count(&self, session_key: &str) -> usize {
        read_json::<Vec<PendingMessage>>(&self.layout.pending_file(session_key))
            .ok()
            .flatten()
            .map(|p| {
                p.iter()
                    .filter(|m| m.mode != Some(QueueMode::Collect))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Consume the abort marker. Returns `true` exactly once per marker.
    pub fn check_abort(&self, session_key: &str) -> bool {
        match std::fs::remove_file(self.layout.abort_file(session_key)) {
            Ok(()) => true,
            Err(_) => false,
        }
    }
}
