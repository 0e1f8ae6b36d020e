//! The scheduler loop.
//!
//! Wakes every 10 s: reaps stuck lane slots, periodically deletes expired
//! isolated cron sessions, evaluates due jobs (honoring backoff), and —
//! when the cron lane has capacity — runs them. `main`-target jobs are
//! injected into the agent's event queue; `isolated` jobs run a full
//! agent turn under a fresh `cron:` session key with a hard timeout.

pub mod cron;
pub mod jobs;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use bc_domain::config::LaneType;
use bc_sessions::key::{compute_session_key, system_session_key, KeyParts, SessionType};

/// Where main-target jobs inject events: the agent's most recent
/// conversation session, else the scope-derived fallback key.
fn main_session_key(
    rt: &crate::state::Runtime,
    agent_id: &str,
    config: &bc_domain::config::Config,
) -> String {
    rt.last_active_session(agent_id).unwrap_or_else(|| {
        compute_session_key(
            agent_id,
            config.session.dm_scope,
            &KeyParts {
                channel: "cron",
                peer: "scheduler",
                account_id: None,
            },
        )
    })
}

use crate::runtime::turn::{run_turn, TurnRequest};
use crate::state::Runtime;

use jobs::{CronJob, SessionTarget};

const TICK_SECS: u64 = 10;
const SESSION_REAP_EVERY_SECS: u64 = 300;

/// Run the scheduler until shutdown.
pub async fn run_scheduler(rt: Runtime) {
    tracing::info!("scheduler started");
    let mut last_session_reap = std::time::Instant::now();
    // Jobs whose previous run is still executing; never double-fired.
    let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    loop {
        tokio::select! {
            _ = rt.shutdown.wait() => {
                tracing::info!("scheduler stopping");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(TICK_SECS)) => {}
        }

        let config = rt.config.snapshot();

        // Stuck-run reap.
        rt.queue.reap_stuck_slots(config.cron.stuck_run_ms);

        // Expired isolated cron sessions.
        if last_session_reap.elapsed().as_secs() >= SESSION_REAP_EVERY_SECS {
            last_session_reap = std::time::Instant::now();
            reap_cron_sessions(&rt, config.cron.session_retention_ms);
        }

        // Due jobs.
        let jobs = match rt.jobs.list() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "cron store read failed");
                continue;
            }
        };
        let now = Utc::now();
        for job in jobs {
            if !job.is_due(&now, &config.cron.timezone) {
                continue;
            }
            if !in_flight.lock().insert(job.id.clone()) {
                continue;
            }
            // The cron lane bounds concurrent runs; skip the tick when full.
            let occupancy = rt.queue.lane_occupancy();
            let cap = config.lanes.cron;
            if occupancy.get("cron").copied().unwrap_or(0) >= cap {
                tracing::debug!(job_id = %job.id, "cron lane full, deferring");
                in_flight.lock().remove(&job.id);
                continue;
            }
            spawn_job_run(&rt, job, in_flight.clone());
        }
    }
}

/// Delete session files under `sessions/` whose key marks them as cron
/// runs and whose mtime exceeded the retention window.
fn reap_cron_sessions(rt: &Runtime, retention_ms: u64) {
    let dir = rt.layout.sessions_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return;
    };
    let now = std::time::SystemTime::now();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.contains("_cron_") && name.contains("_run_")) {
            continue;
        }
        let age_ms = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| now.duration_since(t).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        if age_ms > retention_ms {
            tracing::info!(session = %name, "reaping expired cron session");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

fn spawn_job_run(rt: &Runtime, job: CronJob, in_flight: Arc<Mutex<HashSet<String>>>) {
    let rt = rt.clone();
    tokio::spawn(async move {
        let started_at = Utc::now();
        let config = rt.config.snapshot();
        let agent_id = job
            .agent_id
            .clone()
            .unwrap_or_else(|| config.agents.default_id().to_string());

        let (success, output) = match job.session_target {
            SessionTarget::Main => {
                // Inject the prompt as a system event; the agent drains it
                // on its next turn.
                let main_key = main_session_key(&rt, &agent_id, &config);
                match rt
                    .events
                    .enqueue(&main_key, &format!("[cron:{}] {}", job.id, job.prompt))
                {
                    Ok(()) => (true, "queued to main session".to_string()),
                    Err(e) => (false, e.to_string()),
                }
            }
            SessionTarget::Isolated => {
                let session_key = system_session_key(
                    &agent_id,
                    SessionType::Cron,
                    &format!("{}:run:{}", job.id, uuid::Uuid::new_v4()),
                );
                let timeout = std::time::Duration::from_millis(config.cron.job_timeout_ms);
                let rt2 = rt.clone();
                let key2 = session_key.clone();
                let agent2 = agent_id.clone();
                let prompt = job.prompt.clone();

                let run = rt.queue.dual_enqueue(&session_key, LaneType::Cron, move || {
                    let rt = rt2.clone();
                    async move {
                        match tokio::time::timeout(
                            timeout,
                            run_turn(
                                &rt,
                                TurnRequest {
                                    agent_id: agent2,
                                    session_key: key2,
                                    message: Some(prompt),
                                    channel: "cron".into(),
                                    is_subagent: false,
                                },
                            ),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(bc_domain::Error::ToolTimeout(
                                "cron job exceeded its timeout".into(),
                            )),
                        }
                    }
                });

                match run.await {
                    Ok(text) => {
                        if job.deliver {
                            let main_key = main_session_key(&rt, &agent_id, &config);
                            let note = format!(
                                "[cron:{}] result: {}",
                                job.id,
                                text.chars().take(500).collect::<String>()
                            );
                            if let Err(e) = rt.events.enqueue(&main_key, &note) {
                                tracing::warn!(job_id = %job.id, error = %e,
                                    "cron result delivery failed");
                            }
                        }
                        (true, text)
                    }
                    Err(e) => (false, e.to_string()),
                }
            }
        };

        if let Err(e) = rt.jobs.record_run(&job.id, started_at, success, &output) {
            tracing::warn!(job_id = %job.id, error = %e, "failed to record cron run");
        }
        if !success {
            tracing::warn!(job_id = %job.id, output = %output, "cron run failed");
        }
        in_flight.lock().remove(&job.id);
    });
}
