//! Fire-and-forget background turns.
//!
//! `spawn` starts a task turn on the subagent lane under a fresh session
//! key and returns immediately; the status record under `spawn/<id>.json`
//! tracks it, and the result is announced to the parent session through
//! the event queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bc_domain::config::LaneType;
use bc_domain::Result;
use bc_sessions::key::{system_session_key, SessionType};

use crate::state::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnStatus {
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRecord {
    pub id: String,
    pub agent_id: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: SpawnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Start a background task turn. Returns the spawn id immediately.
pub fn spawn_task(
    rt: &Runtime,
    agent_id: &str,
    task: &str,
    label: Option<String>,
    parent_session_key: &str,
) -> Result<String> {
    let spawn_id = uuid::Uuid::new_v4().to_string();
    let record = SpawnRecord {
        id: spawn_id.clone(),
        agent_id: agent_id.to_string(),
        task: task.to_string(),
        label: label.clone(),
        status: SpawnStatus::Running,
        result: None,
        created_at: Utc::now(),
        finished_at: None,
    };
    bc_state::write_json_atomic(&rt.layout.spawn_file(&spawn_id), &record)?;

    let rt = rt.clone();
    let agent_id = agent_id.to_string();
    let task = task.to_string();
    let parent_key = parent_session_key.to_string();
    let id = spawn_id.clone();

    tokio::spawn(async move {
        let session_key = system_session_key(&agent_id, SessionType::Spawn, &id);
        let run = rt
            .queue
            .dual_enqueue(&session_key, LaneType::Subagent, || async {
                crate::runtime::turn::run_turn(
                    &rt,
                    crate::runtime::turn::TurnRequest {
                        agent_id: agent_id.clone(),
                        session_key: session_key.clone(),
                        message: Some(task.clone()),
                        channel: "spawn".into(),
                        is_subagent: true,
                    },
                )
                .await
            })
            .await;

        let (status, result) = match run {
            Ok(text) => (SpawnStatus::Done, text),
            Err(e) => (SpawnStatus::Error, e.to_string()),
        };

        let path = rt.layout.spawn_file(&id);
        if let Ok(Some(mut record)) = bc_state::read_json::<SpawnRecord>(&path) {
            record.status = status;
            record.result = Some(result.clone());
            record.finished_at = Some(Utc::now());
            if let Err(e) = bc_state::write_json_atomic(&path, &record) {
                tracing::warn!(spawn_id = %id, error = %e, "failed to persist spawn result");
            }
        }

        let label_note = record_label(&rt, &id);
        let summary: String = result.chars().take(500).collect();
        let note = format!(
            "Background task {id}{label_note} finished ({}): {summary}",
            match status {
                SpawnStatus::Done => "ok",
                _ => "error",
            }
        );
        if let Err(e) = rt.events.enqueue(&parent_key, &note) {
            tracing::warn!(spawn_id = %id, error = %e, "failed to announce spawn result");
        }
    });

    Ok(spawn_id)
}

fn record_label(rt: &Runtime, spawn_id: &str) -> String {
    bc_state::read_json::<SpawnRecord>(&rt.layout.spawn_file(spawn_id))
        .ok()
        .flatten()
        .and_then(|r| r.label)
        .map(|l| format!(" ({l})"))
        .unwrap_or_default()
}

/// Look up a spawn record.
pub fn spawn_status(rt: &Runtime, spawn_id: &str) -> Result<Option<SpawnRecord>> {
    bc_state::read_json(&rt.layout.spawn_file(spawn_id))
}
