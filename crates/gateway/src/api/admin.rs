//! Operational endpoints: status, config, models, sessions, channels,
//! env management.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use bc_domain::config::Config;

use crate::state::Runtime;

// ── status ────────────────────────────────────────────────────────

pub async fn get_status(State(rt): State<Runtime>) -> Json<Value> {
    let uptime = (chrono::Utc::now() - rt.started_at).num_seconds();
    let config = rt.config.snapshot();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime,
        "sessions": rt.sessions.session_count(),
        "lanes": rt.queue.lane_occupancy(),
        "agents": config.agents.known_ids(),
        "stateDir": rt.layout.root().display().to_string(),
    }))
}

// ── config ────────────────────────────────────────────────────────

pub async fn get_config(State(rt): State<Runtime>) -> Json<Value> {
    let config = rt.config.snapshot();
    Json(serde_json::to_value(&*config).unwrap_or(Value::Null))
}

pub async fn put_config(
    State(rt): State<Runtime>,
    Json(body): Json<Config>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match rt.config.write(&body) {
        Ok(()) => {
            rt.apply_config();
            Ok(Json(json!({"ok": true})))
        }
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

// ── models ────────────────────────────────────────────────────────

pub async fn get_models(State(rt): State<Runtime>) -> Json<Value> {
    Json(serde_json::to_value(rt.providers.catalog()).unwrap_or(Value::Null))
}

// ── sessions ──────────────────────────────────────────────────────

pub async fn get_sessions(State(rt): State<Runtime>) -> Json<Value> {
    let sessions: Vec<Value> = rt
        .sessions
        .list()
        .into_iter()
        .map(|name| json!({"name": name}))
        .collect();
    Json(json!({"sessions": sessions}))
}

#[derive(Debug, Deserialize)]
pub struct ClearBody {
    #[serde(default)]
    pub session_key: Option<String>,
}

pub async fn clear_sessions(
    State(rt): State<Runtime>,
    Json(body): Json<ClearBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let result = match &body.session_key {
        Some(key) => rt.sessions.reset(key).map(|_| 1usize),
        None => {
            // Clear everything.
            let names = rt.sessions.list();
            let count = names.len();
            let dir = rt.layout.sessions_dir();
            for name in names {
                let _ = std::fs::remove_file(dir.join(format!("{name}.jsonl")));
                let _ = std::fs::remove_file(dir.join(format!("{name}.meta.json")));
            }
            Ok(count)
        }
    };
    match result {
        Ok(cleared) => Ok(Json(json!({"cleared": cleared}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

// ── channels ──────────────────────────────────────────────────────

pub async fn get_channels(State(rt): State<Runtime>) -> Json<Value> {
    let config = rt.config.snapshot();
    Json(serde_json::to_value(&config.channels).unwrap_or(Value::Null))
}

// ── env ───────────────────────────────────────────────────────────

fn env_path(rt: &Runtime) -> std::path::PathBuf {
    rt.layout.root().join(".env")
}

fn parse_env(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            line.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn mask(value: &str) -> String {
    if value.len() <= 6 {
        "***".to_string()
    } else {
        format!("{}***", &value[..4])
    }
}

pub async fn get_env(State(rt): State<Runtime>) -> Json<Value> {
    let raw = std::fs::read_to_string(env_path(&rt)).unwrap_or_default();
    let vars: Vec<Value> = parse_env(&raw)
        .into_iter()
        .map(|(k, v)| json!({"key": k, "value": mask(&v)}))
        .collect();
    Json(json!({"vars": vars}))
}

#[derive(Debug, Deserialize)]
pub struct EnvBody {
    pub key: String,
    pub value: String,
}

pub async fn put_env(
    State(rt): State<Runtime>,
    Json(body): Json<EnvBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if body.key.trim().is_empty() || body.key.contains('=') {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid env key"})),
        ));
    }
    let path = env_path(&rt);
    let raw = std::fs::read_to_string(&path).unwrap_or_default();
    let mut vars = parse_env(&raw);
    vars.retain(|(k, _)| k != &body.key);
    vars.push((body.key.clone(), body.value.clone()));

    let rendered: String = vars
        .iter()
        .map(|(k, v)| format!("{k}={v}\n"))
        .collect();
    if let Err(e) = bc_state::atomic::write_bytes_atomic(&path, rendered.as_bytes()) {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        ));
    }
    // Make the new value visible to provider key lookups immediately.
    std::env::set_var(&body.key, &body.value);
    Ok(Json(json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsing_skips_comments_and_blanks() {
        let raw = "# comment\nANTHROPIC_API_KEY=sk-abc\n\nBASHCLAW_TELEGRAM_TOKEN = tok123\n";
        let vars = parse_env(raw);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].0, "ANTHROPIC_API_KEY");
        assert_eq!(vars[1].1, "tok123");
    }

    #[test]
    fn masking_hides_secrets() {
        assert_eq!(mask("sk-ant-longsecret"), "sk-a***");
        assert_eq!(mask("short"), "***");
    }
}
