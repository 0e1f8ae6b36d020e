//! Tool-call dispatch.
//!
//! Joins the stateless bc-tools handlers (shell, web, files) with the
//! runtime-coupled tools (memory, cron, agent_message, spawn). Every
//! invocation is wrapped in the `pre_tool` / `post_tool` modifying hooks
//! and gated by the elevation check; failures come back as
//! `{"error": ...}` tool results with `is_error = true`.

use std::path::Path;

use serde_json::Value;

use bc_domain::config::AgentSettings;
use bc_domain::Error;
use bc_memory::search_entries;
use bc_tools::policy::Elevation;
use bc_tools::{builtin_tools, elevation_admits};

use crate::hooks::HookEvent;
use crate::scheduler::jobs::{CronJob, JobSchedule, SessionTarget};
use crate::state::Runtime;

/// Dispatch one tool call. Returns `(result_json_or_text, is_error)`.
pub async fn dispatch_tool(
    rt: &Runtime,
    agent: &AgentSettings,
    session_key: &str,
    tool_name: &str,
    input: &Value,
    is_subagent: bool,
) -> (String, bool) {
    // pre_tool may rewrite the arguments.
    let hook_payload = rt
        .hooks
        .dispatch(
            HookEvent::PreTool,
            serde_json::json!({"tool": tool_name, "input": input, "sessionKey": session_key}),
        )
        .await;
    let input = hook_payload.get("input").cloned().unwrap_or_else(|| input.clone());

    // Elevation gate.
    let config = rt.config.snapshot();
    if let Some(meta) = builtin_tools().iter().find(|t| t.name == tool_name) {
        if meta.elevation != Elevation::None {
            let has_approval = rt.layout.approval_file(session_key, tool_name).exists();
            let (admitted, needs_audit) = elevation_admits(
                meta.elevation,
                tool_name,
                &config.security.elevated_tools,
                has_approval,
            );
            if needs_audit {
                rt.audit.record(
                    "tool_elevation",
                    serde_json::json!({
                        "tool": tool_name,
                        "sessionKey": session_key,
                        "admitted": admitted,
                    }),
                );
            }
            if !admitted {
                return finish(
                    rt,
                    tool_name,
                    error_result("tool requires elevation approval"),
                )
                .await;
            }
        }
    }

    let outcome = match tool_name {
        "web_fetch" => run_web_fetch(&input).await,
        "web_search" => run_web_search(&input).await,
        "shell" => run_shell_tool(rt, session_key, &input).await,
        "memory" => run_memory(rt, agent, &input),
        "cron" => run_cron(rt, agent, &input),
        "read_file" => run_read_file(agent, &input),
        "write_file" => run_write_file(agent, &input),
        "list_files" => run_list_files(agent, &input),
        "file_search" => run_file_search(agent, &input),
        "agent_message" => run_agent_message(rt, agent, &input, is_subagent).await,
        "spawn" => run_spawn(rt, agent, session_key, &input, is_subagent),
        "spawn_status" => run_spawn_status(rt, &input),
        other => error_result(&format!("unknown tool '{other}'")),
    };

    finish(rt, tool_name, outcome).await
}

async fn finish(rt: &Runtime, tool_name: &str, outcome: (String, bool)) -> (String, bool) {
    // post_tool may rewrite the result.
    let payload = rt
        .hooks
        .dispatch(
            HookEvent::PostTool,
            serde_json::json!({
                "tool": tool_name,
                "result": outcome.0,
                "isError": outcome.1,
            }),
        )
        .await;
    let result = payload
        .get("result")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or(outcome.0);
    let is_error = payload
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(outcome.1);
    (result, is_error)
}

fn error_result(reason: &str) -> (String, bool) {
    (
        serde_json::json!({"error": reason}).to_string(),
        true,
    )
}

fn ok_json(value: Value) -> (String, bool) {
    (value.to_string(), false)
}

fn str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

fn workspace_of(agent: &AgentSettings) -> Option<&Path> {
    agent.workspace.as_deref().map(Path::new)
}

// ── web ───────────────────────────────────────────────────────────

async fn run_web_fetch(input: &Value) -> (String, bool) {
    let Some(url) = str_arg(input, "url") else {
        return error_result("missing required argument: url");
    };
    let max_chars = input
        .get("maxChars")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize);
    match bc_tools::web::web_fetch(url, max_chars).await {
        Ok(result) => ok_json(serde_json::to_value(result).unwrap_or(Value::Null)),
        // Blocked fetches surface the guard's reason verbatim.
        Err(Error::ToolBlocked(reason)) => error_result(&reason),
        Err(e) => error_result(&e.to_string()),
    }
}

async fn run_web_search(input: &Value) -> (String, bool) {
    let Some(query) = str_arg(input, "query") else {
        return error_result("missing required argument: query");
    };
    let count = input.get("count").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
    match bc_tools::web::web_search(query, count).await {
        Ok(results) => ok_json(serde_json::json!({"results": results})),
        Err(e) => error_result(&e.to_string()),
    }
}

// ── shell ─────────────────────────────────────────────────────────

async fn run_shell_tool(rt: &Runtime, session_key: &str, input: &Value) -> (String, bool) {
    let Some(command) = str_arg(input, "command") else {
        return error_result("missing required argument: command");
    };
    let timeout = input.get("timeout").and_then(|v| v.as_u64()).unwrap_or(30);

    match bc_tools::shell::run_shell(command, timeout).await {
        Ok(outcome) => ok_json(serde_json::to_value(outcome).unwrap_or(Value::Null)),
        Err(Error::ToolBlocked(reason)) => {
            rt.audit.record(
                "shell_blocked",
                serde_json::json!({
                    "sessionKey": session_key,
                    "command": command,
                    "reason": reason,
                }),
            );
            (
                serde_json::json!({"error": "blocked", "reason": reason}).to_string(),
                true,
            )
        }
        Err(e) => error_result(&e.to_string()),
    }
}

// ── memory ────────────────────────────────────────────────────────

fn run_memory(rt: &Runtime, agent: &AgentSettings, input: &Value) -> (String, bool) {
    let action = str_arg(input, "action").unwrap_or("");
    match action {
        "get" => {
            let Some(key) = str_arg(input, "key") else {
                return error_result("memory.get requires key");
            };
            match rt.memory.get(key) {
                Ok(Some(entry)) => ok_json(serde_json::to_value(entry).unwrap_or(Value::Null)),
                Ok(None) => error_result(&format!("no memory for key '{key}'")),
                Err(e) => error_result(&e.to_string()),
            }
        }
        "set" => {
            let (Some(key), Some(value)) = (str_arg(input, "key"), str_arg(input, "value"))
            else {
                return error_result("memory.set requires key and value");
            };
            let tags = input
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            match rt.memory.set(key, value, tags, Some("agent".into())) {
                Ok(entry) => ok_json(serde_json::json!({"stored": entry.key})),
                Err(e) => error_result(&e.to_string()),
            }
        }
        "delete" => {
            let Some(key) = str_arg(input, "key") else {
                return error_result("memory.delete requires key");
            };
            match rt.memory.delete(key) {
                Ok(found) => ok_json(serde_json::json!({"deleted": found})),
                Err(e) => error_result(&e.to_string()),
            }
        }
        "list" => match rt.memory.list() {
            Ok(entries) => {
                let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
                ok_json(serde_json::json!({"keys": keys}))
            }
            Err(e) => error_result(&e.to_string()),
        },
        "search" => {
            let Some(query) = str_arg(input, "query") else {
                return error_result("memory.search requires query");
            };
            let mut entries = match rt.memory.list() {
                Ok(entries) => entries,
                Err(e) => return error_result(&e.to_string()),
            };
            entries.extend(workspace_markdown_entries(workspace_of(agent)));
            let hits = search_entries(entries, query, 10);
            let results: Vec<Value> = hits
                .into_iter()
                .map(|h| {
                    serde_json::json!({
                        "key": h.entry.key,
                        "value": h.entry.value,
                        "score": h.score,
                    })
                })
                .collect();
            ok_json(serde_json::json!({"results": results}))
        }
        other => error_result(&format!("unknown memory action '{other}'")),
    }
}

/// Workspace markdown sections exposed as searchable pseudo-entries
/// (`file#heading` keys).
fn workspace_markdown_entries(workspace: Option<&Path>) -> Vec<bc_memory::MemoryEntry> {
    let Some(dir) = workspace else {
        return Vec::new();
    };
    let Ok(items) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let now = chrono::Utc::now();
    let mut entries = Vec::new();
    for item in items.filter_map(|e| e.ok()) {
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let file = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut heading = String::from("intro");
        let mut body = String::new();
        for line in text.lines().chain(std::iter::once("## ")) {
            if let Some(h) = line.strip_prefix("## ") {
                if !body.trim().is_empty() {
                    entries.push(bc_memory::MemoryEntry {
                        key: format!("{file}#{heading}"),
                        value: body.trim().to_string(),
                        tags: vec!["workspace".into()],
                        source: Some("workspace".into()),
                        created_at: now,
                        updated_at: now,
                        access_count: 0,
                    });
                }
                heading = h.trim().to_string();
                body = String::new();
            } else {
                body.push_str(line);
                body.push('\n');
            }
        }
    }
    entries
}

// ── cron ──────────────────────────────────────────────────────────

fn run_cron(rt: &Runtime, agent: &AgentSettings, input: &Value) -> (String, bool) {
    let action = str_arg(input, "action").unwrap_or("");
    match action {
        "list" => match rt.jobs.list() {
            Ok(jobs) => ok_json(serde_json::to_value(jobs).unwrap_or(Value::Null)),
            Err(e) => error_result(&e.to_string()),
        },
        "add" => {
            let Some(prompt) = str_arg(input, "prompt") else {
                return error_result("cron.add requires prompt");
            };
            let schedule: JobSchedule =
                match serde_json::from_value(input.get("schedule").cloned().unwrap_or(Value::Null))
                {
                    Ok(s) => s,
                    Err(e) => return error_result(&format!("invalid schedule: {e}")),
                };
            let target = match str_arg(input, "sessionTarget") {
                Some("main") => SessionTarget::Main,
                _ => SessionTarget::Isolated,
            };
            let id = str_arg(input, "id")
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let job = CronJob::new(&id, schedule, prompt, target, Some(agent.id.clone()));
            match rt.jobs.add(job) {
                Ok(()) => ok_json(serde_json::json!({"id": id})),
                Err(e) => error_result(&e.to_string()),
            }
        }
        "remove" => {
            let Some(id) = str_arg(input, "id") else {
                return error_result("cron.remove requires id");
            };
            match rt.jobs.remove(id) {
                Ok(found) => ok_json(serde_json::json!({"removed": found})),
                Err(e) => error_result(&e.to_string()),
            }
        }
        "enable" | "disable" => {
            let Some(id) = str_arg(input, "id") else {
                return error_result("cron.enable/disable requires id");
            };
            match rt.jobs.set_enabled(id, action == "enable") {
                Ok(found) => ok_json(serde_json::json!({"updated": found})),
                Err(e) => error_result(&e.to_string()),
            }
        }
        other => error_result(&format!("unknown cron action '{other}'")),
    }
}

// ── files ─────────────────────────────────────────────────────────

fn run_read_file(agent: &AgentSettings, input: &Value) -> (String, bool) {
    let Some(path) = str_arg(input, "path") else {
        return error_result("missing required argument: path");
    };
    let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let limit = input.get("limit").and_then(|v| v.as_u64()).unwrap_or(2000) as usize;
    match bc_tools::files::read_file(workspace_of(agent), path, offset, limit) {
        Ok(result) => ok_json(serde_json::to_value(result).unwrap_or(Value::Null)),
        Err(e) => error_result(&e.to_string()),
    }
}

fn run_write_file(agent: &AgentSettings, input: &Value) -> (String, bool) {
    let (Some(path), Some(content)) = (str_arg(input, "path"), str_arg(input, "content"))
    else {
        return error_result("write_file requires path and content");
    };
    let append = input.get("append").and_then(|v| v.as_bool()).unwrap_or(false);
    match bc_tools::files::write_file(workspace_of(agent), path, content, append) {
        Ok(bytes) => ok_json(serde_json::json!({"written": bytes})),
        Err(e) => error_result(&e.to_string()),
    }
}

fn run_list_files(agent: &AgentSettings, input: &Value) -> (String, bool) {
    let Some(path) = str_arg(input, "path") else {
        return error_result("missing required argument: path");
    };
    let pattern = str_arg(input, "pattern");
    let recursive = input
        .get("recursive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    match bc_tools::files::list_files(workspace_of(agent), path, pattern, recursive) {
        Ok(entries) => ok_json(serde_json::json!({"entries": entries})),
        Err(e) => error_result(&e.to_string()),
    }
}

fn run_file_search(agent: &AgentSettings, input: &Value) -> (String, bool) {
    let Some(path) = str_arg(input, "path") else {
        return error_result("missing required argument: path");
    };
    let name = str_arg(input, "name");
    let content = str_arg(input, "content");
    let max_results = input
        .get("maxResults")
        .and_then(|v| v.as_u64())
        .unwrap_or(50) as usize;
    match bc_tools::files::file_search(workspace_of(agent), path, name, content, max_results) {
        Ok(matches) => ok_json(serde_json::json!({"matches": matches})),
        Err(e) => error_result(&e.to_string()),
    }
}

// ── agent_message / spawn ─────────────────────────────────────────

async fn run_agent_message(
    rt: &Runtime,
    agent: &AgentSettings,
    input: &Value,
    is_subagent: bool,
) -> (String, bool) {
    if is_subagent {
        return error_result("agent_message is not available to subagents");
    }
    let (Some(target), Some(message)) = (
        str_arg(input, "target_agent"),
        str_arg(input, "message"),
    ) else {
        return error_result("agent_message requires target_agent and message");
    };
    let from = str_arg(input, "from_agent").unwrap_or(&agent.id);

    let session_key = bc_sessions::key::system_session_key(
        target,
        bc_sessions::key::SessionType::Agent,
        from,
    );
    let rt2 = rt.clone();
    let target = target.to_string();
    let message = format!("[from agent {from}] {message}");
    let key2 = session_key.clone();

    let result = rt
        .queue
        .dual_enqueue(&session_key, bc_domain::config::LaneType::Nested, move || async move {
            // Boxed: the subagent turn re-enters the tool loop.
            Box::pin(crate::runtime::turn::run_turn(
                &rt2,
                crate::runtime::turn::TurnRequest {
                    agent_id: target,
                    session_key: key2,
                    message: Some(message),
                    channel: "agent".into(),
                    is_subagent: true,
                },
            ))
            .await
        })
        .await;

    match result {
        Ok(text) => (text, false),
        Err(e) => error_result(&e.to_string()),
    }
}

fn run_spawn(
    rt: &Runtime,
    agent: &AgentSettings,
    session_key: &str,
    input: &Value,
    is_subagent: bool,
) -> (String, bool) {
    if is_subagent {
        return error_result("spawn is not available to subagents");
    }
    let Some(task) = str_arg(input, "task") else {
        return error_result("spawn requires task");
    };
    let label = str_arg(input, "label").map(String::from);
    match crate::runtime::spawn::spawn_task(rt, &agent.id, task, label, session_key) {
        Ok(id) => ok_json(serde_json::json!({"task_id": id, "status": "running"})),
        Err(e) => error_result(&e.to_string()),
    }
}

fn run_spawn_status(rt: &Runtime, input: &Value) -> (String, bool) {
    let Some(task_id) = str_arg(input, "task_id") else {
        return error_result("spawn_status requires task_id");
    };
    match crate::runtime::spawn::spawn_status(rt, task_id) {
        Ok(Some(record)) => ok_json(serde_json::to_value(record).unwrap_or(Value::Null)),
        Ok(None) => error_result(&format!("no spawn record for '{task_id}'")),
        Err(e) => error_result(&e.to_string()),
    }
}
