//! CLI subcommand handlers. Each builds a local runtime over the same
//! state tree the gateway uses, so the CLI works with or without a
//! running server.

use anyhow::Context;
use chrono::{DateTime, Utc};

use bc_memory::search_entries;
use bc_sessions::transcript::EntryKind;

use crate::routing::{process_inbound, InboundMessage};
use crate::scheduler::jobs::{CronJob, JobSchedule, SessionTarget};
use crate::state::Runtime;

use super::{CronCommand, HooksCommand, MemoryCommand, SessionCommand};

// ── agent ─────────────────────────────────────────────────────────

pub async fn agent_chat(
    rt: &Runtime,
    message: Option<String>,
    interactive: bool,
    agent: Option<String>,
) -> anyhow::Result<()> {
    if let Some(message) = message {
        let reply = send_one(rt, &message, agent.clone()).await?;
        println!("{reply}");
    }

    if interactive {
        let mut editor = rustyline::DefaultEditor::new()?;
        loop {
            match editor.readline("you> ") {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "/quit" || line == "/exit" {
                        break;
                    }
                    let _ = editor.add_history_entry(&line);
                    match send_one(rt, &line, agent.clone()).await {
                        Ok(reply) => println!("{reply}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                }
                Err(rustyline::error::ReadlineError::Interrupted)
                | Err(rustyline::error::ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

async fn send_one(rt: &Runtime, text: &str, agent: Option<String>) -> anyhow::Result<String> {
    let msg = InboundMessage {
        channel: "cli".into(),
        sender: whoami(),
        text: text.to_string(),
        agent_override: agent,
        ..Default::default()
    };
    let reply = process_inbound(rt, msg).await?;
    Ok(reply
        .map(|r| r.chunks.join("\n"))
        .unwrap_or_default())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli-user".into())
}

// ── session ───────────────────────────────────────────────────────

pub fn session(rt: &Runtime, cmd: SessionCommand) -> anyhow::Result<()> {
    match cmd {
        SessionCommand::List => {
            for name in rt.sessions.list() {
                println!("{name}");
            }
        }
        SessionCommand::Show { session_key } => {
            for entry in rt.sessions.load(&session_key)? {
                let ts = DateTime::<Utc>::from_timestamp_millis(entry.ts)
                    .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
                    .unwrap_or_default();
                match &entry.kind {
                    EntryKind::Session { id, .. } => println!("[{ts}] session {id}"),
                    EntryKind::Message { content, compacted } => {
                        let marker = if *compacted { " (compacted)" } else { "" };
                        println!("[{ts}] {:?}{marker}: {content}", entry.role);
                    }
                    EntryKind::ToolCall {
                        tool_name,
                        tool_input,
                        ..
                    } => println!("[{ts}] tool_call {tool_name} {tool_input}"),
                    EntryKind::ToolResult {
                        content, is_error, ..
                    } => {
                        let tag = if *is_error { "tool_error" } else { "tool_result" };
                        println!("[{ts}] {tag}: {content}");
                    }
                }
            }
        }
        SessionCommand::Clear { session_key } | SessionCommand::Delete { session_key } => {
            rt.sessions.reset(&session_key)?;
            println!("cleared {session_key}");
        }
        SessionCommand::Export { session_key } => {
            let path = rt.layout.session_file(&session_key);
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("no session at {}", path.display()))?;
            print!("{raw}");
        }
    }
    Ok(())
}

// ── memory ────────────────────────────────────────────────────────

pub fn memory(rt: &Runtime, cmd: MemoryCommand) -> anyhow::Result<()> {
    match cmd {
        MemoryCommand::Get { key } => match rt.memory.get(&key)? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => anyhow::bail!("no memory for key '{key}'"),
        },
        MemoryCommand::Set { key, value, tags } => {
            let tags = tags
                .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            rt.memory.set(&key, &value, tags, Some("cli".into()))?;
            println!("stored {key}");
        }
        MemoryCommand::Delete { key } => {
            if rt.memory.delete(&key)? {
                println!("deleted {key}");
            } else {
                println!("no memory for key '{key}'");
            }
        }
        MemoryCommand::List => {
            for entry in rt.memory.list()? {
                println!("{}\t{}", entry.key, entry.value.chars().take(80).collect::<String>());
            }
        }
        MemoryCommand::Search { query } => {
            let hits = search_entries(rt.memory.list()?, &query, 10);
            for hit in hits {
                println!("{:.3}\t{}\t{}", hit.score, hit.entry.key, hit.entry.value);
            }
        }
    }
    Ok(())
}

// ── cron ──────────────────────────────────────────────────────────

pub fn cron(rt: &Runtime, cmd: CronCommand) -> anyhow::Result<()> {
    match cmd {
        CronCommand::List => {
            for job in rt.jobs.list()? {
                let status = if job.enabled { "enabled" } else { "disabled" };
                println!(
                    "{}\t{status}\tfailures={}\t{}",
                    job.id,
                    job.failure_count,
                    serde_json::to_string(&job.schedule)?
                );
            }
        }
        CronCommand::Add {
            id,
            at,
            every_ms,
            expr,
            prompt,
            target,
            agent,
        } => {
            let schedule = if let Some(at) = at {
                let at: DateTime<Utc> = at
                    .parse()
                    .with_context(|| format!("invalid timestamp '{at}'"))?;
                JobSchedule::At { at }
            } else if let Some(every_ms) = every_ms {
                JobSchedule::Every { every_ms }
            } else if let Some(expr) = expr {
                JobSchedule::Cron { expr }
            } else {
                anyhow::bail!("one of --at, --every-ms, --expr is required");
            };
            let target = match target.as_str() {
                "main" => SessionTarget::Main,
                "isolated" => SessionTarget::Isolated,
                other => anyhow::bail!("invalid target '{other}' (main|isolated)"),
            };
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            rt.jobs
                .add(CronJob::new(&id, schedule, &prompt, target, agent))?;
            println!("added {id}");
        }
        CronCommand::Remove { id } => {
            if rt.jobs.remove(&id)? {
                println!("removed {id}");
            } else {
                anyhow::bail!("no job '{id}'");
            }
        }
        CronCommand::Enable { id } => {
            rt.jobs.set_enabled(&id, true)?;
            println!("enabled {id}");
        }
        CronCommand::Disable { id } => {
            rt.jobs.set_enabled(&id, false)?;
            println!("disabled {id}");
        }
        CronCommand::Runs { id, tail } => {
            for run in rt.jobs.read_runs(&id, tail)? {
                println!(
                    "{}\t{}\t{}ms\t{}",
                    run.started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    if run.success { "ok" } else { "fail" },
                    run.duration_ms,
                    run.output.chars().take(120).collect::<String>()
                );
            }
        }
    }
    Ok(())
}

// ── hooks ─────────────────────────────────────────────────────────

pub fn hooks(rt: &Runtime, cmd: HooksCommand) -> anyhow::Result<()> {
    match cmd {
        HooksCommand::List => {
            for info in rt.hooks.list() {
                println!(
                    "{}\t{:?}\t{:?}\tpriority={}\t{}",
                    info.name,
                    info.event,
                    info.strategy,
                    info.priority,
                    if info.enabled { "enabled" } else { "disabled" }
                );
            }
        }
        HooksCommand::Enable { name } => {
            if !rt.hooks.set_enabled(&name, true) {
                anyhow::bail!("no hook '{name}'");
            }
            println!("enabled {name}");
        }
        HooksCommand::Disable { name } => {
            if !rt.hooks.set_enabled(&name, false) {
                anyhow::bail!("no hook '{name}'");
            }
            println!("disabled {name}");
        }
    }
    Ok(())
}

// ── config ────────────────────────────────────────────────────────

pub fn config_show(rt: &Runtime) -> anyhow::Result<()> {
    let config = rt.config.snapshot();
    println!("{}", serde_json::to_string_pretty(&*config)?);
    Ok(())
}

pub fn config_validate() -> anyhow::Result<()> {
    let path = super::config_path();
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = bc_domain::config::Config::from_json_str(&raw)?;
    let issues = config.validate();
    for issue in &issues {
        println!("{issue}");
    }
    if issues
        .iter()
        .any(|i| i.severity == bc_domain::config::Severity::Error)
    {
        anyhow::bail!("config validation failed");
    }
    println!("config ok: {}", path.display());
    Ok(())
}
