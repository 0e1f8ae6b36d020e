//! CLI surface: `serve` (default), one-shot/interactive agent chat, and
//! management subcommands for sessions, memory, cron jobs, hooks, and
//! the config document.

pub mod commands;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use bc_state::StateLayout;

use crate::config::{ConfigHandle, CONFIG_FILE};
use crate::state::Runtime;

/// BashClaw — an always-on conversational agent runtime.
#[derive(Debug, Parser)]
#[command(name = "bashclaw", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway (default when no subcommand is given).
    Serve,
    /// Send a message to an agent, or chat interactively.
    Agent {
        /// Message to send.
        #[arg(short = 'm', long)]
        message: Option<String>,
        /// Interactive REPL.
        #[arg(short = 'i', long)]
        interactive: bool,
        /// Agent id (defaults to the configured default agent).
        #[arg(short = 'a', long)]
        agent: Option<String>,
    },
    /// Session management.
    #[command(subcommand)]
    Session(SessionCommand),
    /// Key/value memory management.
    #[command(subcommand)]
    Memory(MemoryCommand),
    /// Scheduled job management.
    #[command(subcommand)]
    Cron(CronCommand),
    /// Hook management.
    #[command(subcommand)]
    Hooks(HooksCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// List all sessions.
    List,
    /// Print a session's entries.
    Show { session_key: String },
    /// Reset a session (next message starts fresh).
    Clear { session_key: String },
    /// Delete a session and its metadata.
    Delete { session_key: String },
    /// Export a session's raw JSONL to stdout.
    Export { session_key: String },
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommand {
    Get { key: String },
    Set {
        key: String,
        value: String,
        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,
    },
    Delete { key: String },
    List,
    Search { query: String },
}

#[derive(Debug, Subcommand)]
pub enum CronCommand {
    /// List all jobs.
    List,
    /// Add a job.
    Add {
        /// Job id (generated when omitted).
        #[arg(long)]
        id: Option<String>,
        /// One-shot ISO timestamp (e.g. 2026-08-01T12:00:00Z).
        #[arg(long, conflicts_with_all = ["every_ms", "expr"])]
        at: Option<String>,
        /// Interval in milliseconds.
        #[arg(long, conflicts_with = "expr")]
        every_ms: Option<u64>,
        /// 5-field cron expression.
        #[arg(long)]
        expr: Option<String>,
        /// Prompt the job sends to the agent.
        #[arg(long)]
        prompt: String,
        /// Session target: main or isolated.
        #[arg(long, default_value = "isolated")]
        target: String,
        /// Agent the job runs as.
        #[arg(long)]
        agent: Option<String>,
    },
    Remove { id: String },
    Enable { id: String },
    Disable { id: String },
    /// Show a job's recent runs.
    Runs {
        id: String,
        #[arg(long, default_value = "20")]
        tail: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum HooksCommand {
    List,
    Enable { name: String },
    Disable { name: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Dump the resolved configuration as JSON.
    Show,
    /// Validate the config file and report issues.
    Validate,
}

// ── Runtime loading ───────────────────────────────────────────────

/// Locate the config document: `BASHCLAW_CONFIG`, else
/// `<state root>/bashclaw.json` (state root from `BASHCLAW_STATE_DIR`,
/// else `~/.bashclaw`).
pub fn config_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("BASHCLAW_CONFIG") {
        return path.into();
    }
    state_root().join(CONFIG_FILE)
}

pub fn state_root() -> std::path::PathBuf {
    std::env::var("BASHCLAW_STATE_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| StateLayout::default_root())
}

/// Build a runtime the way every CLI subcommand does: load `.env` into
/// the process environment, then the config, then the state tree.
/// `BASHCLAW_STATE_DIR` overrides the config's `gateway.stateDir`.
pub fn load_runtime() -> anyhow::Result<Runtime> {
    let root = state_root();
    load_env_file(&root.join(".env"));

    let handle = Arc::new(ConfigHandle::load(config_path())?);
    let rt = if std::env::var_os("BASHCLAW_STATE_DIR").is_some() {
        Runtime::with_root(handle, &root)?
    } else {
        Runtime::new(handle)?
    };
    Ok(rt)
}

/// Export KEY=VALUE lines into the process environment (existing vars
/// win).
pub fn load_env_file(path: &std::path::Path) {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return;
    };
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if std::env::var_os(key).is_none() {
                std::env::set_var(key, value.trim());
            }
        }
    }
}
