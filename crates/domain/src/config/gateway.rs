//! Gateway server and lane concurrency configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding all persistent state; `~/.bashclaw` when unset.
    pub state_dir: Option<String>,
    /// Grace window for in-flight turns on SIGTERM/SIGINT.
    pub shutdown_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7710,
            state_dir: None,
            shutdown_grace_ms: 10_000,
        }
    }
}

/// Typed global concurrency buckets for agent turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneType {
    Main,
    Cron,
    Subagent,
    Nested,
}

impl LaneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneType::Main => "main",
            LaneType::Cron => "cron",
            LaneType::Subagent => "subagent",
            LaneType::Nested => "nested",
        }
    }
}

impl std::fmt::Display for LaneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaneConfig {
    pub main: usize,
    pub cron: usize,
    pub subagent: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            main: 4,
            cron: 1,
            subagent: 8,
        }
    }
}

impl LaneConfig {
    /// Maximum concurrency for a lane. `None` means unbounded.
    pub fn max_concurrent_for(&self, lane: LaneType) -> Option<usize> {
        match lane {
            LaneType::Main => Some(self.main),
            LaneType::Cron => Some(self.cron),
            LaneType::Subagent => Some(self.subagent),
            LaneType::Nested => None,
        }
    }
}
