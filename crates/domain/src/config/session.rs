//! Session scoping, retention, and queue-mode configuration.

use serde::{Deserialize, Serialize};

/// How direct-message conversations are scoped into sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DmScope {
    PerSender,
    #[default]
    PerPeer,
    PerChannelPeer,
    PerAccountChannelPeer,
    PerChannel,
    Global,
}

/// What happens to a message arriving while the session's turn is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    #[default]
    Followup,
    Collect,
    Interrupt,
    Steer,
    SteerBacklog,
}

impl QueueMode {
    /// Steer modes are accepted on the wire but behave as followup
    /// (streaming injection is out of scope).
    pub fn effective(self) -> QueueMode {
        match self {
            QueueMode::Steer | QueueMode::SteerBacklog => QueueMode::Followup,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub dm_scope: DmScope,
    /// Sessions idle longer than this are reset before the next turn.
    /// 0 disables idle reset.
    pub idle_reset_minutes: u64,
    /// History window loaded into each provider call.
    pub max_history: usize,
    /// Debounce for `collect` queue-mode merging (clamped to >= 1s).
    pub queue_debounce_ms: u64,
    /// Compaction triggers when estimate > context_window * threshold.
    pub compaction_threshold: f64,
    /// Truncate compaction keeps records totalling <= reserveTokens * 4 chars.
    pub reserve_tokens: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dm_scope: DmScope::default(),
            idle_reset_minutes: 0,
            max_history: 200,
            queue_debounce_ms: 2000,
            compaction_threshold: 0.8,
            reserve_tokens: 8000,
        }
    }
}

impl SessionConfig {
    /// Effective collect-mode debounce, clamped to the 1s floor.
    pub fn debounce_ms(&self) -> u64 {
        self.queue_debounce_ms.max(1000)
    }
}
