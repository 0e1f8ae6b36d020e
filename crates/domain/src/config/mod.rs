mod agents;
mod channels;
mod cron;
mod gateway;
mod security;
mod session;

pub use agents::*;
pub use channels::*;
pub use cron::*;
pub use gateway::*;
pub use security::*;
pub use session::*;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `bashclaw.json` document. Every section has serde defaults so a
/// partial (or empty) file yields a runnable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub channels: HashMap<String, ChannelConfig>,
    pub bindings: Vec<Binding>,
    pub identity_links: Vec<IdentityLink>,
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
    pub cron: CronConfig,
    pub plugins: Vec<PluginConfig>,
    pub lanes: LaneConfig,
}

/// A registered plugin: an external process or library that adds hooks
/// and tools at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "d_enabled")]
    pub enabled: bool,
}

fn d_enabled() -> bool {
    true
}

impl Config {
    /// Parse a config document from raw JSON, substituting `${VAR}`
    /// references from the process environment first.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let mut doc: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::ConfigInvalid(format!("parse error: {e}")))?;
        substitute_env(&mut doc);
        serde_json::from_value(doc)
            .map_err(|e| Error::ConfigInvalid(format!("schema error: {e}")))
    }

    /// Validate the configuration and return a list of issues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.gateway.port == 0 {
            issues.push(ConfigIssue::error(
                "gateway.port",
                "port must be in 1..=65535",
            ));
        }

        for (i, entry) in self.agents.list.iter().enumerate() {
            if entry.id.is_empty() {
                issues.push(ConfigIssue::error(
                    format!("agents.list[{i}].id"),
                    "agent id must not be empty",
                ));
            }
        }

        if self.session.queue_debounce_ms < 1000 {
            issues.push(ConfigIssue::warning(
                "session.queueDebounceMs",
                "debounce below 1s is clamped to 1s",
            ));
        }

        if !(self.session.compaction_threshold > 0.0
            && self.session.compaction_threshold <= 1.0)
        {
            issues.push(ConfigIssue::error(
                "session.compactionThreshold",
                "threshold must be in (0, 1]",
            ));
        }

        for (name, ch) in &self.channels {
            for (j, rule) in ch.auto_replies.iter().enumerate() {
                if rule.pattern.is_empty() {
                    issues.push(ConfigIssue::error(
                        format!("channels.{name}.autoReplies[{j}].pattern"),
                        "auto-reply pattern must not be empty",
                    ));
                }
            }
        }

        issues
    }

    /// Validate and fail on the first error-severity issue.
    pub fn ensure_valid(&self) -> Result<()> {
        let issues = self.validate();
        if let Some(err) = issues.iter().find(|i| i.severity == Severity::Error) {
            return Err(Error::ConfigInvalid(err.to_string()));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replace `${VAR}` references in every string value with the environment
/// variable's value. Unset variables leave the reference untouched.
pub fn substitute_env(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${") {
                *s = substitute_env_str(s);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_env(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env(v);
            }
        }
        _ => {}
    }
}

fn substitute_env_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                match std::env::var(var) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(var);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
