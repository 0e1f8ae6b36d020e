//! Agent configuration — defaults plus per-id overrides.
//!
//! Accessors fall through `agents.list[id=X].field` → `agents.defaults.field`
//! → hard default, so callers always receive a fully resolved
//! [`AgentSettings`].

use serde::{Deserialize, Serialize};

use super::session::QueueMode;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    /// Agent used when routing resolves nothing more specific.
    pub default_id: Option<String>,
    pub defaults: AgentOverrides,
    pub list: Vec<AgentEntry>,
}

/// One entry in `agents.list`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentEntry {
    pub id: String,
    #[serde(flatten)]
    pub overrides: AgentOverrides,
}

/// Optional per-agent settings; `None` falls through to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentOverrides {
    /// Model alias or `provider/model` ref.
    pub model: Option<String>,
    /// Models tried in order when the overflow ladder exhausts compaction.
    pub fallback_models: Option<Vec<String>>,
    /// Tool-loop iteration cap.
    pub max_turns: Option<u32>,
    /// Base tool profile: minimal | coding | messaging | full.
    pub tools_profile: Option<String>,
    /// Explicit allow list (restricts the profile set).
    pub tools_allow: Option<Vec<String>>,
    /// Explicit deny list (subtracts from the result).
    pub tools_deny: Option<Vec<String>>,
    /// Workspace directory for bootstrap files and file-tool confinement.
    pub workspace: Option<String>,
    /// Agent personality text prepended to the system prompt.
    pub soul: Option<String>,
    /// Reflection nudge after tool batches. On unless explicitly false.
    pub reflection_prompt: Option<bool>,
    /// Queue mode for messages arriving while the session is busy.
    pub queue_mode: Option<QueueMode>,
}

/// Fully resolved settings for one agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub id: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub max_turns: u32,
    pub tools_profile: String,
    pub tools_allow: Option<Vec<String>>,
    pub tools_deny: Vec<String>,
    pub workspace: Option<String>,
    pub soul: Option<String>,
    pub reflection_prompt: bool,
    pub queue_mode: QueueMode,
}

pub const FALLBACK_AGENT_ID: &str = "main";
const DEFAULT_MODEL: &str = "default";
const DEFAULT_MAX_TURNS: u32 = 10;
const DEFAULT_PROFILE: &str = "full";

impl AgentsConfig {
    /// The agent id used when routing resolves nothing more specific.
    pub fn default_id(&self) -> &str {
        self.default_id.as_deref().unwrap_or(FALLBACK_AGENT_ID)
    }

    /// Resolve an agent's settings with per-id → defaults → hard-default
    /// fallthrough. Unknown ids resolve against defaults alone, so a bare
    /// config still answers for the default agent.
    pub fn resolve(&self, agent_id: &str) -> AgentSettings {
        let entry = self
            .list
            .iter()
            .find(|e| e.id == agent_id)
            .map(|e| &e.overrides);
        let pick = |f: fn(&AgentOverrides) -> Option<&str>| -> Option<String> {
            entry
                .and_then(f)
                .or_else(|| f(&self.defaults))
                .map(String::from)
        };

        AgentSettings {
            id: agent_id.to_string(),
            model: pick(|o| o.model.as_deref()).unwrap_or_else(|| DEFAULT_MODEL.into()),
            fallback_models: entry
                .and_then(|o| o.fallback_models.clone())
                .or_else(|| self.defaults.fallback_models.clone())
                .unwrap_or_default(),
            max_turns: entry
                .and_then(|o| o.max_turns)
                .or(self.defaults.max_turns)
                .unwrap_or(DEFAULT_MAX_TURNS),
            tools_profile: pick(|o| o.tools_profile.as_deref())
                .unwrap_or_else(|| DEFAULT_PROFILE.into()),
            tools_allow: entry
                .and_then(|o| o.tools_allow.clone())
                .or_else(|| self.defaults.tools_allow.clone()),
            tools_deny: entry
                .and_then(|o| o.tools_deny.clone())
                .or_else(|| self.defaults.tools_deny.clone())
                .unwrap_or_default(),
            workspace: pick(|o| o.workspace.as_deref()),
            soul: pick(|o| o.soul.as_deref()),
            reflection_prompt: entry
                .and_then(|o| o.reflection_prompt)
                .or(self.defaults.reflection_prompt)
                .unwrap_or(true),
            queue_mode: entry
                .and_then(|o| o.queue_mode)
                .or(self.defaults.queue_mode)
                .unwrap_or_default(),
        }
    }

    /// All known agent ids, including the default when not listed.
    pub fn known_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.list.iter().map(|e| e.id.clone()).collect();
        let default = self.default_id().to_string();
        if !ids.contains(&default) {
            ids.push(default);
        }
        ids
    }
}
