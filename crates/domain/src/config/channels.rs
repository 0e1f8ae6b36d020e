//! Channel, binding, and identity-link configuration.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Policy applied to direct messages on a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    #[default]
    Open,
    Allowlist,
    Pairing,
}

/// Policy applied to group messages on a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupPolicy {
    #[default]
    Open,
    MentionOnly,
    Disabled,
}

/// A pattern-based auto-reply rule. `pattern` is a pipe-separated list of
/// fixed strings matched case-insensitively against the message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoReply {
    pub pattern: String,
    pub response: String,
}

impl AutoReply {
    /// Check whether any alternative of the pattern occurs in `text`.
    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.pattern
            .split('|')
            .map(|alt| alt.trim().to_lowercase())
            .filter(|alt| !alt.is_empty())
            .any(|alt| lower.contains(&alt))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Agent answering this channel when no binding matches.
    pub agent_id: Option<String>,
    /// Bot display name, used by the mention-only gate.
    pub bot_name: String,
    pub dm_policy: DmPolicy,
    pub group_policy: GroupPolicy,
    /// Senders admitted under the `allowlist` DM policy.
    pub allowlist: Vec<String>,
    /// Per-sender debounce window; 0 disables.
    pub debounce_ms: u64,
    /// Override for the outbound chunk size.
    pub text_limit: Option<usize>,
    pub auto_replies: Vec<AutoReply>,
}

/// Outbound text limit for a channel, by well-known name.
pub fn channel_text_limit(channel: &str, cfg: Option<&ChannelConfig>) -> usize {
    if let Some(limit) = cfg.and_then(|c| c.text_limit) {
        return limit;
    }
    match channel {
        "telegram" => 4096,
        "discord" => 2000,
        "slack" => 40000,
        "feishu" => 30000,
        "web" => 100_000,
        _ => 4096,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bindings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One destination-resolution rule. The most specific populated field wins;
/// see the seven-level resolution order in the routing module.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Binding {
    pub channel: Option<String>,
    pub peer: Option<String>,
    pub guild: Option<String>,
    pub team: Option<String>,
    pub account_id: Option<String>,
    pub agent_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity links
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collapses multiple `(channel, sender)` pairs into one canonical identity.
/// Peers may be bare sender ids or `channel:sender` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLink {
    pub canonical: String,
    pub peers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_reply_matches_any_alternative() {
        let rule = AutoReply {
            pattern: "ping|hello there".into(),
            response: "pong".into(),
        };
        assert!(rule.matches("PING from ops"));
        assert!(rule.matches("well, Hello There"));
        assert!(!rule.matches("goodbye"));
    }

    #[test]
    fn auto_reply_ignores_empty_alternatives() {
        let rule = AutoReply {
            pattern: "|status".into(),
            response: "ok".into(),
        };
        assert!(rule.matches("status?"));
        assert!(!rule.matches("anything else"));
    }

    #[test]
    fn text_limits_per_channel() {
        assert_eq!(channel_text_limit("telegram", None), 4096);
        assert_eq!(channel_text_limit("discord", None), 2000);
        assert_eq!(channel_text_limit("slack", None), 40000);
        assert_eq!(channel_text_limit("unknown", None), 4096);

        let cfg = ChannelConfig {
            text_limit: Some(500),
            ..Default::default()
        };
        assert_eq!(channel_text_limit("telegram", Some(&cfg)), 500);
    }

    #[test]
    fn group_policy_kebab_case() {
        let p: GroupPolicy = serde_json::from_str("\"mention-only\"").unwrap();
        assert_eq!(p, GroupPolicy::MentionOnly);
    }
}
