//! Session key computation.
//!
//! Keys have the structured form `agent:<AGENT_ID>:<CHANNEL>:<TYPE>:<PEER_ID>`
//! with the peer segment omitted for channel-scoped and global sessions.
//! The scope decides which parts of the inbound metadata participate, so
//! the same sender can map to one shared session or many isolated ones.

use bc_domain::config::DmScope;

/// The TYPE segment of a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Direct,
    Agent,
    Cron,
    Queue,
    Spawn,
    Boot,
    Heartbeat,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Direct => "direct",
            SessionType::Agent => "agent",
            SessionType::Cron => "cron",
            SessionType::Queue => "queue",
            SessionType::Spawn => "spawn",
            SessionType::Boot => "boot",
            SessionType::Heartbeat => "heartbeat",
        }
    }
}

/// Inbound fields that participate in key construction.
#[derive(Debug, Clone, Default)]
pub struct KeyParts<'a> {
    pub channel: &'a str,
    /// Canonical peer id (already identity-resolved).
    pub peer: &'a str,
    pub account_id: Option<&'a str>,
}

/// Compute the session key for a conversation under the given DM scope.
pub fn compute_session_key(agent_id: &str, scope: DmScope, parts: &KeyParts<'_>) -> String {
    let base = format!("agent:{agent_id}");
    let t = SessionType::Direct.as_str();

    match scope {
        DmScope::Global => format!("{base}:global:{t}"),
        DmScope::PerChannel => format!("{base}:{}:{t}", parts.channel),
        DmScope::PerPeer => format!("{base}:dm:{t}:{}", parts.peer),
        DmScope::PerSender | DmScope::PerChannelPeer => {
            format!("{base}:{}:{t}:{}", parts.channel, parts.peer)
        }
        DmScope::PerAccountChannelPeer => {
            let acct = parts.account_id.unwrap_or("default");
            format!("{base}:{}:{acct}:{t}:{}", parts.channel, parts.peer)
        }
    }
}

/// Key for a non-conversation session (cron runs, spawns, boot prompts).
pub fn system_session_key(agent_id: &str, stype: SessionType, suffix: &str) -> String {
    format!("agent:{agent_id}:{}:{suffix}", stype.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<'a>(channel: &'a str, peer: &'a str) -> KeyParts<'a> {
        KeyParts {
            channel,
            peer,
            account_id: None,
        }
    }

    #[test]
    fn global_scope_shares_one_session() {
        let key = compute_session_key("main", DmScope::Global, &parts("telegram", "alice"));
        assert_eq!(key, "agent:main:global:direct");
        let key2 = compute_session_key("main", DmScope::Global, &parts("discord", "bob"));
        assert_eq!(key, key2);
    }

    #[test]
    fn per_channel_omits_peer() {
        let key = compute_session_key("main", DmScope::PerChannel, &parts("slack", "alice"));
        assert_eq!(key, "agent:main:slack:direct");
    }

    #[test]
    fn per_peer_ignores_channel() {
        let a = compute_session_key("main", DmScope::PerPeer, &parts("telegram", "alice"));
        let b = compute_session_key("main", DmScope::PerPeer, &parts("discord", "alice"));
        assert_eq!(a, "agent:main:dm:direct:alice");
        assert_eq!(a, b);
    }

    #[test]
    fn per_channel_peer_isolates_by_both() {
        let key =
            compute_session_key("main", DmScope::PerChannelPeer, &parts("telegram", "alice"));
        assert_eq!(key, "agent:main:telegram:direct:alice");
    }

    #[test]
    fn per_account_channel_peer_adds_account() {
        let key = compute_session_key(
            "main",
            DmScope::PerAccountChannelPeer,
            &KeyParts {
                channel: "discord",
                peer: "alice",
                account_id: Some("bot2"),
            },
        );
        assert_eq!(key, "agent:main:discord:bot2:direct:alice");
    }

    #[test]
    fn system_keys_use_their_type_segment() {
        let key = system_session_key("main", SessionType::Cron, "job42:run:abc");
        assert_eq!(key, "agent:main:cron:job42:run:abc");
        let key = system_session_key("main", SessionType::Spawn, "s1");
        assert_eq!(key, "agent:main:spawn:s1");
    }
}
