//! Seven-level destination resolution.
//!
//! Returns the agent id answering a message, from the most specific
//! binding (exact channel+peer) down to the configured default.

use bc_domain::config::Config;

use super::InboundMessage;

/// Resolve the destination agent for an inbound message.
///
/// Order: exact peer binding → parent-peer (thread inheritance) binding →
/// guild binding → team binding → account binding → channel binding or
/// channel default → `agents.defaultId`.
pub fn resolve_agent(config: &Config, msg: &InboundMessage) -> String {
    let bindings = &config.bindings;

    // 1. Exact channel + peer.
    if let Some(b) = bindings.iter().find(|b| {
        b.channel.as_deref() == Some(&msg.channel) && b.peer.as_deref() == Some(&msg.sender)
    }) {
        return b.agent_id.clone();
    }

    // 2. Channel + parent peer (threads inherit the parent's binding).
    if let Some(parent) = &msg.parent_peer {
        if let Some(b) = bindings.iter().find(|b| {
            b.channel.as_deref() == Some(&msg.channel)
                && b.peer.as_deref() == Some(parent.as_str())
        }) {
            return b.agent_id.clone();
        }
    }

    // 3. Guild.
    if let Some(guild) = &msg.guild {
        if let Some(b) = bindings
            .iter()
            .find(|b| b.guild.as_deref() == Some(guild.as_str()))
        {
            return b.agent_id.clone();
        }
    }

    // 4. Team.
    if let Some(team) = &msg.team {
        if let Some(b) = bindings
            .iter()
            .find(|b| b.team.as_deref() == Some(team.as_str()))
        {
            return b.agent_id.clone();
        }
    }

    // 5. Account id with no finer scoping.
    if let Some(account) = &msg.account_id {
        if let Some(b) = bindings.iter().find(|b| {
            b.account_id.as_deref() == Some(account.as_str())
                && b.peer.is_none()
                && b.guild.is_none()
                && b.team.is_none()
        }) {
            return b.agent_id.clone();
        }
    }

    // 6. Bare channel binding, else the channel's configured agent.
    if let Some(b) = bindings.iter().find(|b| {
        b.channel.as_deref() == Some(&msg.channel)
            && b.peer.is_none()
            && b.guild.is_none()
            && b.team.is_none()
            && b.account_id.is_none()
    }) {
        return b.agent_id.clone();
    }
    if let Some(agent_id) = config
        .channels
        .get(&msg.channel)
        .and_then(|c| c.agent_id.clone())
    {
        return agent_id;
    }

    // 7. Default.
    config.agents.default_id().to_string()
}
