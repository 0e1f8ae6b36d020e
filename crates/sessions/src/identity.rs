//! Identity linking — collapse the same person across channels.
//!
//! An identity link maps several raw peers to one canonical identity so
//! "alice on Telegram" and "alice on Discord" can share one DM session.
//! Configured peers may be bare sender ids (`12345`) or channel-qualified
//! pairs (`telegram:12345`); the qualified form wins on conflict.

use std::collections::HashMap;

use bc_domain::config::IdentityLink;

/// Resolves `(channel, sender)` pairs to canonical identities.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    /// `channel:sender` or bare `sender` → canonical.
    map: HashMap<String, String>,
}

impl IdentityResolver {
    pub fn from_config(links: &[IdentityLink]) -> Self {
        let mut map = HashMap::new();
        for link in links {
            for peer in &link.peers {
                map.insert(peer.clone(), link.canonical.clone());
            }
        }
        Self { map }
    }

    /// Resolve a sender on a channel. Qualified (`channel:sender`) entries
    /// take precedence over bare sender entries; unmatched senders pass
    /// through unchanged.
    pub fn resolve(&self, channel: &str, sender: &str) -> String {
        let qualified = format!("{channel}:{sender}");
        if let Some(canonical) = self.map.get(&qualified) {
            tracing::debug!(sender, canonical = %canonical, "identity link resolved");
            return canonical.clone();
        }
        if let Some(canonical) = self.map.get(sender) {
            return canonical.clone();
        }
        sender.to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
