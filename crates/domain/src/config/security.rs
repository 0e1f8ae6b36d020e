//! Security configuration: elevation, rate limiting, deduplication.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Tools pre-authorized to run at elevated/dangerous levels.
    pub elevated_tools: Vec<String>,
    /// Per-sender token bucket: messages admitted per minute.
    pub rate_limit_per_minute: u32,
    /// Window within which identical (channel, sender, message) triples
    /// are collapsed into one turn.
    pub dedup_ttl_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            elevated_tools: Vec::new(),
            rate_limit_per_minute: 30,
            dedup_ttl_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SecurityConfig::default();
        assert_eq!(cfg.rate_limit_per_minute, 30);
        assert_eq!(cfg.dedup_ttl_ms, 60_000);
        assert!(cfg.elevated_tools.is_empty());
    }
}
