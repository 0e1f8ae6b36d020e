//! Scheduler configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CronConfig {
    /// Lane slots older than this are considered stuck and released.
    pub stuck_run_ms: u64,
    /// Isolated cron sessions older than this are deleted.
    pub session_retention_ms: u64,
    /// Hard timeout for one isolated job run.
    pub job_timeout_ms: u64,
    /// IANA timezone cron expressions are evaluated in.
    pub timezone: String,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            stuck_run_ms: 2 * 60 * 60 * 1000,
            session_retention_ms: 24 * 60 * 60 * 1000,
            job_timeout_ms: 10 * 60 * 1000,
            timezone: "UTC".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CronConfig::default();
        assert_eq!(cfg.stuck_run_ms, 7_200_000);
        assert_eq!(cfg.session_retention_ms, 86_400_000);
        assert_eq!(cfg.job_timeout_ms, 600_000);
    }
}
