//! The consolidated cron job store (`cron/jobs.json`).
//!
//! Legacy per-file jobs (`cron/<id>.json`) are migrated into the
//! consolidated document on first load. Writes go through an O_EXCL
//! sentinel with a 10 s stale-lock override. Each run appends to the
//! per-job run log (rotated at 5 MB keeping the last 1000 lines) and a
//! global history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bc_domain::{Error, Result};
use bc_state::{read_json, write_json_atomic, FileLock, StateLayout};

use super::cron::{cron_next, parse_tz};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failure backoff steps in seconds, capped at one hour.
pub const BACKOFF_STEPS_SECS: &[u64] = &[30, 60, 300, 900, 3600];
const RUN_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const RUN_LOG_KEEP_LINES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobSchedule {
    /// One-shot at an ISO timestamp; never re-runs once `lastRunAt` is set.
    At { at: DateTime<Utc> },
    /// Fixed interval; first run fires immediately.
    Every {
        #[serde(rename = "everyMs")]
        every_ms: u64,
    },
    /// 5-field cron expression.
    Cron { expr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionTarget {
    Main,
    #[default]
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub schedule: JobSchedule,
    pub prompt: String,
    #[serde(default)]
    pub session_target: SessionTarget,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub backoff_until: Option<DateTime<Utc>>,
    /// Agent the job runs as; the default agent when unset.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Deliver isolated-run results into the main session's event queue.
    #[serde(default)]
    pub deliver: bool,
}

fn d_true() -> bool {
    true
}

impl CronJob {
    pub fn new(
        id: &str,
        schedule: JobSchedule,
        prompt: &str,
        session_target: SessionTarget,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            schedule,
            prompt: prompt.to_string(),
            session_target,
            enabled: true,
            failure_count: 0,
            last_run_at: None,
            last_result: None,
            backoff_until: None,
            agent_id,
            deliver: false,
        }
    }

    /// When the job should next run, or `None` for a spent one-shot.
    pub fn next_run(&self, now: &DateTime<Utc>, timezone: &str) -> Option<DateTime<Utc>> {
        match &self.schedule {
            JobSchedule::At { at } => {
                if self.last_run_at.is_some() {
                    None
                } else {
                    Some(*at)
                }
            }
            JobSchedule::Every { every_ms } => match self.last_run_at {
                Some(last) => Some(last + chrono::Duration::milliseconds(*every_ms as i64)),
                None => Some(*now),
            },
            JobSchedule::Cron { expr } => {
                let anchor = self.last_run_at.unwrap_or(*now - chrono::Duration::minutes(1));
                cron_next(expr, &anchor, parse_tz(timezone))
            }
        }
    }

    /// Due = next-run reached and not in backoff.
    pub fn is_due(&self, now: &DateTime<Utc>, timezone: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(until) = self.backoff_until {
            if until > *now {
                return false;
            }
        }
        match self.next_run(now, timezone) {
            Some(next) => next <= *now,
            None => false,
        }
    }
}

/// Backoff for the n-th consecutive failure (1-based).
pub fn backoff_duration(failure_count: u32) -> chrono::Duration {
    let idx = (failure_count.saturating_sub(1) as usize).min(BACKOFF_STEPS_SECS.len() - 1);
    chrono::Duration::seconds(BACKOFF_STEPS_SECS[idx] as i64)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JobStore {
    layout: StateLayout,
}

impl JobStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    fn lock_path(&self) -> std::path::PathBuf {
        self.layout.cron_dir().join("jobs.lock")
    }

    /// Take the store lock: O_EXCL with a 10 s stale-lock override (age
    /// based, unlike the PID-based queue reaping).
    fn take_lock(&self) -> Result<FileLock> {
        let path = self.lock_path();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(12);
        loop {
            if let Some(lock) = FileLock::try_acquire(&path)? {
                return Ok(lock);
            }
            let age = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok());
            if age.map(|a| a.as_secs() >= 10).unwrap_or(false) {
                let _ = std::fs::remove_file(&path);
                continue;
            }
            if std::time::Instant::now() >= deadline {
                return Err(Error::QueueTimeout("cron store lock".into()));
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }

    /// Load all jobs, migrating legacy per-file inputs on first read.
    pub fn list(&self) -> Result<Vec<CronJob>> {
        let jobs_file = self.layout.cron_jobs_file();
        let mut jobs: Vec<CronJob> = read_json(&jobs_file)?.unwrap_or_default();

        // Legacy migration: cron/<id>.json (anything but jobs.json).
        let mut migrated = false;
        if let Ok(entries) = std::fs::read_dir(self.layout.cron_dir()) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.ends_with(".json") || name == "jobs.json" || path.is_dir() {
                    continue;
                }
                if let Ok(Some(job)) = read_json::<CronJob>(&path) {
                    if !jobs.iter().any(|j| j.id == job.id) {
                        tracing::info!(job_id = %job.id, "migrating legacy cron job file");
                        jobs.push(job);
                        migrated = true;
                    }
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        if migrated {
            let _lock = self.take_lock()?;
            write_json_atomic(&jobs_file, &jobs)?;
        }
        Ok(jobs)
    }

    pub fn get(&self, id: &str) -> Result<Option<CronJob>> {
        Ok(self.list()?.into_iter().find(|j| j.id == id))
    }

    pub fn add(&self, job: CronJob) -> Result<()> {
        let _lock = self.take_lock()?;
        let mut jobs: Vec<CronJob> =
            read_json(&self.layout.cron_jobs_file())?.unwrap_or_default();
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(Error::ConfigInvalid(format!(
                "cron job '{}' already exists",
                job.id
            )));
        }
        jobs.push(job);
        write_json_atomic(&self.layout.cron_jobs_file(), &jobs)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let _lock = self.take_lock()?;
        let mut jobs: Vec<CronJob> =
            read_json(&self.layout.cron_jobs_file())?.unwrap_or_default();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        let removed = jobs.len() != before;
        write_json_atomic(&self.layout.cron_jobs_file(), &jobs)?;
        Ok(removed)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        self.update(id, |job| job.enabled = enabled)
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut CronJob)) -> Result<bool> {
        let _lock = self.take_lock()?;
        let mut jobs: Vec<CronJob> =
            read_json(&self.layout.cron_jobs_file())?.unwrap_or_default();
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(false);
        };
        f(job);
        write_json_atomic(&self.layout.cron_jobs_file(), &jobs)?;
        Ok(true)
    }

    /// Record a run outcome: status fields, backoff, run log, history.
    pub fn record_run(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
        success: bool,
        output: &str,
    ) -> Result<()> {
        let now = Utc::now();
        self.update(id, |job| {
            job.last_run_at = Some(now);
            job.last_result = Some(output.chars().take(500).collect());
            if success {
                job.failure_count = 0;
                job.backoff_until = None;
            } else {
                job.failure_count += 1;
                job.backoff_until = Some(now + backoff_duration(job.failure_count));
            }
        })?;

        let record = RunRecord {
            job_id: id.to_string(),
            started_at,
            success,
            output: output.chars().take(2000).collect(),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        };
        let log_path = self.layout.cron_run_log(id);
        bc_state::atomic::append_jsonl(&log_path, &record)?;
        rotate_if_needed(&log_path)?;
        bc_state::atomic::append_jsonl(
            &self.layout.cron_dir().join("history.jsonl"),
            &record,
        )?;
        Ok(())
    }

    /// The last `tail` run records for a job.
    pub fn read_runs(&self, id: &str, tail: usize) -> Result<Vec<RunRecord>> {
        let raw = match std::fs::read_to_string(self.layout.cron_run_log(id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<RunRecord> = raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let skip = records.len().saturating_sub(tail);
        Ok(records.into_iter().skip(skip).collect())
    }
}

/// Keep the run log under 5 MB by retaining the last 1000 lines.
fn rotate_if_needed(path: &std::path::Path) -> Result<()> {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size <= RUN_LOG_MAX_BYTES {
        return Ok(());
    }
    let raw = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = raw.lines().collect();
    let skip = lines.len().saturating_sub(RUN_LOG_KEEP_LINES);
    let tail = lines[skip..].join("\n");
    bc_state::atomic::write_bytes_atomic(path, format!("{tail}\n").as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path()).unwrap();
        (dir, JobStore::new(layout))
    }

    fn every_job(id: &str, ms: u64) -> CronJob {
        CronJob::new(
            id,
            JobSchedule::Every { every_ms: ms },
            "ping",
            SessionTarget::Isolated,
            None,
        )
    }

    #[test]
    fn add_list_remove() {
        let (_dir, store) = store();
        store.add(every_job("j1", 60_000)).unwrap();
        store.add(every_job("j2", 120_000)).unwrap();
        assert!(store.add(every_job("j1", 1)).is_err(), "duplicate id");

        assert_eq!(store.list().unwrap().len(), 2);
        assert!(store.remove("j1").unwrap());
        assert!(!store.remove("j1").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn every_schedule_due_immediately_then_spaced() {
        let now = Utc::now();
        let mut job = every_job("j", 60_000);
        assert!(job.is_due(&now, "UTC"));

        job.last_run_at = Some(now);
        assert!(!job.is_due(&now, "UTC"));
        let later = now + chrono::Duration::milliseconds(61_000);
        assert!(job.is_due(&later, "UTC"));
    }

    #[test]
    fn at_schedule_is_one_shot() {
        let now = Utc::now();
        let mut job = CronJob::new(
            "once",
            JobSchedule::At {
                at: now - chrono::Duration::minutes(1),
            },
            "p",
            SessionTarget::Main,
            None,
        );
        assert!(job.is_due(&now, "UTC"));
        job.last_run_at = Some(now);
        assert!(!job.is_due(&(now + chrono::Duration::days(1)), "UTC"));
    }

    #[test]
    fn backoff_steps_and_cap() {
        assert_eq!(backoff_duration(1).num_seconds(), 30);
        assert_eq!(backoff_duration(2).num_seconds(), 60);
        assert_eq!(backoff_duration(3).num_seconds(), 300);
        assert_eq!(backoff_duration(4).num_seconds(), 900);
        assert_eq!(backoff_duration(5).num_seconds(), 3600);
        assert_eq!(backoff_duration(50).num_seconds(), 3600);
    }

    #[test]
    fn record_run_tracks_failures_and_resets() {
        let (_dir, store) = store();
        store.add(every_job("j", 60_000)).unwrap();
        let start = Utc::now();

        store.record_run("j", start, false, "boom").unwrap();
        store.record_run("j", start, false, "boom again").unwrap();
        let job = store.get("j").unwrap().unwrap();
        assert_eq!(job.failure_count, 2);
        assert!(job.backoff_until.is_some());

        store.record_run("j", start, true, "ok").unwrap();
        let job = store.get("j").unwrap().unwrap();
        assert_eq!(job.failure_count, 0);
        assert!(job.backoff_until.is_none());

        let runs = store.read_runs("j", 10).unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs[2].success);
    }

    #[test]
    fn backoff_defers_due() {
        let now = Utc::now();
        let mut job = every_job("j", 1);
        job.last_run_at = Some(now - chrono::Duration::minutes(5));
        job.backoff_until = Some(now + chrono::Duration::minutes(5));
        assert!(!job.is_due(&now, "UTC"));
        job.backoff_until = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_due(&now, "UTC"));
    }

    #[test]
    fn legacy_files_are_migrated() {
        let (_dir, store) = store();
        let legacy = every_job("legacy-1", 60_000);
        write_json_atomic(
            &store.layout.cron_dir().join("legacy-1.json"),
            &legacy,
        )
        .unwrap();

        let jobs = store.list().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "legacy-1");
        // Legacy file removed; consolidated store has it.
        assert!(!store.layout.cron_dir().join("legacy-1.json").exists());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn schedule_serde_uses_kind_tags() {
        let json = serde_json::json!({"kind": "every", "everyMs": 60000});
        let schedule: JobSchedule = serde_json::from_value(json).unwrap();
        assert_eq!(schedule, JobSchedule::Every { every_ms: 60000 });

        let json = serde_json::json!({"kind": "cron", "expr": "*/5 * * * *"});
        let schedule: JobSchedule = serde_json::from_value(json).unwrap();
        assert!(matches!(schedule, JobSchedule::Cron { .. }));
    }
}
