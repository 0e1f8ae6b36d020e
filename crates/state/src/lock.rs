//! O_EXCL sentinel file locks.
//!
//! A lock is a file created with `create_new` whose content is the holder's
//! PID. Contention polls once per second up to a 300 second ceiling. A
//! sentinel whose PID is no longer alive is stale and may be removed once
//! by a waiter; the waiter then retries the exclusive create rather than
//! assuming ownership.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bc_domain::{Error, Result};

/// Acquisition parameters. The defaults match the queue contract:
/// 1 s poll, 300 s absolute timeout.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub poll: Duration,
    pub timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

/// A held sentinel lock. Dropping it removes the sentinel file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    released: bool,
}

impl FileLock {
    /// Try to acquire the lock without waiting.
    pub fn try_acquire(path: &Path) -> Result<Option<FileLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                use std::io::Write;
                write!(file, "{}", std::process::id())?;
                Ok(Some(FileLock {
                    path: path.to_path_buf(),
                    released: false,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire the lock, waiting with the configured poll interval. Reaps a
    /// stale sentinel (dead holder PID) at most once per waiting cycle.
    pub async fn acquire(path: &Path, opts: LockOptions) -> Result<FileLock> {
        let deadline = Instant::now() + opts.timeout;
        let mut reaped = false;

        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }

            if !reaped && reap_if_stale(path)? {
                reaped = true;
                continue;
            }

            if Instant::now() >= deadline {
                return Err(Error::QueueTimeout(format!(
                    "lock {} not acquired within {:?}",
                    path.display(),
                    opts.timeout
                )));
            }
            tokio::time::sleep(opts.poll).await;
        }
    }

    /// The PID recorded in a sentinel file, if readable.
    pub fn holder_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly (also happens on drop).
    pub fn release(mut self) {
        self.remove_sentinel();
        self.released = true;
    }

    fn remove_sentinel(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove lock sentinel"
                );
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            self.remove_sentinel();
            self.released = true;
        }
    }
}

/// Check whether a PID refers to a live process.
pub fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes existence without signalling. EPERM still means
    // the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Remove a sentinel whose holder PID is dead. Returns `true` when a stale
/// sentinel was removed.
pub fn reap_if_stale(path: &Path) -> Result<bool> {
    match FileLock::holder_pid(path) {
        Some(pid) if pid_alive(pid) => Ok(false),
        Some(pid) => {
            tracing::info!(path = %path.display(), pid, "reaping stale lock");
            match std::fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e.into()),
            }
        }
        // Unreadable/empty sentinel: the writer may be mid-create. Leave it.
        None => Ok(false),
    }
}
