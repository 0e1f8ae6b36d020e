//! Live configuration handle.
//!
//! Readers get a cheap `Arc<Config>` snapshot; the handle re-stats the
//! file on access and reparses when the mtime changes. SIGUSR1 forces a
//! reload through [`ConfigHandle::force_reload`]. Writers rename-swap the
//! document, so a reader never observes a half-written file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use bc_domain::config::Config;
use bc_domain::Result;

pub const CONFIG_FILE: &str = "bashclaw.json";
pub const MODELS_FILE: &str = "models.json";

struct Cached {
    config: Arc<Config>,
    mtime: Option<SystemTime>,
}

pub struct ConfigHandle {
    path: PathBuf,
    cached: RwLock<Cached>,
}

impl ConfigHandle {
    /// Load (or default) the config at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (config, mtime) = read_config(&path)?;
        Ok(Self {
            path,
            cached: RwLock::new(Cached {
                config: Arc::new(config),
                mtime,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot; reparses when the file's mtime moved.
    pub fn snapshot(&self) -> Arc<Config> {
        let current_mtime = file_mtime(&self.path);
        {
            let cached = self.cached.read();
            if cached.mtime == current_mtime {
                return cached.config.clone();
            }
        }
        match read_config(&self.path) {
            Ok((config, mtime)) => {
                let config = Arc::new(config);
                let mut cached = self.cached.write();
                cached.config = config.clone();
                cached.mtime = mtime;
                tracing::info!(path = %self.path.display(), "config reloaded (mtime change)");
                config
            }
            Err(e) => {
                tracing::warn!(error = %e, "config reload failed; keeping previous snapshot");
                self.cached.read().config.clone()
            }
        }
    }

    /// Unconditional reload (SIGUSR1 path). Returns the fresh snapshot.
    pub fn force_reload(&self) -> Result<Arc<Config>> {
        let (config, mtime) = read_config(&self.path)?;
        let config = Arc::new(config);
        let mut cached = self.cached.write();
        cached.config = config.clone();
        cached.mtime = mtime;
        tracing::info!(path = %self.path.display(), "config reloaded (forced)");
        Ok(config)
    }

    /// Persist a new document (rename-swap) and refresh the cache.
    pub fn write(&self, config: &Config) -> Result<()> {
        config.ensure_valid()?;
        bc_state::write_json_atomic(&self.path, config)?;
        self.force_reload()?;
        Ok(())
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_config(path: &Path) -> Result<(Config, Option<SystemTime>)> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let config = Config::from_json_str(&raw)?;
            config.ensure_valid()?;
            Ok((config, file_mtime(path)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok((Config::default(), None))
        }
        Err(e) => Err(e.into()),
    }
}
