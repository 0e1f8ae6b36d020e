//! File-backed state substrate.
//!
//! Everything BashClaw persists lives under one writable root in a fixed
//! directory tree. Mutations go through atomic-rename writes or exclusive
//! O_EXCL sentinel locks so a hard kill never leaves a partially written
//! file visible to readers.

pub mod atomic;
pub mod audit;
pub mod layout;
pub mod lock;
pub mod usage;

pub use atomic::{read_json, write_json_atomic};
pub use audit::AuditLog;
pub use layout::{safe_key, StateLayout};
pub use lock::{FileLock, LockOptions};
pub use usage::UsageLog;
