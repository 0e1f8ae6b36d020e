//! Session persistence: key computation, identity canonicalization,
//! append-only JSONL transcripts with sidecar metadata.

pub mod identity;
pub mod key;
pub mod meta;
pub mod store;
pub mod transcript;

pub use identity::IdentityResolver;
pub use key::{compute_session_key, SessionType};
pub use meta::SessionMeta;
pub use store::SessionStore;
pub use transcript::{EntryKind, EntryRole, SessionEntry};
