//! Shared domain types for the BashClaw runtime: the error taxonomy, the
//! provider-agnostic message model, the normalized provider response, and
//! the typed configuration document.

pub mod config;
pub mod error;
pub mod message;
pub mod response;

pub use error::{is_overflow_message, Error, Result};
pub use message::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
pub use response::{ContentBlock, ProviderResponse, StopReason, TokenUsage};

/// Sentinel reply text meaning "deliver nothing to the transport".
pub const SILENT_REPLY: &str = "SILENT_REPLY";
