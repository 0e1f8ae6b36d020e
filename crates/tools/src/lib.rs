//! Built-in tool capabilities: the registry of tool metadata, policy
//! filtering, and the handlers that do not need runtime state (shell,
//! web, files). Runtime-coupled tools (memory, cron, agent_message,
//! spawn) are dispatched by the gateway.

pub mod files;
pub mod policy;
pub mod registry;
pub mod shell;
pub mod web;

pub use policy::{elevation_admits, filter_tools, Elevation};
pub use registry::{builtin_tools, to_definitions, ToolMeta};
