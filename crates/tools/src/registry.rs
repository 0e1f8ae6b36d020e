//! The built-in tool table: names, descriptions, input schemas, flags.

use bc_domain::ToolDefinition;

use crate::policy::Elevation;

/// Metadata for one registered tool.
#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: serde_json::Value,
    /// Optional tools are excluded from every profile unless an agent's
    /// allow list names them explicitly.
    pub optional: bool,
    pub elevation: Elevation,
}

/// All built-in tools, in stable order.
pub fn builtin_tools() -> Vec<ToolMeta> {
    vec![
        ToolMeta {
            name: "web_fetch",
            description: "Fetch a URL over HTTP GET and return the (truncated) body.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to fetch"},
                    "maxChars": {"type": "integer", "description": "Truncate the body to this many characters"}
                },
                "required": ["url"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "web_search",
            description: "Search the web and return normalized results.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "count": {"type": "integer", "minimum": 1, "maximum": 10}
                },
                "required": ["query"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "shell",
            description: "Run a shell command and return its output and exit code.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout": {"type": "integer", "description": "Seconds before the command is killed"}
                },
                "required": ["command"]
            }),
            optional: true,
            elevation: Elevation::Elevated,
        },
        ToolMeta {
            name: "memory",
            description: "Store and retrieve durable key/value memories; search uses ranked text matching.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["get", "set", "delete", "list", "search"]},
                    "key": {"type": "string"},
                    "value": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "query": {"type": "string"}
                },
                "required": ["action"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "cron",
            description: "Manage scheduled jobs: list, add, remove, enable, disable.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["list", "add", "remove", "enable", "disable"]},
                    "id": {"type": "string"},
                    "schedule": {"type": "object", "description": "{kind: at|every|cron, at?, everyMs?, expr?}"},
                    "prompt": {"type": "string"},
                    "sessionTarget": {"type": "string", "enum": ["main", "isolated"]}
                },
                "required": ["action"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "read_file",
            description: "Read a text file, optionally from a line offset with a line limit.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer", "minimum": 1},
                    "limit": {"type": "integer", "maximum": 2000}
                },
                "required": ["path"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "write_file",
            description: "Write or append to a file, creating parent directories.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "append": {"type": "boolean"}
                },
                "required": ["path", "content"]
            }),
            optional: true,
            elevation: Elevation::Elevated,
        },
        ToolMeta {
            name: "list_files",
            description: "List a directory, optionally filtered by a substring pattern, optionally recursive.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "pattern": {"type": "string"},
                    "recursive": {"type": "boolean"}
                },
                "required": ["path"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "file_search",
            description: "Search files by name and/or content beneath a directory.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "name": {"type": "string"},
                    "content": {"type": "string"},
                    "maxResults": {"type": "integer"}
                },
                "required": ["path"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "agent_message",
            description: "Send a message to another configured agent and return its reply.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "target_agent": {"type": "string"},
                    "message": {"type": "string"},
                    "from_agent": {"type": "string"}
                },
                "required": ["target_agent", "message"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "spawn",
            description: "Start a background task turn and return its id immediately.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "label": {"type": "string"}
                },
                "required": ["task"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
        ToolMeta {
            name: "spawn_status",
            description: "Check the status and result of a spawned background task.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string"}
                },
                "required": ["task_id"]
            }),
            optional: false,
            elevation: Elevation::None,
        },
    ]
}

/// Convert metadata to the wire-facing tool definitions.
pub fn to_definitions(tools: &[ToolMeta]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name.to_string(),
            description: t.description.to_string(),
            input_schema: t.input_schema.clone(),
        })
        .collect()
}
