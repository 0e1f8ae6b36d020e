//! The typed session log model.
//!
//! A session file is newline-delimited JSON. The first line is always the
//! `session` header; subsequent lines are messages, tool calls, and tool
//! results in strict arrival order. Every tool_result must reference a
//! tool_id introduced by an earlier tool_call in the same file.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use bc_domain::{Error, Result};

pub const SESSION_LOG_VERSION: u32 = 1;
pub const SESSION_ENGINE: &str = "bashclaw";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Assistant,
    Tool,
    System,
}

/// One line of a session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Milliseconds since the epoch.
    pub ts: i64,
    pub role: EntryRole,
    #[serde(flatten)]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    /// File header, always the first line.
    Session {
        id: String,
        version: u32,
        engine: String,
        timestamp: String,
    },
    Message {
        content: String,
        /// Set on the synthetic record a summary compaction leaves behind.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        compacted: bool,
    },
    ToolCall {
        tool_name: String,
        tool_id: String,
        tool_input: serde_json::Value,
    },
    ToolResult {
        tool_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl SessionEntry {
    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn header(session_id: &str) -> Self {
        Self {
            ts: Self::now_ms(),
            role: EntryRole::System,
            kind: EntryKind::Session {
                id: session_id.to_string(),
                version: SESSION_LOG_VERSION,
                engine: SESSION_ENGINE.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }

    pub fn message(role: EntryRole, content: impl Into<String>) -> Self {
        Self {
            ts: Self::now_ms(),
            role,
            kind: EntryKind::Message {
                content: content.into(),
                compacted: false,
            },
        }
    }

    pub fn compacted_summary(content: impl Into<String>) -> Self {
        Self {
            ts: Self::now_ms(),
            role: EntryRole::System,
            kind: EntryKind::Message {
                content: content.into(),
                compacted: true,
            },
        }
    }

    pub fn tool_call(tool_name: &str, tool_id: &str, tool_input: serde_json::Value) -> Self {
        Self {
            ts: Self::now_ms(),
            role: EntryRole::Assistant,
            kind: EntryKind::ToolCall {
                tool_name: tool_name.to_string(),
                tool_id: tool_id.to_string(),
                tool_input,
            },
        }
    }

    pub fn tool_result(tool_id: &str, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            ts: Self::now_ms(),
            role: EntryRole::Tool,
            kind: EntryKind::ToolResult {
                tool_id: tool_id.to_string(),
                content: content.into(),
                is_error,
            },
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self.kind, EntryKind::Session { .. })
    }

    /// Plain text content for message entries.
    pub fn message_text(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Message { content, .. } => Some(content),
            _ => None,
        }
    }
}

/// Parse a session log body into entries. Malformed lines are skipped with
/// a warning so one bad write never poisons a whole conversation.
pub fn parse_log(raw: &str) -> Vec<SessionEntry> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed session entry");
                None
            }
        })
        .collect()
}

/// Verify the structural invariants of a session log: header first, and
/// every tool_result referencing an earlier tool_call.
pub fn validate_entries(entries: &[SessionEntry]) -> Result<()> {
    if let Some(first) = entries.first() {
        if !first.is_header() {
            return Err(Error::SessionCorrupt(
                "first record is not a session header".into(),
            ));
        }
    }
    let mut seen_tool_ids = std::collections::HashSet::new();
    for entry in entries {
        match &entry.kind {
            EntryKind::ToolCall { tool_id, .. } => {
                seen_tool_ids.insert(tool_id.clone());
            }
            EntryKind::ToolResult { tool_id, .. } => {
                if !seen_tool_ids.contains(tool_id) {
                    return Err(Error::SessionCorrupt(format!(
                        "tool_result references unknown tool_id {tool_id}"
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_serializes_with_type_tag() {
        let header = SessionEntry::header("abc");
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"type\":\"session\""));
        assert!(json.contains("\"engine\":\"bashclaw\""));
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let header = serde_json::to_string(&SessionEntry::header("x")).unwrap();
        let msg =
            serde_json::to_string(&SessionEntry::message(EntryRole::User, "hi")).unwrap();
        let raw = format!("{header}\nnot-json\n{msg}\n");
        let entries = parse_log(&raw);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_header());
        assert_eq!(entries[1].message_text(), Some("hi"));
    }

    #[test]
    fn validate_accepts_ordered_tool_pairs() {
        let entries = vec![
            SessionEntry::header("s"),
            SessionEntry::message(EntryRole::User, "run it"),
            SessionEntry::tool_call("shell", "t1", serde_json::json!({"command": "ls"})),
            SessionEntry::tool_result("t1", "ok", false),
        ];
        assert!(validate_entries(&entries).is_ok());
    }

    #[test]
    fn validate_rejects_orphan_tool_result() {
        let entries = vec![
            SessionEntry::header("s"),
            SessionEntry::tool_result("ghost", "ok", false),
        ];
        assert!(validate_entries(&entries).is_err());
    }

    #[test]
    fn validate_rejects_missing_header() {
        let entries = vec![SessionEntry::message(EntryRole::User, "hi")];
        assert!(validate_entries(&entries).is_err());
    }

    #[test]
    fn compacted_flag_round_trips() {
        let entry = SessionEntry::compacted_summary("[Session compacted] stuff");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"compacted\":true"));
        let back: SessionEntry = serde_json::from_str(&json).unwrap();
        match back.kind {
            EntryKind::Message { compacted, .. } => assert!(compacted),
            _ => panic!("expected Message"),
        }
    }
}
