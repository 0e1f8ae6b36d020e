//! The runtime: queue engine, event queues, tool dispatch, compaction,
//! prompt assembly, spawns, and the agent turn loop.

pub mod compact;
pub mod dispatch;
pub mod events;
pub mod prompt;
pub mod queue;
pub mod spawn;
pub mod turn;

use bc_domain::{Message, Role};
use bc_sessions::transcript::{EntryKind, SessionEntry};
use bc_sessions::EntryRole;

/// Serialize session entries into provider messages with tool_call /
/// tool_result interleaving preserved. The header and unmatched records
/// are skipped.
pub(crate) fn entries_to_messages(entries: &[SessionEntry]) -> Vec<Message> {
    let mut messages = Vec::new();
    for entry in entries {
        match &entry.kind {
            EntryKind::Session { .. } => {}
            EntryKind::Message { content, .. } => {
                let role = match entry.role {
                    EntryRole::User => Role::User,
                    EntryRole::Assistant => Role::Assistant,
                    EntryRole::System => Role::System,
                    EntryRole::Tool => continue,
                };
                messages.push(Message {
                    role,
                    content: bc_domain::MessageContent::Text(content.clone()),
                });
            }
            EntryKind::ToolCall {
                tool_name,
                tool_id,
                tool_input,
            } => {
                messages.push(Message::assistant_with_calls(
                    "",
                    &[bc_domain::ToolCall {
                        tool_id: tool_id.clone(),
                        tool_name: tool_name.clone(),
                        tool_input: tool_input.clone(),
                    }],
                ));
            }
            EntryKind::ToolResult {
                tool_id,
                content,
                is_error,
            } => {
                messages.push(Message::tool_result(
                    tool_id.as_str(),
                    content.as_str(),
                    *is_error,
                ));
            }
        }
    }
    messages
}

/// Drop leading tool records so a windowed history never starts with a
/// tool_result that references a call outside the window.
pub(crate) fn trim_leading_tool_records(entries: Vec<SessionEntry>) -> Vec<SessionEntry> {
    let start = entries
        .iter()
        .position(|e| {
            matches!(
                e.kind,
                EntryKind::Message { .. } | EntryKind::Session { .. }
            )
        })
        .unwrap_or(entries.len());
    entries.into_iter().skip(start).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaving_is_preserved() {
        let entries = vec![
            SessionEntry::header("s"),
            SessionEntry::message(EntryRole::User, "run ls"),
            SessionEntry::tool_call("shell", "t1", serde_json::json!({"command": "ls"})),
            SessionEntry::tool_result("t1", "file.txt", false),
            SessionEntry::message(EntryRole::Assistant, "done"),
        ];
        let messages = entries_to_messages(&entries);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[3].role, Role::Assistant);
    }

    #[test]
    fn window_never_starts_with_tool_records() {
        let entries = vec![
            SessionEntry::tool_result("t0", "orphan", false),
            SessionEntry::tool_call("shell", "t1", serde_json::json!({})),
            SessionEntry::message(EntryRole::User, "hello"),
            SessionEntry::tool_call("shell", "t2", serde_json::json!({})),
        ];
        let trimmed = trim_leading_tool_records(entries);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].message_text(), Some("hello"));
    }
}
