//! Session compaction — rewrites the log in place when the estimated
//! token count crosses the threshold or the provider reports overflow.
//!
//! Two modes: *truncate* keeps the newest records within the reserve
//! budget; *summary* replaces the oldest 80% with one synthetic
//! `[Session compacted]` record produced by the same provider. A failed
//! summarizer falls back to truncate. Every rewrite bumps
//! `compactionCount`.

use std::sync::Arc;

use bc_domain::{Message, Result};
use bc_providers::{ChatRequest, Provider};
use bc_sessions::transcript::{EntryKind, SessionEntry};

use crate::hooks::HookEvent;
use crate::state::Runtime;

/// Minimum records the tail keeps after either mode.
pub const MIN_KEPT_RECORDS: usize = 6;
const SUMMARY_MAX_TOKENS: u32 = 2048;
const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Whether the pre-turn compaction trigger fires.
pub fn should_compact(estimated_tokens: u64, context_window: u64, threshold: f64) -> bool {
    (estimated_tokens as f64) > (context_window as f64) * threshold
}

fn entry_chars(entry: &SessionEntry) -> usize {
    match &entry.kind {
        EntryKind::Message { content, .. } => content.len(),
        EntryKind::ToolResult { content, .. } => content.len(),
        EntryKind::ToolCall { tool_input, .. } => tool_input.to_string().len(),
        EntryKind::Session { .. } => 0,
    }
}

/// Truncate selection: keep the newest N body records whose total chars
/// fit the reserve budget, halving from len/2 downward, floor
/// [`MIN_KEPT_RECORDS`].
pub fn truncate_selection(body: &[SessionEntry], reserve_chars: usize) -> &[SessionEntry] {
    let mut keep = (body.len() / 2).max(MIN_KEPT_RECORDS);
    loop {
        let start = body.len().saturating_sub(keep);
        let total: usize = body[start..].iter().map(entry_chars).sum();
        if total <= reserve_chars || keep <= MIN_KEPT_RECORDS {
            return &body[start..];
        }
        keep /= 2;
        if keep < MIN_KEPT_RECORDS {
            keep = MIN_KEPT_RECORDS;
        }
    }
}

fn render_for_summary(entries: &[SessionEntry]) -> String {
    let mut buf = String::new();
    for entry in entries {
        let (label, content) = match &entry.kind {
            EntryKind::Message { content, .. } => {
                let label = match entry.role {
                    bc_sessions::EntryRole::User => "User",
                    bc_sessions::EntryRole::Assistant => "Assistant",
                    _ => "System",
                };
                (label, content.clone())
            }
            EntryKind::ToolCall {
                tool_name,
                tool_input,
                ..
            } => ("ToolCall", format!("{tool_name} {tool_input}")),
            EntryKind::ToolResult { content, .. } => ("ToolResult", content.clone()),
            EntryKind::Session { .. } => continue,
        };
        buf.push_str(label);
        buf.push_str(": ");
        // Long tool output gets clipped so the summary prompt stays sane.
        if content.len() > 2000 {
            buf.push_str(&content[..1000]);
            buf.push_str(" [...] ");
        } else {
            buf.push_str(&content);
        }
        buf.push('\n');
    }
    buf
}

const SUMMARIZER_PROMPT: &str = "You are a conversation summarizer. Summarize the \
conversation below, preserving: the current goal, key decisions, open questions, \
important facts about the user, and any pending tool state. Be concise, write in \
present tense, omit pleasantries.";

/// Run summary compaction; fall back to truncate when the summarizer
/// errors. Returns the summary text (empty for truncate).
pub async fn compact_session(
    rt: &Runtime,
    provider: &Arc<dyn Provider>,
    model: &str,
    session_key: &str,
) -> Result<String> {
    let config = rt.config.snapshot();
    rt.hooks
        .dispatch(
            HookEvent::BeforeCompaction,
            serde_json::json!({"sessionKey": session_key}),
        )
        .await;

    let entries = rt.sessions.load(session_key)?;
    let (header, body): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_header());

    if body.len() <= MIN_KEPT_RECORDS {
        // Too small to compact; leave the log untouched.
        return Ok(String::new());
    }

    // Oldest 80% summarized; newest 20% (>= MIN_KEPT_RECORDS) kept.
    let tail_len = (body.len() / 5).max(MIN_KEPT_RECORDS).min(body.len());
    let split = body.len() - tail_len;
    let (old, tail) = body.split_at(split);

    let summary = if old.is_empty() {
        Err(bc_domain::Error::Other("nothing to summarize".into()))
    } else {
        summarize(provider, model, old).await
    };

    let mut new_entries: Vec<SessionEntry> = Vec::new();
    new_entries.extend(header.into_iter().take(1));

    let summary_text = match summary {
        Ok(text) if !text.trim().is_empty() => {
            new_entries.push(SessionEntry::compacted_summary(format!(
                "[Session compacted] {}",
                text.trim()
            )));
            new_entries.extend(tail.iter().cloned());
            text
        }
        _ => {
            // Truncate fallback.
            let reserve_chars = (config.session.reserve_tokens as usize) * 4;
            let kept = truncate_selection(&body, reserve_chars);
            new_entries.extend(kept.iter().cloned());
            String::new()
        }
    };

    rt.sessions.rewrite(session_key, &new_entries, true)?;

    rt.hooks
        .dispatch(
            HookEvent::AfterCompaction,
            serde_json::json!({
                "sessionKey": session_key,
                "summaryChars": summary_text.len(),
            }),
        )
        .await;

    tracing::info!(session_key, summary_chars = summary_text.len(), "session compacted");
    Ok(summary_text)
}

async fn summarize(
    provider: &Arc<dyn Provider>,
    model: &str,
    entries: &[SessionEntry],
) -> Result<String> {
    let conversation = render_for_summary(entries);
    let req = ChatRequest {
        model: model.to_string(),
        system: Some(SUMMARIZER_PROMPT.to_string()),
        messages: vec![Message::user(format!("CONVERSATION:\n{conversation}"))],
        tools: vec![],
        max_tokens: SUMMARY_MAX_TOKENS,
        temperature: Some(SUMMARY_TEMPERATURE),
    };
    let resp = provider.complete(&req).await?;
    Ok(resp.text())
}
