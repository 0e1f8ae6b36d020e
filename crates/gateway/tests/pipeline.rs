//! End-to-end pipeline tests over a temp state root and a scripted
//! provider: inbound routing, the tool loop, busy handling, the danger
//! and SSRF guards, and compaction.

use std::sync::Arc;

use bc_domain::config::{AgentsConfig, LaneType};
use bc_gateway::config::ConfigHandle;
use bc_gateway::routing::{process_inbound, InboundMessage};
use bc_gateway::runtime::compact;
use bc_gateway::runtime::dispatch::dispatch_tool;
use bc_gateway::state::Runtime;
use bc_providers::MockProvider;
use bc_sessions::transcript::EntryKind;
use bc_sessions::EntryRole;

fn runtime_with_mock() -> (tempfile::TempDir, Runtime, MockProvider) {
    let dir = tempfile::tempdir().unwrap();
    let handle = Arc::new(ConfigHandle::load(dir.path().join("bashclaw.json")).unwrap());
    let rt = Runtime::with_root(handle, dir.path()).unwrap();

    let mock = MockProvider::new("anthropic");
    rt.providers.install("anthropic", Arc::new(mock.clone()));
    (dir, rt, mock)
}

fn inbound(text: &str) -> InboundMessage {
    InboundMessage {
        channel: "web".into(),
        sender: "tester".into(),
        text: text.into(),
        ..Default::default()
    }
}

// ── S1: simple question over the default channel ──────────────────

#[tokio::test]
async fn fresh_message_produces_one_turn() {
    let (_dir, rt, mock) = runtime_with_mock();
    mock.push_text("2+2 = 4");

    let reply = process_inbound(&rt, inbound("What is 2+2?"))
        .await
        .unwrap()
        .expect("expected a reply");
    assert_eq!(reply.chunks.len(), 1);
    assert!(reply.chunks[0].contains('4'));
    assert_eq!(mock.call_count(), 1, "exactly one provider call");

    // Session file: header, user record, assistant record.
    let session_key = "agent:main:dm:direct:tester";
    let entries = rt.sessions.load(session_key).unwrap();
    assert!(entries[0].is_header());
    assert_eq!(entries[1].role, EntryRole::User);
    assert_eq!(entries[1].message_text(), Some("What is 2+2?"));
    assert_eq!(entries[2].role, EntryRole::Assistant);
    assert!(entries[2].message_text().unwrap().contains('4'));
    bc_sessions::transcript::validate_entries(&entries).unwrap();
}

// ── Tool loop: call → result → final ──────────────────────────────

#[tokio::test]
async fn tool_loop_interleaves_calls_and_results() {
    let (_dir, rt, mock) = runtime_with_mock();
    mock.push_tool_call(
        "toolu_1",
        "memory",
        serde_json::json!({"action": "set", "key": "color", "value": "teal"}),
    );
    mock.push_text("Saved your favorite color.");

    let reply = process_inbound(&rt, inbound("remember my favorite color is teal"))
        .await
        .unwrap()
        .expect("expected a reply");
    assert!(reply.chunks[0].contains("Saved"));
    assert_eq!(mock.call_count(), 2);

    // The memory tool actually ran.
    let entry = rt.memory.get("color").unwrap().unwrap();
    assert_eq!(entry.value, "teal");

    // Session log carries the tool_call / tool_result pair in order.
    let entries = rt.sessions.load("agent:main:dm:direct:tester").unwrap();
    bc_sessions::transcript::validate_entries(&entries).unwrap();
    let kinds: Vec<&'static str> = entries
        .iter()
        .map(|e| match &e.kind {
            EntryKind::Session { .. } => "session",
            EntryKind::Message { .. } => "message",
            EntryKind::ToolCall { .. } => "tool_call",
            EntryKind::ToolResult { .. } => "tool_result",
        })
        .collect();
    let call_idx = kinds.iter().position(|k| *k == "tool_call").unwrap();
    assert_eq!(kinds[call_idx + 1], "tool_result");

    // Reflection nudge followed the batch (on by default).
    assert!(entries.iter().any(|e| {
        e.role == EntryRole::User
            && e.message_text()
                .map(|t| t.contains("Analyze the tool result"))
                .unwrap_or(false)
    }));
}

// ── S2: message during a busy turn queues as followup ─────────────

#[tokio::test]
async fn busy_session_queues_followup() {
    let (_dir, rt, _mock) = runtime_with_mock();
    let session_key = "agent:main:dm:direct:tester";

    // Hold the session lock like an in-flight turn would.
    let rt2 = rt.clone();
    let hold = tokio::spawn(async move {
        rt2.queue
            .dual_enqueue(session_key, LaneType::Main, || async {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                Ok(())
            })
            .await
            .unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(rt.queue.is_busy(session_key));

    // The arriving message is queued, not dropped, and no reply is sent.
    let reply = process_inbound(&rt, inbound("also this")).await.unwrap();
    assert!(reply.is_none());
    assert_eq!(rt.queue.pending_count(session_key), 1);

    hold.await.unwrap();
}

// ── S5: dangerous shell command is blocked and audited ────────────

#[tokio::test]
async fn dangerous_shell_command_is_blocked() {
    let (_dir, rt, _mock) = runtime_with_mock();
    let settings = AgentsConfig::default().resolve("main");

    let (result, is_error) = dispatch_tool(
        &rt,
        &settings,
        "agent:main:dm:direct:tester",
        "shell",
        &serde_json::json!({"command": "rm -rf /"}),
        false,
    )
    .await;

    assert!(is_error);
    let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
    assert_eq!(parsed["error"], "blocked");
    assert!(parsed["reason"]
        .as_str()
        .unwrap()
        .contains("dangerous command pattern"));

    let audit = rt.audit.read_all().unwrap();
    assert!(audit.iter().any(|r| r.event == "shell_blocked"));
}

// ── S6: SSRF guard refuses loopback fetches ───────────────────────

#[tokio::test]
async fn loopback_fetch_is_refused() {
    let (_dir, rt, _mock) = runtime_with_mock();
    let settings = AgentsConfig::default().resolve("main");

    let (result, is_error) = dispatch_tool(
        &rt,
        &settings,
        "agent:main:dm:direct:tester",
        "web_fetch",
        &serde_json::json!({"url": "http://127.0.0.1/"}),
        false,
    )
    .await;

    assert!(is_error);
    assert!(result.contains("SSRF blocked"));
}

// ── S7: compaction rewrites with a summary record ─────────────────

#[tokio::test]
async fn compaction_rewrites_with_summary_and_tail() {
    let (_dir, rt, mock) = runtime_with_mock();
    let session_key = "agent:main:dm:direct:tester";

    for i in 0..30 {
        rt.sessions
            .append(
                session_key,
                bc_sessions::transcript::SessionEntry::message(
                    EntryRole::User,
                    format!("message number {i}"),
                ),
            )
            .unwrap();
    }
    mock.push_text("User counted to thirty.");

    let (provider, resolved) = rt.providers.resolve("default").unwrap();
    compact::compact_session(&rt, &provider, &resolved.model.id, session_key)
        .await
        .unwrap();

    let entries = rt.sessions.load(session_key).unwrap();
    assert!(entries[0].is_header());
    let summary = &entries[1];
    match &summary.kind {
        EntryKind::Message { content, compacted } => {
            assert!(*compacted);
            assert!(content.starts_with("[Session compacted]"));
            assert!(content.contains("thirty"));
        }
        _ => panic!("expected compacted summary record"),
    }
    // At least 6 tail records survive.
    assert!(entries.len() - 2 >= 6);

    let meta = rt.sessions.load_or_create_meta(session_key).unwrap();
    assert_eq!(meta.compaction_count, 1);
}

// ── Summarizer failure falls back to truncate ─────────────────────

#[tokio::test]
async fn failed_summarizer_falls_back_to_truncate() {
    let (_dir, rt, mock) = runtime_with_mock();
    let session_key = "agent:main:dm:direct:tester";

    for i in 0..40 {
        rt.sessions
            .append(
                session_key,
                bc_sessions::transcript::SessionEntry::message(
                    EntryRole::User,
                    format!("filler {i} {}", "x".repeat(200)),
                ),
            )
            .unwrap();
    }
    mock.push(Err(bc_domain::Error::ProviderFatal("summarizer down".into())));

    let (provider, resolved) = rt.providers.resolve("default").unwrap();
    compact::compact_session(&rt, &provider, &resolved.model.id, session_key)
        .await
        .unwrap();

    let entries = rt.sessions.load(session_key).unwrap();
    // Truncated, not summarized: no compacted record, fewer entries.
    assert!(entries.len() < 41);
    assert!(!entries.iter().any(|e| matches!(
        &e.kind,
        EntryKind::Message { compacted: true, .. }
    )));
    let meta = rt.sessions.load_or_create_meta(session_key).unwrap();
    assert_eq!(meta.compaction_count, 1);
}

// ── Provider fatal errors surface as prefixed text ────────────────

#[tokio::test]
async fn provider_fatal_error_becomes_visible_reply() {
    let (_dir, rt, mock) = runtime_with_mock();
    mock.push(Err(bc_domain::Error::ProviderFatal("401 bad key".into())));

    let reply = process_inbound(&rt, inbound("hello"))
        .await
        .unwrap()
        .expect("error reply expected");
    assert!(reply.chunks[0].starts_with('⚠'));
    assert!(reply.chunks[0].contains("401 bad key"));
}

// ── Silent replies deliver nothing ────────────────────────────────

#[tokio::test]
async fn silent_reply_suppresses_delivery() {
    let (_dir, rt, mock) = runtime_with_mock();
    mock.push_text(bc_domain::SILENT_REPLY);

    let reply = process_inbound(&rt, inbound("fyi, no response needed"))
        .await
        .unwrap();
    assert!(reply.is_none());
}
