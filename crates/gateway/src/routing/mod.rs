//! Routing: destination resolution, admission, session-key construction,
//! busy handling, and delivery planning. This is the single entry point
//! every transport (and the REST gateway and CLI) goes through.

pub mod admission;
pub mod delivery;
pub mod resolve;

use bc_domain::config::LaneType;
use bc_domain::{Result, SILENT_REPLY};
use bc_sessions::key::{compute_session_key, KeyParts};
use bc_sessions::IdentityResolver;

use crate::hooks::HookEvent;
use crate::runtime::queue::BusyOutcome;
use crate::runtime::turn::{run_turn, TurnRequest};
use crate::state::Runtime;

pub use admission::{Admission, AdmissionState};
pub use delivery::{split_text, DeliveryPlan};
pub use resolve::resolve_agent;

/// A normalized inbound message, as posted by transport adapters.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub channel: String,
    pub sender: String,
    pub text: String,
    pub guild: Option<String>,
    pub team: Option<String>,
    pub account_id: Option<String>,
    /// Parent container peer (thread inheritance).
    pub parent_peer: Option<String>,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub is_group: bool,
    /// Skip destination resolution and address this agent directly
    /// (REST `agent_id`, CLI `-a`).
    pub agent_override: Option<String>,
}

/// The reply handed back to the transport: a delivery plan plus the text
/// split into channel-sized chunks. `None` means deliver nothing.
#[derive(Debug, Clone)]
pub struct OutboundReply {
    pub plan: DeliveryPlan,
    pub chunks: Vec<String>,
}

/// Full inbound pipeline: identity → resolution → admission → queue →
/// turn → delivery plan.
pub async fn process_inbound(rt: &Runtime, msg: InboundMessage) -> Result<Option<OutboundReply>> {
    let config = rt.config.snapshot();

    // message_received hook may rewrite the raw text.
    let payload = rt
        .hooks
        .dispatch(
            HookEvent::MessageReceived,
            serde_json::json!({"text": msg.text, "channel": msg.channel, "sender": msg.sender}),
        )
        .await;
    let mut msg = msg;
    if let Some(text) = payload.get("text").and_then(|v| v.as_str()) {
        msg.text = text.to_string();
    }

    // Identity canonicalization before key construction.
    let identity = IdentityResolver::from_config(&config.identity_links);
    let canonical_peer = identity.resolve(&msg.channel, &msg.sender);

    let agent_id = msg
        .agent_override
        .clone()
        .unwrap_or_else(|| resolve_agent(&config, &msg));

    match admission::admit(rt, &config, &msg).await? {
        Admission::Admit => {}
        Admission::Reply(text) => {
            return Ok(Some(build_reply(rt, &msg, text).await));
        }
        Admission::Deny(_) => return Ok(None),
    }

    let session_key = compute_session_key(
        &agent_id,
        config.session.dm_scope,
        &KeyParts {
            channel: &msg.channel,
            peer: &canonical_peer,
            account_id: msg.account_id.as_deref(),
        },
    );

    // ── Busy handling ─────────────────────────────────────────────
    if rt.queue.is_busy(&session_key) {
        let mode = config.agents.resolve(&agent_id).queue_mode;
        match rt.queue.handle_busy(&session_key, &msg.text, mode)? {
            BusyOutcome::Queued => {
                // Drained as user input at the start of the next turn.
                return Ok(None);
            }
            BusyOutcome::Collected => {
                schedule_collect_flush(rt, &agent_id, &session_key, &msg);
                return Ok(None);
            }
            BusyOutcome::Interrupted => {
                // Fall through: dual_enqueue blocks until the aborted turn
                // releases the lock, then the fresh turn drains the
                // interrupting message from pending.
                return run_and_reply(rt, &agent_id, &session_key, &msg, None).await;
            }
        }
    }

    run_and_reply(rt, &agent_id, &session_key, &msg, Some(msg.text.clone())).await
}

async fn run_and_reply(
    rt: &Runtime,
    agent_id: &str,
    session_key: &str,
    msg: &InboundMessage,
    message: Option<String>,
) -> Result<Option<OutboundReply>> {
    let agent_id = agent_id.to_string();
    let key = session_key.to_string();
    let channel = msg.channel.clone();
    let rt2 = rt.clone();

    let mut text = rt
        .queue
        .dual_enqueue(session_key, LaneType::Main, move || async move {
            run_turn(
                &rt2,
                TurnRequest {
                    agent_id: agent_id.clone(),
                    session_key: key.clone(),
                    message,
                    channel: channel.clone(),
                    is_subagent: false,
                },
            )
            .await
        })
        .await?;

    // Followups that arrived mid-turn get their own drain turns; the last
    // reply wins.
    let mut rounds = 0;
    while rt.queue.pending_count(session_key) > 0 && rounds < 5 {
        rounds += 1;
        let agent_id = session_agent(session_key);
        let key = session_key.to_string();
        let channel = msg.channel.clone();
        let rt2 = rt.clone();
        let followup = rt
            .queue
            .dual_enqueue(session_key, LaneType::Main, move || async move {
                run_turn(
                    &rt2,
                    TurnRequest {
                        agent_id,
                        session_key: key.clone(),
                        message: None,
                        channel,
                        is_subagent: false,
                    },
                )
                .await
            })
            .await?;
        if followup != SILENT_REPLY {
            text = followup;
        }
    }

    if text == SILENT_REPLY {
        return Ok(None);
    }
    Ok(Some(build_reply(rt, msg, text).await))
}

/// The agent segment of a session key (`agent:<id>:...`).
fn session_agent(session_key: &str) -> String {
    session_key
        .split(':')
        .nth(1)
        .unwrap_or("main")
        .to_string()
}

async fn build_reply(rt: &Runtime, msg: &InboundMessage, text: String) -> OutboundReply {
    let config = rt.config.snapshot();

    // message_sending may rewrite the outbound text.
    let payload = rt
        .hooks
        .dispatch(
            HookEvent::MessageSending,
            serde_json::json!({"text": text, "channel": msg.channel}),
        )
        .await;
    let text = payload
        .get("text")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or(text);

    let limit = delivery::limit_for(&msg.channel, config.channels.get(&msg.channel));
    let chunks = split_text(&text, limit);

    rt.hooks
        .dispatch(
            HookEvent::MessageSent,
            serde_json::json!({"channel": msg.channel, "chunks": chunks.len()}),
        )
        .await;

    OutboundReply {
        plan: DeliveryPlan::for_message(msg),
        chunks,
    }
}

/// Collect mode: (re)arm the debounce timer; on fire, merge the
/// collect-tagged backlog into one message and run a turn with it. The
/// reply is announced through the session's event queue (the original
/// senders' requests have long been acked), matching how spawn and cron
/// results reach the agent.
fn schedule_collect_flush(
    rt: &Runtime,
    agent_id: &str,
    session_key: &str,
    msg: &InboundMessage,
) {
    let generation = {
        let mut pending = rt.admission.collect_pending.lock();
        let counter = pending.entry(session_key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    };

    let rt = rt.clone();
    let agent_id = agent_id.to_string();
    let session_key = session_key.to_string();
    let channel = msg.channel.clone();
    let debounce = rt.config.snapshot().session.debounce_ms();

    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(debounce)).await;

        // A newer message restarted the window; let its timer flush.
        {
            let pending = rt.admission.collect_pending.lock();
            if pending.get(&session_key).copied() != Some(generation) {
                return;
            }
        }

        let drained = match rt.queue.drain_collected(&session_key) {
            Ok(d) if !d.is_empty() => d,
            _ => return,
        };
        let merged = format!(
            "Messages received while you were busy:\n{}",
            drained
                .iter()
                .map(|p| format!("- {}", p.message))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let rt2 = rt.clone();
        let key2 = session_key.clone();
        let result = rt
            .queue
            .dual_enqueue(&session_key, LaneType::Main, move || async move {
                run_turn(
                    &rt2,
                    TurnRequest {
                        agent_id,
                        session_key: key2,
                        message: Some(merged),
                        channel,
                        is_subagent: false,
                    },
                )
                .await
            })
            .await;
        match result {
            Ok(text) => {
                if text != SILENT_REPLY {
                    let summary: String = text.chars().take(500).collect();
                    let note =
                        format!("Reply to messages received while busy: {summary}");
                    if let Err(e) = rt.events.enqueue(&session_key, &note) {
                        tracing::warn!(session_key = %session_key, error = %e,
                            "collect flush reply delivery failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(session_key = %session_key, error = %e, "collect flush turn failed");
            }
        }
    });
}
