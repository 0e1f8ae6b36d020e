//! The agent turn loop.
//!
//! One turn: resolve the model, reset idle sessions, drain queued events
//! and pending messages, assemble the system prompt and tool spec, then
//! iterate the bounded tool loop — provider call, stop-reason handling,
//! tool dispatch, reflection — with the overflow-recovery ladder wrapped
//! around the provider call. The caller holds the session lock for the
//! whole turn via the queue engine.

use std::sync::Arc;

use bc_domain::config::AgentSettings;
use bc_domain::{Error, Result, StopReason, ToolDefinition, SILENT_REPLY};
use bc_providers::{with_retries, ChatRequest, Provider, ResolvedModel};
use bc_sessions::transcript::SessionEntry;
use bc_sessions::EntryRole;

use crate::hooks::HookEvent;
use crate::runtime::{compact, dispatch, entries_to_messages, prompt, trim_leading_tool_records};
use crate::state::Runtime;

/// Token headroom reserved before the memory-flush gate fires.
const MEMORY_FLUSH_HEADROOM: u64 = 20_000 + 4_000;
const MEMORY_FLUSH_MAX_TURNS: u32 = 3;
const MEMORY_FLUSH_PROMPT: &str = "Context is close to its limit and will be compacted \
soon. Review this conversation and persist any durable facts worth keeping (user \
preferences, decisions, open tasks) with the memory tool, then reply briefly.";

const REFLECTION_PROMPT: &str = "Analyze the tool result. If complete, provide a final \
response. If not, decide the next action.";

pub struct TurnRequest {
    pub agent_id: String,
    pub session_key: String,
    /// `None` runs a drain-only turn (pending messages / events).
    pub message: Option<String>,
    pub channel: String,
    pub is_subagent: bool,
}

/// Run one agent turn to completion. Returns the final assistant text, or
/// [`SILENT_REPLY`] when nothing should be delivered.
pub async fn run_turn(rt: &Runtime, req: TurnRequest) -> Result<String> {
    let config = rt.config.snapshot();
    let settings = config.agents.resolve(&req.agent_id);
    let session_key = req.session_key.as_str();

    // ── Idle reset ────────────────────────────────────────────────
    if rt
        .sessions
        .is_idle_expired(session_key, config.session.idle_reset_minutes)
    {
        rt.sessions.reset(session_key)?;
        rt.hooks
            .dispatch(
                HookEvent::SessionEnd,
                serde_json::json!({"sessionKey": session_key, "reason": "idle_timeout"}),
            )
            .await;
    }

    // Conversation sessions become the agent's event-injection target.
    if !req.is_subagent && !matches!(req.channel.as_str(), "cron" | "spawn") {
        rt.note_active_session(&req.agent_id, session_key);
    }
    // Keep the sidecar's queueMode in step with the resolved settings.
    rt.sessions.update_meta(session_key, |m| {
        m.queue_mode = settings.queue_mode;
    })?;

    let is_first_turn = !rt.sessions.exists(session_key);
    if is_first_turn {
        rt.hooks
            .dispatch(
                HookEvent::SessionStart,
                serde_json::json!({"sessionKey": session_key, "agentId": req.agent_id}),
            )
            .await;
    }
    rt.hooks
        .dispatch(
            HookEvent::BeforeAgentStart,
            serde_json::json!({"agentId": req.agent_id, "sessionKey": session_key}),
        )
        .await;

    // ── Tool spec ─────────────────────────────────────────────────
    let mut tools = bc_tools::filter_tools(
        bc_tools::builtin_tools(),
        &settings.tools_profile,
        settings.tools_allow.as_deref(),
        &settings.tools_deny,
    );
    if req.is_subagent {
        // Subagents get a restricted set: no delegation, no scheduling.
        tools.retain(|t| {
            !matches!(t.name, "agent_message" | "spawn" | "spawn_status" | "cron")
        });
    }
    let tool_defs = bc_tools::to_definitions(&tools);

    let (provider, resolved) = rt.providers.resolve(&settings.model)?;

    // ── Memory flush gate ─────────────────────────────────────────
    if !req.is_subagent {
        let meta = rt.sessions.load_or_create_meta(session_key)?;
        let estimated = rt.sessions.estimated_tokens(session_key);
        let limit = resolved.model.context_window.saturating_sub(MEMORY_FLUSH_HEADROOM);
        if estimated > limit && !meta.flushed_at_current_generation() {
            run_memory_flush(rt, &settings, session_key, &req.channel, &provider, &resolved)
                .await;
            let generation = rt.sessions.load_or_create_meta(session_key)?.compaction_count;
            rt.sessions.update_meta(session_key, |m| {
                m.memory_flush_compaction_count = Some(generation);
            })?;
        }
    }

    // ── Assemble this turn's user input ───────────────────────────
    let mut had_input = false;

    if !req.is_subagent {
        if let Some(event_msg) = rt.events.drain_as_message(session_key)? {
            rt.sessions
                .append(session_key, SessionEntry::message(EntryRole::User, event_msg))?;
            had_input = true;
        }
        for pending in rt.queue.drain_pending(session_key)? {
            rt.sessions.append(
                session_key,
                SessionEntry::message(EntryRole::User, pending.message),
            )?;
            had_input = true;
        }
    }

    let mut original_message = String::new();
    if let Some(message) = &req.message {
        // pre_message may rewrite the inbound text.
        let payload = rt
            .hooks
            .dispatch(
                HookEvent::PreMessage,
                serde_json::json!({
                    "text": message,
                    "sessionKey": session_key,
                    "channel": req.channel,
                }),
            )
            .await;
        let text = payload
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or(message)
            .to_string();
        original_message = text.clone();
        rt.sessions
            .append(session_key, SessionEntry::message(EntryRole::User, text))?;
        had_input = true;
    }

    if !had_input {
        return Ok(SILENT_REPLY.to_string());
    }

    // ── System prompt ─────────────────────────────────────────────
    let system_prompt = prompt::build_system_prompt(&prompt::PromptContext {
        settings: &settings,
        tools: &tool_defs,
        channel: &req.channel,
        is_subagent: req.is_subagent,
        is_heartbeat: session_key.contains(":heartbeat:"),
    });

    // ── Tool loop ─────────────────────────────────────────────────
    let result = run_tool_loop(LoopParams {
        rt,
        settings: &settings,
        session_key,
        system_prompt: &system_prompt,
        tool_defs: &tool_defs,
        provider,
        resolved,
        max_turns: settings.max_turns,
        is_subagent: req.is_subagent,
        original_message: &original_message,
    })
    .await;

    // ── Post-turn ─────────────────────────────────────────────────
    rt.sessions.prune(session_key, config.session.max_history)?;
    rt.hooks
        .dispatch(
            HookEvent::PostMessage,
            serde_json::json!({"sessionKey": session_key, "agentId": req.agent_id}),
        )
        .await;
    rt.hooks
        .dispatch(
            HookEvent::AgentEnd,
            serde_json::json!({"agentId": req.agent_id, "sessionKey": session_key}),
        )
        .await;

    result
}

async fn run_memory_flush(
    rt: &Runtime,
    settings: &AgentSettings,
    session_key: &str,
    channel: &str,
    provider: &Arc<dyn Provider>,
    resolved: &ResolvedModel,
) {
    let memory_tools: Vec<ToolDefinition> = bc_tools::to_definitions(
        &bc_tools::builtin_tools()
            .into_iter()
            .filter(|t| t.name == "memory")
            .collect::<Vec<_>>(),
    );
    if let Err(e) = rt.sessions.append(
        session_key,
        SessionEntry::message(EntryRole::User, MEMORY_FLUSH_PROMPT),
    ) {
        tracing::warn!(error = %e, "memory flush prompt append failed");
        return;
    }
    let flush = run_tool_loop(LoopParams {
        rt,
        settings,
        session_key,
        system_prompt: "Persist durable memories before compaction.",
        tool_defs: &memory_tools,
        provider: provider.clone(),
        resolved: resolved.clone(),
        max_turns: MEMORY_FLUSH_MAX_TURNS,
        is_subagent: false,
        original_message: MEMORY_FLUSH_PROMPT,
    })
    .await;
    if let Err(e) = flush {
        tracing::warn!(error = %e, channel, "memory flush turn failed");
    }
}

struct LoopParams<'a> {
    rt: &'a Runtime,
    settings: &'a AgentSettings,
    session_key: &'a str,
    system_prompt: &'a str,
    tool_defs: &'a [ToolDefinition],
    provider: Arc<dyn Provider>,
    resolved: ResolvedModel,
    max_turns: u32,
    is_subagent: bool,
    original_message: &'a str,
}

async fn run_tool_loop(params: LoopParams<'_>) -> Result<String> {
    let LoopParams {
        rt,
        settings,
        session_key,
        system_prompt,
        tool_defs,
        mut provider,
        mut resolved,
        max_turns,
        is_subagent,
        original_message,
    } = params;

    let config = rt.config.snapshot();
    let mut history_window = config.session.max_history;
    let mut ladder_level = 0u32;
    let mut session_cleared = false;
    let mut last_text = String::new();
    let mut iteration = 0u32;

    while iteration < max_turns {
        // Abort marker short-circuits between iterations.
        if rt.queue.check_abort(session_key) {
            tracing::info!(session_key, "turn aborted by interrupt");
            return Ok(if last_text.is_empty() {
                SILENT_REPLY.to_string()
            } else {
                last_text
            });
        }

        // Pre-compaction check.
        let estimated = rt.sessions.estimated_tokens(session_key);
        if compact::should_compact(
            estimated,
            resolved.model.context_window,
            config.session.compaction_threshold,
        ) {
            if let Err(e) =
                compact::compact_session(rt, &provider, &resolved.model.id, session_key).await
            {
                tracing::warn!(error = %e, "pre-turn compaction failed; continuing");
            }
        }

        // Load the history window.
        let entries =
            trim_leading_tool_records(rt.sessions.load_last(session_key, history_window)?);
        let messages = entries_to_messages(&entries);

        let request = ChatRequest {
            model: resolved.model.id.clone(),
            system: Some(system_prompt.to_string()),
            messages,
            tools: tool_defs.to_vec(),
            max_tokens: resolved.model.max_tokens,
            temperature: None,
        };

        let response = with_retries(|| provider.complete(&request)).await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_overflow() => {
                // ── Overflow-recovery ladder ──────────────────────
                match ladder_level {
                    0 => {
                        history_window = (history_window / 2).max(10);
                        tracing::info!(history_window, "overflow: pruned history window");
                    }
                    1..=3 => {
                        tracing::info!(retry = ladder_level, "overflow: summary compaction");
                        if let Err(e) = compact::compact_session(
                            rt,
                            &provider,
                            &resolved.model.id,
                            session_key,
                        )
                        .await
                        {
                            tracing::warn!(error = %e, "overflow compaction failed");
                        }
                    }
                    4 => {
                        match settings.fallback_models.first().cloned() {
                            Some(model_name) => {
                                tracing::warn!(model = %model_name, "overflow: switching to fallback model");
                                let (p, r) = rt.providers.resolve(&model_name)?;
                                provider = p;
                                resolved = r;
                            }
                            None => {
                                // No fallback configured; go straight to the
                                // clear-and-restart level.
                                ladder_level += 1;
                            }
                        }
                    }
                    _ => {
                        if session_cleared {
                            return Err(Error::ProviderFatal(format!(
                                "context overflow unrecoverable: {e}"
                            )));
                        }
                        tracing::warn!("overflow: clearing session and restarting turn");
                        rt.sessions.reset(session_key)?;
                        if !original_message.is_empty() {
                            rt.sessions.append(
                                session_key,
                                SessionEntry::message(EntryRole::User, original_message),
                            )?;
                        }
                        session_cleared = true;
                        history_window = config.session.max_history;
                    }
                }
                ladder_level += 1;
                continue;
            }
            Err(e) => {
                // Non-overflow failures end the turn; the transport sees a
                // prefixed error string, never a crash.
                rt.hooks
                    .dispatch(
                        HookEvent::OnError,
                        serde_json::json!({"sessionKey": session_key, "error": e.to_string()}),
                    )
                    .await;
                let text = format!("⚠️ provider error: {e}");
                rt.sessions.append(
                    session_key,
                    SessionEntry::message(EntryRole::Assistant, text.as_str()),
                )?;
                return Ok(text);
            }
        };

        iteration += 1;

        // ── Usage tracking ────────────────────────────────────────
        rt.usage.record(
            &settings.id,
            &resolved.model.id,
            response.usage.input_tokens,
            response.usage.output_tokens,
        );
        rt.sessions.update_meta(session_key, |m| {
            m.total_tokens += response.usage.total();
        })?;

        let text = response.text();
        let tool_calls = response.tool_calls();

        if response.stop_reason != StopReason::ToolUse || tool_calls.is_empty() {
            if !text.is_empty() {
                rt.sessions.append(
                    session_key,
                    SessionEntry::message(EntryRole::Assistant, text.as_str()),
                )?;
            }
            return Ok(if text.is_empty() {
                SILENT_REPLY.to_string()
            } else {
                text
            });
        }

        // ── Tool batch ────────────────────────────────────────────
        if !text.is_empty() {
            rt.sessions.append(
                session_key,
                SessionEntry::message(EntryRole::Assistant, text.as_str()),
            )?;
            last_text = text;
        }

        for call in &tool_calls {
            rt.sessions.append(
                session_key,
                SessionEntry::tool_call(&call.tool_name, &call.tool_id, call.tool_input.clone()),
            )?;

            let (result, is_error) = dispatch_boxed(
                rt,
                settings,
                session_key,
                &call.tool_name,
                &call.tool_input,
                is_subagent,
            )
            .await;

            rt.sessions.append(
                session_key,
                SessionEntry::tool_result(&call.tool_id, result, is_error),
            )?;
            rt.hooks
                .dispatch(
                    HookEvent::ToolResultPersist,
                    serde_json::json!({
                        "sessionKey": session_key,
                        "tool": call.tool_name,
                        "isError": is_error,
                    }),
                )
                .await;
        }

        // Reflection nudge, on unless the agent disabled it.
        if settings.reflection_prompt {
            rt.sessions.append(
                session_key,
                SessionEntry::message(EntryRole::User, REFLECTION_PROMPT),
            )?;
        }
    }

    tracing::warn!(session_key, max_turns, "tool loop limit reached");
    Ok(if last_text.is_empty() {
        format!("(stopped after {max_turns} tool iterations)")
    } else {
        last_text
    })
}

/// Type-erased dispatch breaks the `dispatch → agent_message → run_turn →
/// dispatch` future cycle.
fn dispatch_boxed<'a>(
    rt: &'a Runtime,
    settings: &'a AgentSettings,
    session_key: &'a str,
    tool_name: &'a str,
    input: &'a serde_json::Value,
    is_subagent: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = (String, bool)> + Send + 'a>> {
    Box::pin(dispatch::dispatch_tool(
        rt,
        settings,
        session_key,
        tool_name,
        input,
        is_subagent,
    ))
}
