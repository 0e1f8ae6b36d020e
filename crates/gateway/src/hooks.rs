//! The hook pipeline.
//!
//! Hooks attach to named events with one of three dispatch strategies:
//! *void* (parallel fire-and-forget), *modifying* (serial payload pipeline
//! in ascending priority), and *sync* (serial, blocking, no
//! transformation). A failing hook is logged and never blocks the
//! pipeline; a failing modifying hook preserves the incoming payload.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bc_domain::Result;
use bc_state::StateLayout;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events and strategies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PreMessage,
    PostMessage,
    MessageReceived,
    MessageSending,
    MessageSent,
    PreTool,
    PostTool,
    ToolResultPersist,
    SessionStart,
    SessionEnd,
    SessionReset,
    BeforeCompaction,
    AfterCompaction,
    BeforeAgentStart,
    AgentEnd,
    GatewayStart,
    GatewayStop,
    OnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStrategy {
    Void,
    Modifying,
    Sync,
}

/// The fixed default strategy per event; a registration may override it.
pub fn default_strategy(event: HookEvent) -> HookStrategy {
    use HookEvent::*;
    match event {
        PreMessage | MessageReceived | MessageSending | PreTool | PostTool => {
            HookStrategy::Modifying
        }
        BeforeCompaction | SessionStart | SessionEnd | SessionReset => HookStrategy::Sync,
        PostMessage | MessageSent | ToolResultPersist | AfterCompaction
        | BeforeAgentStart | AgentEnd | GatewayStart | GatewayStop | OnError => {
            HookStrategy::Void
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub type HookFuture = Pin<Box<dyn std::future::Future<Output = Result<Value>> + Send>>;
pub type HookFn = Arc<dyn Fn(Value) -> HookFuture + Send + Sync>;

#[derive(Clone)]
pub struct HookRegistration {
    pub name: String,
    pub event: HookEvent,
    pub enabled: bool,
    pub priority: i32,
    pub strategy: Option<HookStrategy>,
    pub source: String,
    pub handler: HookFn,
}

/// Serializable view for the CLI/API.
#[derive(Debug, Clone, Serialize)]
pub struct HookInfo {
    pub name: String,
    pub event: HookEvent,
    pub enabled: bool,
    pub priority: i32,
    pub strategy: HookStrategy,
    pub source: String,
}

/// Persisted enable/disable overrides (survive restarts).
#[derive(Debug, Default, Serialize, Deserialize)]
struct HookFlags {
    disabled: Vec<String>,
}

pub struct HookRegistry {
    hooks: RwLock<HashMap<HookEvent, Vec<HookRegistration>>>,
    flags_path: std::path::PathBuf,
}

impl HookRegistry {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            flags_path: layout.events_dir().join("hooks.json"),
        }
    }

    pub fn register(&self, mut registration: HookRegistration) {
        if self.load_flags().disabled.contains(&registration.name) {
            registration.enabled = false;
        }
        let mut hooks = self.hooks.write();
        let list = hooks.entry(registration.event).or_default();
        list.push(registration);
        list.sort_by_key(|h| h.priority);
    }

    pub fn list(&self) -> Vec<HookInfo> {
        let hooks = self.hooks.read();
        let mut infos: Vec<HookInfo> = hooks
            .values()
            .flatten()
            .map(|h| HookInfo {
                name: h.name.clone(),
                event: h.event,
                enabled: h.enabled,
                priority: h.priority,
                strategy: h.strategy.unwrap_or_else(|| default_strategy(h.event)),
                source: h.source.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Enable or disable a hook by name; the flag persists across restarts.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        {
            let mut hooks = self.hooks.write();
            for list in hooks.values_mut() {
                for hook in list.iter_mut().filter(|h| h.name == name) {
                    hook.enabled = enabled;
                    found = true;
                }
            }
        }
        let mut flags = self.load_flags();
        flags.disabled.retain(|n| n != name);
        if !enabled {
            flags.disabled.push(name.to_string());
        }
        if let Err(e) = bc_state::write_json_atomic(&self.flags_path, &flags) {
            tracing::warn!(error = %e, "failed to persist hook flags");
        }
        found
    }

    fn load_flags(&self) -> HookFlags {
        bc_state::read_json(&self.flags_path)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn active(&self, event: HookEvent) -> Vec<HookRegistration> {
        self.hooks
            .read()
            .get(&event)
            .map(|list| list.iter().filter(|h| h.enabled).cloned().collect())
            .unwrap_or_default()
    }

    // ── Dispatch ──────────────────────────────────────────────────

    /// Fire an event. The returned value is the payload after any
    /// modifying hooks ran; void and sync hooks leave it untouched.
    pub async fn dispatch(&self, event: HookEvent, payload: Value) -> Value {
        let hooks = self.active(event);
        if hooks.is_empty() {
            return payload;
        }

        let mut current = payload;
        let mut fire_and_forget = Vec::new();

        for hook in hooks {
            let strategy = hook.strategy.unwrap_or_else(|| default_strategy(event));
            match strategy {
                HookStrategy::Void => {
                    let handler = hook.handler.clone();
                    let name = hook.name.clone();
                    let payload = current.clone();
                    fire_and_forget.push(tokio::spawn(async move {
                        if let Err(e) = handler(payload).await {
                            tracing::warn!(hook = %name, error = %e, "void hook failed");
                        }
                    }));
                }
                HookStrategy::Modifying => {
                    match (hook.handler)(current.clone()).await {
                        Ok(next) => current = next,
                        Err(e) => {
                            tracing::warn!(hook = %hook.name, error = %e,
                                "modifying hook failed; payload preserved");
                        }
                    }
                }
                HookStrategy::Sync => {
                    if let Err(e) = (hook.handler)(current.clone()).await {
                        tracing::warn!(hook = %hook.name, error = %e, "sync hook failed");
                    }
                }
            }
        }

        // Void hooks are parallel fire-and-forget; do not await them.
        drop(fire_and_forget);
        current
    }
}

/// Convenience: build a handler from an async closure.
pub fn handler<F, Fut>(f: F) -> HookFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> (tempfile::TempDir, HookRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path()).unwrap();
        (dir, HookRegistry::new(&layout))
    }

    fn reg(name: &str, event: HookEvent, priority: i32, h: HookFn) -> HookRegistration {
        HookRegistration {
            name: name.into(),
            event,
            enabled: true,
            priority,
            strategy: None,
            source: "test".into(),
            handler: h,
        }
    }

    #[tokio::test]
    async fn modifying_pipeline_runs_in_priority_order() {
        let (_dir, registry) = registry();
        registry.register(reg(
            "append-b",
            HookEvent::PreMessage,
            2,
            handler(|p| async move {
                let text = p["text"].as_str().unwrap_or("").to_string();
                Ok(serde_json::json!({"text": format!("{text}b")}))
            }),
        ));
        registry.register(reg(
            "append-a",
            HookEvent::PreMessage,
            1,
            handler(|p| async move {
                let text = p["text"].as_str().unwrap_or("").to_string();
                Ok(serde_json::json!({"text": format!("{text}a")}))
            }),
        ));

        let out = registry
            .dispatch(HookEvent::PreMessage, serde_json::json!({"text": ""}))
            .await;
        assert_eq!(out["text"], "ab");
    }

    #[tokio::test]
    async fn failing_modifying_hook_preserves_payload() {
        let (_dir, registry) = registry();
        registry.register(reg(
            "boom",
            HookEvent::PreTool,
            0,
            handler(|_| async { Err(bc_domain::Error::HookFailure("boom".into())) }),
        ));

        let input = serde_json::json!({"tool": "shell"});
        let out = registry.dispatch(HookEvent::PreTool, input.clone()).await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn void_hooks_do_not_transform() {
        let (_dir, registry) = registry();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        registry.register(reg(
            "counter",
            HookEvent::PostMessage,
            0,
            handler(move |p| {
                let count = count2.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(p)
                }
            }),
        ));

        let input = serde_json::json!({"x": 1});
        let out = registry.dispatch(HookEvent::PostMessage, input.clone()).await;
        assert_eq!(out, input);
        // Give the fire-and-forget task a moment.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_hooks_are_skipped_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path()).unwrap();
        let registry = HookRegistry::new(&layout);
        registry.register(reg(
            "rewrite",
            HookEvent::PreMessage,
            0,
            handler(|_| async { Ok(serde_json::json!({"text": "rewritten"})) }),
        ));

        assert!(registry.set_enabled("rewrite", false));
        let input = serde_json::json!({"text": "orig"});
        let out = registry.dispatch(HookEvent::PreMessage, input.clone()).await;
        assert_eq!(out, input);

        // A fresh registry (same state dir) keeps the disable flag.
        let registry2 = HookRegistry::new(&layout);
        registry2.register(reg(
            "rewrite",
            HookEvent::PreMessage,
            0,
            handler(|_| async { Ok(serde_json::json!({"text": "rewritten"})) }),
        ));
        let out = registry2.dispatch(HookEvent::PreMessage, input.clone()).await;
        assert_eq!(out, input);
    }

    #[test]
    fn default_strategies_match_the_contract() {
        assert_eq!(default_strategy(HookEvent::PreTool), HookStrategy::Modifying);
        assert_eq!(default_strategy(HookEvent::PostTool), HookStrategy::Modifying);
        assert_eq!(
            default_strategy(HookEvent::BeforeCompaction),
            HookStrategy::Sync
        );
        assert_eq!(
            default_strategy(HookEvent::AfterCompaction),
            HookStrategy::Void
        );
        assert_eq!(default_strategy(HookEvent::PostMessage), HookStrategy::Void);
    }
}
