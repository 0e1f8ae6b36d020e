//! Admission gates, evaluated in order: audit → dedup → rate limit →
//! DM/group policy → debounce → pattern auto-reply.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use bc_domain::config::{ChannelConfig, Config, DmPolicy, GroupPolicy};
use bc_domain::Result;
use bc_state::{read_json, write_json_atomic, StateLayout};

use super::InboundMessage;
use crate::state::Runtime;

/// In-process admission caches: dedup table, debounce sequencing, and
/// collect-mode timers.
#[derive(Default)]
pub struct AdmissionState {
    dedupe: Mutex<HashMap<String, Instant>>,
    debounce_seq: Mutex<HashMap<String, u64>>,
    pub(crate) collect_pending: Mutex<HashMap<String, u64>>,
}

impl AdmissionState {
    /// True when the same fingerprint was seen within the TTL.
    pub fn is_duplicate(&self, fingerprint: &str, ttl: Duration) -> bool {
        let mut seen = self.dedupe.lock();
        let now = Instant::now();
        if seen.len() > 10_000 {
            seen.retain(|_, t| now.duration_since(*t) < ttl);
        }
        if let Some(t) = seen.get(fingerprint) {
            if now.duration_since(*t) < ttl {
                return true;
            }
        }
        seen.insert(fingerprint.to_string(), now);
        false
    }

    fn bump_debounce(&self, key: &str) -> u64 {
        let mut seqs = self.debounce_seq.lock();
        let seq = seqs.entry(key.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    fn debounce_current(&self, key: &str) -> u64 {
        *self.debounce_seq.lock().get(key).unwrap_or(&0)
    }
}

/// The admission verdict for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Answer directly without invoking the agent (auto-reply, pairing).
    Reply(String),
    /// Drop silently; the reason lands in the audit log.
    Deny(&'static str),
}

/// Run all gates for one inbound message.
pub async fn admit(rt: &Runtime, config: &Config, msg: &InboundMessage) -> Result<Admission> {
    let channel_cfg: Option<&ChannelConfig> = config.channels.get(&msg.channel);

    // 1. Audit.
    rt.audit.record(
        "message_received",
        serde_json::json!({
            "channel": msg.channel,
            "sender": msg.sender,
            "chars": msg.text.len(),
        }),
    );

    // Dedup: identical (channel, sender, message) within the TTL produce
    // exactly one turn.
    let fingerprint = format!("{}:{}:{}", msg.channel, msg.sender, msg.text);
    let ttl = Duration::from_millis(config.security.dedup_ttl_ms);
    if rt.admission.is_duplicate(&fingerprint, ttl) {
        rt.audit.record(
            "message_deduplicated",
            serde_json::json!({"channel": msg.channel, "sender": msg.sender}),
        );
        return Ok(Admission::Deny("duplicate"));
    }

    // 2. Rate limit.
    if !take_rate_token(
        &rt.layout,
        &format!("{}:{}", msg.channel, msg.sender),
        config.security.rate_limit_per_minute,
    )? {
        rt.audit.record(
            "rate_limited",
            serde_json::json!({"channel": msg.channel, "sender": msg.sender}),
        );
        return Ok(Admission::Deny("rate_limited"));
    }

    // 3. DM / group policy.
    if msg.is_group {
        match channel_cfg.map(|c| c.group_policy).unwrap_or_default() {
            GroupPolicy::Open => {}
            GroupPolicy::Disabled => {
                rt.audit.record(
                    "group_disabled",
                    serde_json::json!({"channel": msg.channel}),
                );
                return Ok(Admission::Deny("group_disabled"));
            }
            GroupPolicy::MentionOnly => {
                let bot_name = channel_cfg.map(|c| c.bot_name.as_str()).unwrap_or("");
                if !mentions_bot(&msg.text, bot_name) {
                    return Ok(Admission::Deny("not_mentioned"));
                }
            }
        }
    } else {
        match channel_cfg.map(|c| c.dm_policy).unwrap_or_default() {
            DmPolicy::Open => {}
            DmPolicy::Allowlist => {
                let allowed = channel_cfg
                    .map(|c| c.allowlist.iter().any(|s| s == &msg.sender))
                    .unwrap_or(false);
                if !allowed {
                    rt.audit.record(
                        "dm_not_allowlisted",
                        serde_json::json!({"channel": msg.channel, "sender": msg.sender}),
                    );
                    return Ok(Admission::Deny("not_allowlisted"));
                }
            }
            DmPolicy::Pairing => {
                if let Some(reply) = check_pairing(rt, msg)? {
                    return Ok(reply);
                }
            }
        }
    }

    // 4. Debounce: only the last message within the window proceeds.
    let debounce_ms = channel_cfg.map(|c| c.debounce_ms).unwrap_or(0);
    if debounce_ms > 0 {
        let key = format!("{}:{}", msg.channel, msg.sender);
        let my_seq = rt.admission.bump_debounce(&key);
        tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
        if rt.admission.debounce_current(&key) != my_seq {
            return Ok(Admission::Deny("debounced"));
        }
    }

    // 5. Pattern auto-reply.
    if let Some(cfg) = channel_cfg {
        if let Some(rule) = cfg.auto_replies.iter().find(|r| r.matches(&msg.text)) {
            return Ok(Admission::Reply(rule.response.clone()));
        }
    }

    Ok(Admission::Admit)
}

fn mentions_bot(text: &str, bot_name: &str) -> bool {
    if bot_name.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    let bot = bot_name.to_lowercase();
    lower.contains(&format!("@{bot}")) || lower.contains(&bot)
}

// ── Rate limit token bucket ───────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct RateBucket {
    tokens: f64,
    updated_at_ms: i64,
}

/// Take one token from the sender's bucket. `max_per_minute == 0` blocks
/// everything.
fn take_rate_token(layout: &StateLayout, sender_key: &str, max_per_minute: u32) -> Result<bool> {
    if max_per_minute == 0 {
        return Ok(false);
    }
    let path = layout.ratelimit_file(sender_key);
    let now = Utc::now().timestamp_millis();
    let max = max_per_minute as f64;

    let mut bucket = read_json::<RateBucket>(&path)?.unwrap_or(RateBucket {
        tokens: max,
        updated_at_ms: now,
    });

    let elapsed_ms = now.saturating_sub(bucket.updated_at_ms) as f64;
    bucket.tokens = (bucket.tokens + elapsed_ms * max / 60_000.0).min(max);
    bucket.updated_at_ms = now;

    let admitted = bucket.tokens >= 1.0;
    if admitted {
        bucket.tokens -= 1.0;
    }
    write_json_atomic(&path, &bucket)?;
    Ok(admitted)
}

// ── Pairing ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct PairingCode {
    code: String,
    created_at: chrono::DateTime<Utc>,
}

/// Pairing DM gate. Verified senders pass (`None`); others get a pairing
/// reply. Sending the correct code completes pairing.
fn check_pairing(rt: &Runtime, msg: &InboundMessage) -> Result<Option<Admission>> {
    let sender_key = format!("{}:{}", msg.channel, msg.sender);
    let verified_marker = rt
        .layout
        .pairing_verified_dir()
        .join(bc_state::safe_key(&sender_key));
    if verified_marker.exists() {
        return Ok(None);
    }

    let code_path = rt
        .layout
        .pairing_dir()
        .join(format!("{}.json", bc_state::safe_key(&sender_key)));
    let existing = read_json::<PairingCode>(&code_path)?;

    if let Some(pairing) = &existing {
        if msg.text.trim() == pairing.code {
            std::fs::write(&verified_marker, b"")?;
            let _ = std::fs::remove_file(&code_path);
            rt.audit.record(
                "pairing_completed",
                serde_json::json!({"sender": sender_key}),
            );
            return Ok(Some(Admission::Reply("Pairing complete. You can chat now.".into())));
        }
    }

    let code = match existing {
        Some(p) => p.code,
        None => {
            let code = generate_pairing_code();
            write_json_atomic(
                &code_path,
                &PairingCode {
                    code: code.clone(),
                    created_at: Utc::now(),
                },
            )?;
            code
        }
    };
    rt.audit.record(
        "pairing_requested",
        serde_json::json!({"sender": sender_key, "code": code}),
    );
    Ok(Some(Admission::Reply(
        "Pairing required. Ask the operator for your pairing code and send it here."
            .into(),
    )))
}

fn generate_pairing_code() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigHandle;
    use std::sync::Arc;

    fn runtime() -> (tempfile::TempDir, Runtime) {
        let dir = tempfile::tempdir().unwrap();
        let handle =
            Arc::new(ConfigHandle::load(dir.path().join("bashclaw.json")).unwrap());
        let rt = Runtime::with_root(handle, dir.path()).unwrap();
        (dir, rt)
    }

    fn dm(channel: &str, sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel: channel.into(),
            sender: sender.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn open_dm_is_admitted() {
        let (_dir, rt) = runtime();
        let config = rt.config.snapshot();
        let verdict = admit(&rt, &config, &dm("web", "alice", "hello")).await.unwrap();
        assert_eq!(verdict, Admission::Admit);
    }

    #[tokio::test]
    async fn duplicates_within_ttl_are_dropped() {
        let (_dir, rt) = runtime();
        let config = rt.config.snapshot();
        let msg = dm("web", "alice", "same text");
        assert_eq!(admit(&rt, &config, &msg).await.unwrap(), Admission::Admit);
        assert_eq!(
            admit(&rt, &config, &msg).await.unwrap(),
            Admission::Deny("duplicate")
        );
    }

    #[tokio::test]
    async fn zero_rate_limit_blocks_all() {
        let (_dir, rt) = runtime();
        let mut config = (*rt.config.snapshot()).clone();
        config.security.rate_limit_per_minute = 0;
        let verdict = admit(&rt, &config, &dm("web", "bob", "hi")).await.unwrap();
        assert_eq!(verdict, Admission::Deny("rate_limited"));
    }

    #[tokio::test]
    async fn rate_limit_exhausts_bucket() {
        let (_dir, rt) = runtime();
        let mut config = (*rt.config.snapshot()).clone();
        config.security.rate_limit_per_minute = 2;
        for i in 0..2 {
            let verdict = admit(&rt, &config, &dm("web", "carol", &format!("m{i}")))
                .await
                .unwrap();
            assert_eq!(verdict, Admission::Admit, "message {i} should pass");
        }
        let verdict = admit(&rt, &config, &dm("web", "carol", "m3")).await.unwrap();
        assert_eq!(verdict, Admission::Deny("rate_limited"));
    }

    #[tokio::test]
    async fn mention_only_gate() {
        let (_dir, rt) = runtime();
        let mut config = (*rt.config.snapshot()).clone();
        config.channels.insert(
            "discord".into(),
            ChannelConfig {
                bot_name: "clawbot".into(),
                group_policy: GroupPolicy::MentionOnly,
                ..Default::default()
            },
        );

        let mut unmentioned = dm("discord", "dave", "hello all");
        unmentioned.is_group = true;
        assert_eq!(
            admit(&rt, &config, &unmentioned).await.unwrap(),
            Admission::Deny("not_mentioned")
        );

        let mut mentioned = dm("discord", "dave", "hey @ClawBot what's up");
        mentioned.is_group = true;
        assert_eq!(admit(&rt, &config, &mentioned).await.unwrap(), Admission::Admit);

        let mut bare_name = dm("discord", "dave", "clawbot: status?");
        bare_name.is_group = true;
        assert_eq!(admit(&rt, &config, &bare_name).await.unwrap(), Admission::Admit);
    }

    #[tokio::test]
    async fn allowlist_gate() {
        let (_dir, rt) = runtime();
        let mut config = (*rt.config.snapshot()).clone();
        config.channels.insert(
            "telegram".into(),
            ChannelConfig {
                dm_policy: DmPolicy::Allowlist,
                allowlist: vec!["alice".into()],
                ..Default::default()
            },
        );
        assert_eq!(
            admit(&rt, &config, &dm("telegram", "alice", "hi")).await.unwrap(),
            Admission::Admit
        );
        assert_eq!(
            admit(&rt, &config, &dm("telegram", "mallory", "hi")).await.unwrap(),
            Admission::Deny("not_allowlisted")
        );
    }

    #[tokio::test]
    async fn auto_reply_short_circuits() {
        let (_dir, rt) = runtime();
        let mut config = (*rt.config.snapshot()).clone();
        config.channels.insert(
            "web".into(),
            ChannelConfig {
                auto_replies: vec![bc_domain::config::AutoReply {
                    pattern: "ping|are you up".into(),
                    response: "pong".into(),
                }],
                ..Default::default()
            },
        );
        let verdict = admit(&rt, &config, &dm("web", "x", "PING")).await.unwrap();
        assert_eq!(verdict, Admission::Reply("pong".into()));
    }

    #[tokio::test]
    async fn pairing_flow_completes_with_code() {
        let (_dir, rt) = runtime();
        let mut config = (*rt.config.snapshot()).clone();
        config.channels.insert(
            "telegram".into(),
            ChannelConfig {
                dm_policy: DmPolicy::Pairing,
                ..Default::default()
            },
        );

        // First contact: pairing reply, code stored on disk.
        let verdict = admit(&rt, &config, &dm("telegram", "eve", "hello"))
            .await
            .unwrap();
        assert!(matches!(verdict, Admission::Reply(_)));

        let code_path = rt
            .layout
            .pairing_dir()
            .join(format!("{}.json", bc_state::safe_key("telegram:eve")));
        let stored: PairingCode = read_json(&code_path).unwrap().unwrap();

        // Sending the code verifies the sender.
        let verdict = admit(&rt, &config, &dm("telegram", "eve", &stored.code))
            .await
            .unwrap();
        assert!(matches!(verdict, Admission::Reply(r) if r.contains("complete")));

        // Subsequent messages pass.
        let verdict = admit(&rt, &config, &dm("telegram", "eve", "now chat"))
            .await
            .unwrap();
        assert_eq!(verdict, Admission::Admit);
    }
}
