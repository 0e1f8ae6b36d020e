//! Delivery planning: where the reply goes and how it is chunked.

use serde::Serialize;

use bc_domain::config::{channel_text_limit, ChannelConfig};

use super::InboundMessage;

/// Everything a transport adapter needs to route the reply.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPlan {
    pub channel: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl DeliveryPlan {
    pub fn for_message(msg: &InboundMessage) -> Self {
        Self {
            channel: msg.channel.clone(),
            to: msg.sender.clone(),
            thread_id: msg.thread_id.clone(),
            reply_to_message_id: msg.message_id.clone(),
            account_id: msg.account_id.clone(),
        }
    }
}

/// Split outbound text into chunks within the channel's limit, preferring
/// paragraph boundaries, then newlines, then spaces, else a hard cut.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        let mut window_end = limit;
        while !rest.is_char_boundary(window_end) {
            window_end -= 1;
        }
        if window_end == 0 {
            // Limit smaller than the first character: take one char whole.
            window_end = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        }
        let window = &rest[..window_end];

        let cut = window
            .rfind("\n\n")
            .map(|i| (i, 2))
            .or_else(|| window.rfind('\n').map(|i| (i, 1)))
            .or_else(|| window.rfind(' ').map(|i| (i, 1)));

        let (chunk_end, skip) = match cut {
            Some((i, len)) if i > 0 => (i, len),
            _ => (window_end, 0),
        };

        chunks.push(rest[..chunk_end].to_string());
        rest = &rest[chunk_end + skip..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// The effective chunk limit for a channel.
pub fn limit_for(channel: &str, cfg: Option<&ChannelConfig>) -> usize {
    channel_text_limit(channel, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_text("hello", 100), vec!["hello"]);
    }

    #[test]
    fn paragraph_boundary_preferred() {
        let text = format!("{}\n\n{}", "a".repeat(50), "b".repeat(50));
        let chunks = split_text(&text, 80);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(50));
        assert_eq!(chunks[1], "b".repeat(50));
    }

    #[test]
    fn newline_fallback() {
        let text = format!("{}\n{}", "a".repeat(50), "b".repeat(50));
        let chunks = split_text(&text, 80);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(50));
    }

    #[test]
    fn space_fallback_then_hard_cut() {
        let text = format!("{} {}", "a".repeat(50), "b".repeat(50));
        let chunks = split_text(&text, 80);
        assert_eq!(chunks[0], "a".repeat(50));

        // No boundaries at all: hard cut.
        let solid = "x".repeat(150);
        let chunks = split_text(&solid, 60);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 60);
    }

    #[test]
    fn concat_round_trips_modulo_whitespace() {
        let text = "first paragraph here\n\nsecond paragraph with more words\nand a line";
        let chunks = split_text(text, 30);
        let rejoined: String = chunks.join(" ");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&rejoined), normalize(text));
    }

    #[test]
    fn every_chunk_is_within_limit() {
        let text = "word ".repeat(500);
        for chunk in split_text(&text, 64) {
            assert!(chunk.len() <= 64, "chunk over limit: {}", chunk.len());
        }
    }

    #[test]
    fn plan_copies_routing_fields() {
        let msg = InboundMessage {
            channel: "telegram".into(),
            sender: "alice".into(),
            text: "hi".into(),
            thread_id: Some("t1".into()),
            message_id: Some("m9".into()),
            account_id: Some("acct".into()),
            ..Default::default()
        };
        let plan = DeliveryPlan::for_message(&msg);
        assert_eq!(plan.channel, "telegram");
        assert_eq!(plan.to, "alice");
        assert_eq!(plan.thread_id.as_deref(), Some("t1"));
        assert_eq!(plan.reply_to_message_id.as_deref(), Some("m9"));
    }
}
