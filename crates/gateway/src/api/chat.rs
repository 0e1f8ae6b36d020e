//! `POST /api/chat` — the one endpoint structurally tied to the core.

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::routing::{process_inbound, InboundMessage};
use crate::state::Runtime;

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatResponseBody {
    Ok { text: String },
    Err { error: String },
}

pub async fn post_chat(
    State(rt): State<Runtime>,
    Json(body): Json<ChatRequestBody>,
) -> Json<ChatResponseBody> {
    let msg = InboundMessage {
        channel: body.channel.unwrap_or_else(|| "web".into()),
        sender: body.sender.unwrap_or_else(|| "api".into()),
        text: body.message,
        agent_override: body.agent_id,
        ..Default::default()
    };

    match process_inbound(&rt, msg).await {
        Ok(Some(reply)) => Json(ChatResponseBody::Ok {
            text: reply.chunks.join("\n"),
        }),
        // Silent replies and denied messages deliver nothing.
        Ok(None) => Json(ChatResponseBody::Ok {
            text: String::new(),
        }),
        Err(e) => Json(ChatResponseBody::Err {
            error: e.to_string(),
        }),
    }
}
