//! Anthropic Messages API adapter.
//!
//! System text travels in the top-level `system` field; tool results are
//! sent back as user messages carrying `tool_result` content blocks.

use serde_json::Value;

use bc_domain::{
    ContentBlock, ContentPart, Error, Message, MessageContent, ProviderResponse, Result, Role,
    StopReason, TokenUsage, ToolDefinition,
};

use crate::retry::classify_http_error;
use crate::traits::{ChatRequest, Provider};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(id: &str, base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::ProviderTransport(e.to_string()))?;
        Ok(Self {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<ProviderResponse> {
        let body = build_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ProviderTransport(format!("timeout: {e}"))
                } else {
                    Error::ProviderTransport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::ProviderTransport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(classify_http_error(status, &text));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| Error::ProviderFatal(format!("unparseable response: {e}")))?;
        parse_response(&json)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

// ── Request serialization ──────────────────────────────────────────

pub(crate) fn build_body(req: &ChatRequest) -> Value {
    let mut api_messages: Vec<Value> = Vec::new();
    for msg in &req.messages {
        match msg.role {
            Role::System => {
                // System content outside the top-level field becomes a user
                // turn so nothing silently disappears mid-conversation.
                api_messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content.joined_text(),
                }));
            }
            Role::User => api_messages.push(serde_json::json!({
                "role": "user",
                "content": msg.content.joined_text(),
            })),
            Role::Assistant => api_messages.push(assistant_to_wire(msg)),
            Role::Tool => api_messages.push(tool_result_to_wire(msg)),
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": api_messages,
        "max_tokens": req.max_tokens,
    });
    if let Some(system) = &req.system {
        body["system"] = Value::String(system.clone());
    }
    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
    }
    body
}

fn assistant_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => {
                    Some(serde_json::json!({"type": "text", "text": text}))
                }
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                ContentPart::ToolResult { .. } => None,
            })
            .collect(),
    };
    serde_json::json!({"role": "assistant", "content": content})
}

fn tool_result_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_id,
                    content,
                    is_error,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => {
            vec![serde_json::json!({"type": "text", "text": t})]
        }
    };
    serde_json::json!({"role": "user", "content": content})
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

// ── Response parsing ───────────────────────────────────────────────

pub(crate) fn parse_response(body: &Value) -> Result<ProviderResponse> {
    let mut content = Vec::new();
    for block in body
        .get("content")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
    {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                    content.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                content.push(ContentBlock::ToolUse {
                    id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {}
        }
    }

    let stop_reason = match body.get("stop_reason").and_then(|v| v.as_str()) {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    let usage = TokenUsage {
        input_tokens: body
            .pointer("/usage/input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        output_tokens: body
            .pointer("/usage/output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    };

    Ok(ProviderResponse {
        stop_reason,
        content,
        usage,
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_hoists_system_and_tools() {
        let req = ChatRequest {
            model: "claude-sonnet-4-20250514".into(),
            system: Some("be brief".into()),
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "shell".into(),
                description: "run".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            max_tokens: 1024,
            temperature: Some(0.2),
        };
        let body = build_body(&req);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn tool_results_become_user_blocks() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![Message::tool_result("t1", "out", false)],
            max_tokens: 10,
            ..Default::default()
        };
        let body = build_body(&req);
        let block = &body["messages"][0];
        assert_eq!(block["role"], "user");
        assert_eq!(block["content"][0]["type"], "tool_result");
        assert_eq!(block["content"][0]["tool_use_id"], "t1");
    }

    #[test]
    fn parse_text_response() {
        let body = serde_json::json!({
            "content": [{"type": "text", "text": "4"}],
            "stop_reason": "end_turn",
            "model": "claude-sonnet-4-20250514",
            "usage": {"input_tokens": 12, "output_tokens": 2},
        });
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(resp.text(), "4");
        assert_eq!(resp.usage.input_tokens, 12);
    }

    #[test]
    fn parse_tool_use_response() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "toolu_1", "name": "web_fetch",
                 "input": {"url": "https://example.com"}},
            ],
            "stop_reason": "tool_use",
            "model": "claude-sonnet-4-20250514",
            "usage": {"input_tokens": 5, "output_tokens": 9},
        });
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        let calls = resp.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_id, "toolu_1");
        assert_eq!(calls[0].tool_input["url"], "https://example.com");
    }
}
