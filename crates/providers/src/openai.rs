//! OpenAI Chat Completions adapter.
//!
//! Maps `choices[0].message.tool_calls` to normalized tool_use blocks and
//! `finish_reason` to the normalized stop reason. Tool arguments travel as
//! JSON strings on this wire and are parsed back into structured values.

use serde_json::Value;

use bc_domain::{
    ContentBlock, ContentPart, Error, Message, MessageContent, ProviderResponse, Result, Role,
    StopReason, TokenUsage,
};

use crate::retry::classify_http_error;
use crate::traits::{ChatRequest, Provider};

const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
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
impl Provider for OpenAiProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<ProviderResponse> {
        let body = build_body(req);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderTransport(e.to_string()))?;

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

    if let Some(system) = &req.system {
        api_messages.push(serde_json::json!({"role": "system", "content": system}));
    }

    for msg in &req.messages {
        match msg.role {
            Role::System => api_messages.push(serde_json::json!({
                "role": "system",
                "content": msg.content.joined_text(),
            })),
            Role::User => api_messages.push(serde_json::json!({
                "role": "user",
                "content": msg.content.joined_text(),
            })),
            Role::Assistant => api_messages.push(assistant_to_wire(msg)),
            Role::Tool => {
                // One wire message per tool_result part.
                if let MessageContent::Parts(parts) = &msg.content {
                    for part in parts {
                        if let ContentPart::ToolResult {
                            tool_id, content, ..
                        } = part
                        {
                            api_messages.push(serde_json::json!({
                                "role": "tool",
                                "tool_call_id": tool_id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": api_messages,
        "max_tokens": req.max_tokens,
    });
    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

fn assistant_to_wire(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "assistant", "content": t}),
        MessageContent::Parts(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            let tool_calls: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": input.to_string(),
                        }
                    })),
                    _ => None,
                })
                .collect();

            let mut wire = serde_json::json!({"role": "assistant"});
            wire["content"] = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.join("\n"))
            };
            if !tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(tool_calls);
            }
            wire
        }
    }
}

// ── Response parsing ───────────────────────────────────────────────

pub(crate) fn parse_response(body: &Value) -> Result<ProviderResponse> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| Error::ProviderFatal("response has no choices".into()))?;

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
    }

    let mut saw_tool_calls = false;
    for tc in message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
    {
        saw_tool_calls = true;
        let args_raw = tc
            .pointer("/function/arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        let input = serde_json::from_str(args_raw)
            .unwrap_or(Value::Object(Default::default()));
        content.push(ContentBlock::ToolUse {
            id: tc
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            name: tc
                .pointer("/function/name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            input,
        });
    }

    let stop_reason = match body
        .pointer("/choices/0/finish_reason")
        .and_then(|v| v.as_str())
    {
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        // Some gateways report "stop" even when tool calls are present.
        _ if saw_tool_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage = TokenUsage {
        input_tokens: body
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        output_tokens: body
            .pointer("/usage/completion_tokens")
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
