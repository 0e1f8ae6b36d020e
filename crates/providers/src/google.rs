//! Google Gemini (generateContent) adapter.
//!
//! The Gemini wire has no tool-call ids, so this adapter synthesizes
//! `"<name>::<n>"` ids when parsing and recovers the function name from
//! the id when sending results back as `functionResponse` parts.

use serde_json::Value;

use bc_domain::{
    ContentBlock, ContentPart, Error, Message, MessageContent, ProviderResponse, Result, Role,
    StopReason, TokenUsage,
};

use crate::retry::classify_http_error;
use crate::traits::{ChatRequest, Provider};

const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct GoogleProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GoogleProvider {
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
impl Provider for GoogleProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<ProviderResponse> {
        let body = build_body(req);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, req.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
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
        parse_response(&json, &req.model)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Recover the function name from a synthesized `"<name>::<n>"` id.
fn name_from_call_id(tool_id: &str) -> &str {
    tool_id.rsplit_once("::").map(|(name, _)| name).unwrap_or(tool_id)
}

// ── Request serialization ──────────────────────────────────────────

pub(crate) fn build_body(req: &ChatRequest) -> Value {
    let mut contents: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System | Role::User => contents.push(serde_json::json!({
                "role": "user",
                "parts": [{"text": msg.content.joined_text()}],
            })),
            Role::Assistant => contents.push(assistant_to_wire(msg)),
            Role::Tool => {
                if let MessageContent::Parts(parts) = &msg.content {
                    let fn_parts: Vec<Value> = parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolResult {
                                tool_id, content, ..
                            } => Some(serde_json::json!({
                                "functionResponse": {
                                    "name": name_from_call_id(tool_id),
                                    "response": {"content": content},
                                }
                            })),
                            _ => None,
                        })
                        .collect();
                    contents.push(serde_json::json!({"role": "user", "parts": fn_parts}));
                }
            }
        }
    }

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": {
            "maxOutputTokens": req.max_tokens,
        },
    });
    if let Some(temp) = req.temperature {
        body["generationConfig"]["temperature"] = serde_json::json!(temp);
    }
    if let Some(system) = &req.system {
        body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
    }
    if !req.tools.is_empty() {
        let decls: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::json!([{"functionDeclarations": decls}]);
    }
    body
}

fn assistant_to_wire(msg: &Message) -> Value {
    let parts: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"text": t})],
        MessageContent::Parts(inner) => inner
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(serde_json::json!({"text": text})),
                ContentPart::ToolUse { name, input, .. } => Some(serde_json::json!({
                    "functionCall": {"name": name, "args": input},
                })),
                ContentPart::ToolResult { .. } => None,
            })
            .collect(),
    };
    serde_json::json!({"role": "model", "parts": parts})
}

// ── Response parsing ───────────────────────────────────────────────

pub(crate) fn parse_response(body: &Value, model: &str) -> Result<ProviderResponse> {
    let candidate = body
        .pointer("/candidates/0")
        .ok_or_else(|| Error::ProviderFatal("response has no candidates".into()))?;

    let mut content = Vec::new();
    let mut call_seq = 0usize;
    for part in candidate
        .pointer("/content/parts")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
    {
        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
            content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            content.push(ContentBlock::ToolUse {
                id: format!("{name}::{call_seq}"),
                name,
                input: call.get("args").cloned().unwrap_or(Value::Null),
            });
            call_seq += 1;
        }
    }

    let has_calls = call_seq > 0;
    let stop_reason = match candidate.get("finishReason").and_then(|v| v.as_str()) {
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        _ if has_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage = TokenUsage {
        input_tokens: body
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        output_tokens: body
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    };

    Ok(ProviderResponse {
        stop_reason,
        content,
        usage,
        model: model.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_calls_get_synthesized_ids() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "memory", "args": {"action": "list"}}},
                    {"functionCall": {"name": "shell", "args": {"command": "ls"}}},
                ]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3},
        });
        let resp = parse_response(&body, "gemini-2.0-flash").unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        let calls = resp.tool_calls();
        assert_eq!(calls[0].tool_id, "memory::0");
        assert_eq!(calls[1].tool_id, "shell::1");
    }

    #[test]
    fn function_response_recovers_name_from_id() {
        let req = ChatRequest {
            model: "gemini-2.0-flash".into(),
            messages: vec![Message::tool_result("memory::0", "done", false)],
            max_tokens: 64,
            ..Default::default()
        };
        let body = build_body(&req);
        assert_eq!(
            body["contents"][0]["parts"][0]["functionResponse"]["name"],
            "memory"
        );
    }

    #[test]
    fn system_goes_to_system_instruction() {
        let req = ChatRequest {
            model: "gemini-2.0-flash".into(),
            system: Some("be brief".into()),
            messages: vec![Message::user("hi")],
            max_tokens: 64,
            ..Default::default()
        };
        let body = build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn max_tokens_finish_reason_maps() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "partial"}]},
                "finishReason": "MAX_TOKENS",
            }],
        });
        let resp = parse_response(&body, "gemini-2.0-flash").unwrap();
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
    }
}
