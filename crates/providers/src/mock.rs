//! Scripted provider for tests: returns queued responses in order and
//! records every request it received.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use bc_domain::{
    ContentBlock, Error, ProviderResponse, Result, StopReason, TokenUsage,
};

use crate::traits::{ChatRequest, Provider};

#[derive(Clone)]
pub struct MockProvider {
    id: String,
    script: Arc<Mutex<VecDeque<Result<ProviderResponse>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, response: Result<ProviderResponse>) {
        self.script.lock().push_back(response);
    }

    /// Queue a plain text end-of-turn response.
    pub fn push_text(&self, text: &str) {
        self.push(Ok(ProviderResponse {
            stop_reason: StopReason::EndTurn,
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: "mock-model".into(),
        }));
    }

    /// Queue a tool_use response with one call.
    pub fn push_tool_call(&self, tool_id: &str, name: &str, input: serde_json::Value) {
        self.push(Ok(ProviderResponse {
            stop_reason: StopReason::ToolUse,
            content: vec![ContentBlock::ToolUse {
                id: tool_id.to_string(),
                name: name.to_string(),
                input,
            }],
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: "mock-model".into(),
        }));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<ProviderResponse> {
        self.requests.lock().push(req.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::ProviderFatal("mock script exhausted".into())))
    }

    fn id(&self) -> &str {
        &self.id
    }
}
