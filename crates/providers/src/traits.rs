use bc_domain::{Message, ProviderResponse, Result, ToolDefinition};

/// A provider-agnostic completion request. The system prompt travels
/// separately because the anthropic shape hoists it out of the message
/// list.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Concrete model id (already catalog-resolved).
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Trait every LLM adapter implements. One call, one full-turn response —
/// streaming delivery is out of scope for this runtime.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, req: &ChatRequest) -> Result<ProviderResponse>;

    /// Provider id from the catalog (e.g. "anthropic").
    fn id(&self) -> &str;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("id", &self.id()).finish()
    }
}
