/// Shared error type used across all BashClaw crates.
///
/// The variants mirror the runtime's propagation policy: provider transport
/// errors are retried, overflow is absorbed by the degradation ladder, tool
/// errors are materialized as `is_error` tool results, and hook failures
/// never block the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("provider transport: {0}")]
    ProviderTransport(String),

    #[error("provider overflow: {0}")]
    ProviderOverflow(String),

    #[error("provider: {0}")]
    ProviderFatal(String),

    #[error("unknown tool: {0}")]
    ToolUnknown(String),

    #[error("tool blocked: {0}")]
    ToolBlocked(String),

    #[error("tool timed out: {0}")]
    ToolTimeout(String),

    #[error("tool input invalid: {0}")]
    ToolValidation(String),

    #[error("queue timeout: {0}")]
    QueueTimeout(String),

    #[error("session corrupt: {0}")]
    SessionCorrupt(String),

    #[error("hook failure: {0}")]
    HookFailure(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error-body phrases that identify a context-overflow response regardless
/// of provider. HTTP 413 is matched separately by the adapters.
const OVERFLOW_PHRASES: &[&str] = &[
    "request_too_large",
    "context length exceeded",
    "maximum context length",
    "prompt is too long",
    "too many tokens",
    "token limit",
    "content too large",
];

/// Check whether a provider error body signals a context overflow.
pub fn is_overflow_message(body: &str) -> bool {
    let lower = body.to_lowercase();
    OVERFLOW_PHRASES.iter().any(|p| lower.contains(p))
}

impl Error {
    /// True when the degradation ladder should absorb this error.
    pub fn is_overflow(&self) -> bool {
        matches!(self, Error::ProviderOverflow(_))
    }

    /// True when the provider call may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ProviderTransport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_phrases_match_case_insensitively() {
        assert!(is_overflow_message("Error: Prompt is too long for model"));
        assert!(is_overflow_message("request_too_large"));
        assert!(is_overflow_message("the maximum context length is 128k"));
        assert!(!is_overflow_message("rate limit exceeded"));
    }

    #[test]
    fn overflow_classification() {
        assert!(Error::ProviderOverflow("x".into()).is_overflow());
        assert!(!Error::ProviderFatal("x".into()).is_overflow());
        assert!(Error::ProviderTransport("503".into()).is_retryable());
        assert!(!Error::ProviderFatal("401".into()).is_retryable());
    }
}
