//! Retry policy and provider error classification.

use std::future::Future;
use std::time::Duration;

use bc_domain::{is_overflow_message, Error, Result};

/// Map an HTTP failure to the domain taxonomy: 413 and overflow phrases
/// become `ProviderOverflow`, 429/5xx become retryable transport errors,
/// everything else is fatal.
pub fn classify_http_error(status: u16, body: &str) -> Error {
    if status == 413 || is_overflow_message(body) {
        return Error::ProviderOverflow(format!("HTTP {status}: {body}"));
    }
    if status == 429 || status >= 500 {
        return Error::ProviderTransport(format!("HTTP {status}: {body}"));
    }
    Error::ProviderFatal(format!("HTTP {status}: {body}"))
}

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Run a provider call with up to 3 attempts, retrying only transport
/// errors, with jittered exponential backoff starting at 2 s.
pub async fn with_retries<T, F, Fut>(mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = backoff_with_jitter(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    use rand::Rng;
    let base = BASE_BACKOFF_MS * (1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn classification_by_status() {
        assert!(matches!(
            classify_http_error(413, "too big"),
            Error::ProviderOverflow(_)
        ));
        assert!(matches!(
            classify_http_error(400, "prompt is too long"),
            Error::ProviderOverflow(_)
        ));
        assert!(matches!(
            classify_http_error(429, "slow down"),
            Error::ProviderTransport(_)
        ));
        assert!(matches!(
            classify_http_error(503, "unavailable"),
            Error::ProviderTransport(_)
        ));
        assert!(matches!(
            classify_http_error(401, "bad key"),
            Error::ProviderFatal(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_retry_up_to_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<()> = with_retries(move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderTransport("503".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<()> = with_retries(move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderFatal("401".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let result = with_retries(|| async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
