//! Web tools: `web_fetch` with an SSRF guard, `web_search` via Brave with
//! a Perplexity fallback.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use bc_domain::{Error, Result};

pub const FETCH_TIMEOUT_SECS: u64 = 30;
pub const MAX_REDIRECTS: usize = 5;
pub const DEFAULT_MAX_CHARS: usize = 50_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSRF guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hostname patterns that are never fetched, before any DNS lookup.
pub fn host_is_private(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']').to_lowercase();

    if host == "localhost" || host == "metadata.google.internal" {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip_is_private(&ip);
    }

    false
}

/// Private / link-local / loopback address ranges.
pub fn ip_is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
                || o[0] == 127
                || o[0] == 0
                || (o[0] == 169 && o[1] == 254)
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let seg = v6.segments();
            // fe80::/10 link-local, fc00::/7 unique-local.
            (seg[0] & 0xffc0) == 0xfe80 || (seg[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Validate a URL for fetching: scheme, hostname patterns, and every
/// resolved address must be public.
pub async fn check_url(url: &str) -> Result<reqwest::Url> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::ToolValidation(format!("invalid url: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::ToolValidation(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::ToolValidation("url has no host".into()))?;

    if host_is_private(host) {
        return Err(Error::ToolBlocked(
            "SSRF blocked: request to private/internal address denied".into(),
        ));
    }

    // Resolve and check each address; a public name pointing at a private
    // address is still denied.
    if host.parse::<IpAddr>().is_err() {
        let port = parsed.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::ToolValidation(format!("dns lookup failed: {e}")))?;
        for addr in addrs {
            if ip_is_private(&addr.ip()) {
                return Err(Error::ToolBlocked(
                    "SSRF blocked: request to private/internal address denied".into(),
                ));
            }
        }
    }

    Ok(parsed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// web_fetch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub status: u16,
    pub body: String,
    pub truncated: bool,
    pub url: String,
}

/// GET a URL with up to 5 redirects, each hop re-checked against the SSRF
/// guard, body truncated to `max_chars`.
pub async fn web_fetch(url: &str, max_chars: Option<usize>) -> Result<FetchResult> {
    let max_chars = max_chars.unwrap_or(DEFAULT_MAX_CHARS);
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Other(e.to_string()))?;

    let mut current = check_url(url).await?;
    for _ in 0..=MAX_REDIRECTS {
        let response = client
            .get(current.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ToolTimeout(format!("fetch exceeded {FETCH_TIMEOUT_SECS}s"))
                } else {
                    Error::Other(format!("fetch failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::Other("redirect without location".into()))?;
            let next = current
                .join(location)
                .map_err(|e| Error::ToolValidation(format!("bad redirect: {e}")))?;
            current = check_url(next.as_str()).await?;
            continue;
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Other(format!("read body: {e}")))?;
        let truncated = body.chars().count() > max_chars;
        let body = if truncated {
            body.chars().take(max_chars).collect()
        } else {
            body
        };
        return Ok(FetchResult {
            status: status.as_u16(),
            body,
            truncated,
            url: current.to_string(),
        });
    }

    Err(Error::Other(format!(
        "too many redirects (> {MAX_REDIRECTS})"
    )))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// web_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// Search the web: Brave when `BRAVE_API_KEY` is set, else Perplexity,
/// else a configuration error.
pub async fn web_search(query: &str, count: usize) -> Result<Vec<SearchResult>> {
    let count = count.clamp(1, 10);
    if let Ok(key) = std::env::var("BRAVE_API_KEY") {
        return brave_search(query, count, &key).await;
    }
    if let Ok(key) = std::env::var("PERPLEXITY_API_KEY") {
        return perplexity_search(query, &key).await;
    }
    Err(Error::ConfigInvalid(
        "no search provider configured (set BRAVE_API_KEY or PERPLEXITY_API_KEY)".into(),
    ))
}

async fn brave_search(query: &str, count: usize, key: &str) -> Result<Vec<SearchResult>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Other(e.to_string()))?;

    let response = client
        .get("https://api.search.brave.com/res/v1/web/search")
        .header("X-Subscription-Token", key)
        .query(&[("q", query), ("count", &count.to_string())])
        .send()
        .await
        .map_err(|e| Error::Other(format!("brave search: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Other(format!(
            "brave search returned {}",
            response.status()
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Other(format!("brave search body: {e}")))?;

    let results = json
        .pointer("/web/results")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .take(count)
                .map(|item| SearchResult {
                    title: item
                        .get("title")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    url: item
                        .get("url")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    description: item
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(results)
}

async fn perplexity_search(query: &str, key: &str) -> Result<Vec<SearchResult>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Other(e.to_string()))?;

    let body = serde_json::json!({
        "model": "sonar",
        "messages": [
            {"role": "system", "content": "Answer concisely with sources."},
            {"role": "user", "content": query},
        ],
    });

    let response = client
        .post("https://api.perplexity.ai/chat/completions")
        .bearer_auth(key)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Other(format!("perplexity: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Other(format!(
            "perplexity returned {}",
            response.status()
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Other(format!("perplexity body: {e}")))?;

    let answer = json
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    Ok(vec![SearchResult {
        title: format!("Perplexity: {query}"),
        url: "https://www.perplexity.ai".into(),
        description: answer.to_string(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_hostnames_are_blocked() {
        assert!(host_is_private("localhost"));
        assert!(host_is_private("metadata.google.internal"));
        assert!(host_is_private("127.0.0.1"));
        assert!(host_is_private("10.1.2.3"));
        assert!(host_is_private("172.16.0.1"));
        assert!(host_is_private("172.31.255.255"));
        assert!(host_is_private("192.168.1.1"));
        assert!(host_is_private("169.254.169.254"));
        assert!(host_is_private("0.0.0.0"));
        assert!(host_is_private("::1"));
        assert!(host_is_private("fe80::1"));
        assert!(host_is_private("fc00::1"));
        assert!(host_is_private("fd12::34"));
    }

    #[test]
    fn public_hosts_pass_the_pattern_check() {
        assert!(!host_is_private("example.com"));
        assert!(!host_is_private("8.8.8.8"));
        assert!(!host_is_private("172.32.0.1"));
        assert!(!host_is_private("2607:f8b0::1"));
    }

    #[tokio::test]
    async fn loopback_url_is_rejected_without_network() {
        let err = check_url("http://127.0.0.1/").await.unwrap_err();
        assert!(matches!(err, Error::ToolBlocked(_)));
        let err = check_url("http://[::1]:8080/x").await.unwrap_err();
        assert!(matches!(err, Error::ToolBlocked(_)));
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let err = check_url("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::ToolValidation(_)));
    }
}
