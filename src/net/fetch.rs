// src/net/fetch.rs

//! Retrying fetcher: bounded exponential backoff with jitter, `Retry-After`
//! support, retryable/terminal status classification, and one-shot backup
//! URL fallback.
//!
//! The HTTP layer is behind the [`Transport`] trait so tests can script
//! response sequences without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::Rng;

use crate::error::{FetchError, Result};

/// What the caller expects the body to be. A well-formed HTML error page
/// where XML/JSON was expected is a parse failure, not a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedFormat {
    Xml,
    Json,
    Html,
}

/// Raw response handed back by a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    /// Parsed `Retry-After` header, in seconds.
    pub retry_after: Option<u64>,
}

/// Minimal HTTP surface the fetcher needs. Network-level failures map to
/// [`FetchError::Network`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse>;
}

/// Production transport over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = resp.text().await.map_err(FetchError::from)?;

        Ok(TransportResponse {
            status,
            body,
            content_type,
            retry_after,
        })
    }
}

/// Retry tuning for one fetch call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor in [0,1]; 0.5 means +/-50% around the computed delay.
    pub jitter_factor: f64,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.5,
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Exponential delay for the given attempt (0-based), before jitter.
/// Non-decreasing in `attempt` and capped at `max_delay`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = attempt.min(16);
    let ms = policy.base_delay.as_millis() as u64;
    let raw = ms.saturating_mul(1u64 << exp);
    Duration::from_millis(raw).min(policy.max_delay)
}

/// Spread a delay by the policy's jitter factor.
pub fn apply_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }
    let mut rng = rand::rng();
    let spread: f64 = rng.random_range(-jitter_factor..=jitter_factor);
    let ms = (delay.as_millis() as f64 * (1.0 + spread)).max(0.0) as u64;
    Duration::from_millis(ms)
}

/// `true` when the body is an HTML document (error pages, login walls)
/// rather than the feed payload.
pub fn looks_like_html(body: &str, content_type: Option<&str>) -> bool {
    if let Some(ct) = content_type {
        if ct.to_ascii_lowercase().contains("text/html") {
            return true;
        }
    }
    let head = body.trim_start().get(..15).unwrap_or(body.trim_start());
    let lower = head.to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html")
}

/// Retrying fetcher. One instance is shared across the batch; per-source
/// isolation comes from the circuit breaker and rate limiter around it.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`, retrying 429/5xx/network errors with backoff and
    /// honoring `Retry-After`. Other 4xx fail immediately. Returns the body
    /// once a 2xx arrives and the body plausibly matches `expect`.
    pub async fn fetch_text(&self, url: &str, expect: ExpectedFormat) -> Result<String> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 0..=self.policy.max_retries {
            let outcome = self.transport.get(url, self.policy.request_timeout).await;

            let err = match outcome {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    if expect != ExpectedFormat::Html
                        && looks_like_html(&resp.body, resp.content_type.as_deref())
                    {
                        return Err(FetchError::parse(
                            url,
                            "got an HTML page where a feed body was expected",
                        ));
                    }
                    return Ok(resp.body);
                }
                Ok(resp) => {
                    let err = FetchError::UpstreamHttp {
                        status: resp.status,
                        message: format!("GET {url}"),
                    };
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    // 429 with Retry-After overrides the computed backoff.
                    if resp.status == 429 {
                        if let Some(secs) = resp.retry_after {
                            if attempt < self.policy.max_retries {
                                tracing::warn!(
                                    url,
                                    attempt,
                                    retry_after = secs,
                                    "rate limited upstream, honoring Retry-After"
                                );
                                counter!("ingest_fetch_retries_total").increment(1);
                                tokio::time::sleep(Duration::from_secs(secs)).await;
                                last_err = Some(err);
                                continue;
                            }
                        }
                    }
                    err
                }
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    e
                }
            };

            if attempt < self.policy.max_retries {
                let delay = apply_jitter(
                    backoff_delay(&self.policy, attempt),
                    self.policy.jitter_factor,
                );
                tracing::warn!(url, attempt, error = %err, delay_ms = delay.as_millis() as u64, "fetch failed, retrying");
                counter!("ingest_fetch_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| FetchError::network("retries exhausted")))
    }

    /// Fetch with a one-shot fallback: when the primary URL fails for any
    /// reason and a backup is configured, the backup is tried once.
    pub async fn fetch_with_fallback(
        &self,
        primary: &str,
        backup: Option<&str>,
        expect: ExpectedFormat,
    ) -> Result<String> {
        match self.fetch_text(primary, expect).await {
            Ok(body) => Ok(body),
            Err(primary_err) => match backup {
                Some(url) => {
                    tracing::warn!(
                        primary,
                        backup = url,
                        error = %primary_err,
                        "primary URL failed, trying backup"
                    );
                    self.fetch_text(url, expect).await
                }
                None => Err(primary_err),
            },
        }
    }
}
