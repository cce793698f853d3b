// src/error.rs

//! Unified error handling for the ingestion pipeline.
//!
//! Every per-source failure is one of these variants; the orchestrator
//! aggregates them instead of letting any single source abort the batch.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Error taxonomy for one source's fetch/parse/persist cycle.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Timeout, DNS failure, connection refused. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered with a non-2xx status. Retryable only for 429/5xx.
    #[error("upstream returned HTTP {status}: {message}")]
    UpstreamHttp { status: u16, message: String },

    /// Malformed or unexpected feed/response shape. Not retryable; the
    /// source configuration likely needs updating.
    #[error("parse error for {context}: {message}")]
    Parse { context: String, message: String },

    /// Upstream returned a well-formed but empty result set beyond the
    /// staleness window. A data-freshness problem upstream, not a bug here.
    #[error("no results from {source_id}, last data {days_stale} days ago")]
    NoResults { source_id: String, days_stale: i64 },

    /// The circuit breaker rejected the call without attempting I/O.
    #[error("circuit open, retry in {}s", retry_in.as_secs())]
    CircuitOpen { retry_in: Duration },

    /// The per-source quota is exhausted; the call is skipped this cycle.
    #[error("rate limit reached for {key}: {used}/{quota} calls in window")]
    RateLimited { key: String, used: u32, quota: u32 },

    /// The persistence layer itself failed. Environmental.
    #[error("store error: {0}")]
    Store(String),
}

/// Severity classes used by the structured log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FetchError {
    /// Create a network error from any displayable cause.
    pub fn network(message: impl std::fmt::Display) -> Self {
        Self::Network(message.to_string())
    }

    /// Create a parse error with context (source name, endpoint, ...).
    pub fn parse(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl std::fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Whether the retry loop may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::UpstreamHttp { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Short stable tag for log records and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::UpstreamHttp { .. } => "upstream_http",
            FetchError::Parse { .. } => "parse",
            FetchError::NoResults { .. } => "no_results",
            FetchError::CircuitOpen { .. } => "circuit_open",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Store(_) => "store",
        }
    }

    /// Severity for the structured log.
    ///
    /// `retry_pending` marks failures that will be retried before being
    /// surfaced; those are warnings regardless of variant.
    pub fn severity(&self, retry_pending: bool) -> Severity {
        if retry_pending {
            return Severity::Warning;
        }
        match self {
            FetchError::NoResults { .. } => Severity::Critical,
            FetchError::UpstreamHttp { status, .. } if (500..600).contains(status) => {
                Severity::Critical
            }
            FetchError::Store(_) => Severity::Critical,
            FetchError::Parse { .. } => Severity::Error,
            FetchError::Network(_) => Severity::Error,
            FetchError::UpstreamHttp { .. } => Severity::Error,
            FetchError::CircuitOpen { .. } => Severity::Warning,
            FetchError::RateLimited { .. } => Severity::Info,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            FetchError::UpstreamHttp {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            // Timeouts, DNS, connect errors all land here.
            FetchError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_status_class() {
        assert!(FetchError::network("timed out").is_retryable());
        assert!(FetchError::UpstreamHttp {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(FetchError::UpstreamHttp {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!FetchError::UpstreamHttp {
            status: 404,
            message: "gone".into()
        }
        .is_retryable());
        assert!(!FetchError::parse("fda-recalls", "bad xml").is_retryable());
    }

    #[test]
    fn retry_pending_is_always_warning() {
        let e = FetchError::UpstreamHttp {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(e.severity(true), Severity::Warning);
        assert_eq!(e.severity(false), Severity::Critical);
    }

    #[test]
    fn terminal_severities() {
        assert_eq!(
            FetchError::NoResults {
                source_id: "cdc-outbreaks".into(),
                days_stale: 21
            }
            .severity(false),
            Severity::Critical
        );
        assert_eq!(
            FetchError::parse("fsis", "unexpected shape").severity(false),
            Severity::Error
        );
        assert_eq!(
            FetchError::CircuitOpen {
                retry_in: Duration::from_secs(42)
            }
            .severity(false),
            Severity::Warning
        );
    }
}
