// src/ingest/types.rs

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sources::Source;

/// Transient item extracted from one upstream response. Produced by a
/// parser, consumed by the normalizer, never persisted as-is (the alert
/// keeps a serialized copy in `full_content` for audit).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    /// Published timestamp exactly as the upstream wrote it; format varies
    /// by source and is resolved by the normalizer.
    pub published_raw: Option<String>,
    /// Stable upstream identifier when the feed provides one.
    pub external_id: Option<String>,
    /// Source-specific leftovers (e.g. recall classification).
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Classification hint captured by the API adapter, if any.
    pub fn classification(&self) -> Option<&str> {
        self.extra.get("classification").and_then(|v| v.as_str())
    }
}

/// Format-specific extraction seam: raw response body in, raw items out.
/// One implementation per source kind, so the orchestrator never touches
/// XML/JSON/HTML details and a parser can be swapped without touching it.
pub trait SourceAdapter: Send + Sync {
    fn parse(&self, source: &Source, body: &str) -> Result<Vec<RawItem>>;
}
