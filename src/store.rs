// src/store.rs

//! Persistence contract consumed by the pipeline, plus an in-memory
//! reference implementation used by tests and the demo binary.
//!
//! The real storage layer lives outside this crate; the pipeline only ever
//! talks through [`AlertStore`]: upsert-alert, query-recent-for-dedup,
//! read/write per-source run state, and append structured log records.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, Severity};

/// Coarse severity classification driving downstream alerting priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

/// Canonical normalized regulatory event record.
///
/// Created by the normalizer, persisted once, never mutated by the
/// pipeline afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub title: String,
    /// Feed/API identity the alert is attributed to (may be rewritten by
    /// the re-attribution heuristic; see `provenance`).
    pub source: String,
    pub agency: String,
    pub region: String,
    pub urgency: Urgency,
    pub summary: String,
    pub published_date: DateTime<Utc>,
    pub external_url: Option<String>,
    /// Serialized raw item, kept for audit/debug.
    pub full_content: String,
    /// Stable upstream identifier when the source provides one.
    pub external_id: Option<String>,
    /// Hash of `(source, title)`, the fallback dedup identity.
    pub content_hash: String,
    /// Name of the feed that actually delivered the item when agency/source
    /// were rewritten (e.g. a CDC feed republishing an FDA recall).
    pub provenance: Option<String>,
}

impl Alert {
    /// Stable hash over the identity fields, used when no external id exists.
    pub fn content_hash_for(source: &str, title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(title.trim().to_lowercase().as_bytes());
        let digest = hasher.finalize();
        format!("{digest:x}")
    }
}

/// Last-run status of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// Operator-facing health of a source, derived from run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHealth {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

/// Per-source bookkeeping of when it last ran and whether that succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub last_run: Option<DateTime<Utc>>,
    /// Next eligible run, derived from the source's polling interval.
    pub next_run: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub last_successful_fetch: Option<DateTime<Utc>>,
}

impl RunState {
    /// Health bands: success within 24h is healthy, within 72h degraded,
    /// older than that critical; a source that never succeeded is unknown.
    pub fn health(&self, now: DateTime<Utc>) -> SourceHealth {
        match self.last_successful_fetch {
            None => SourceHealth::Unknown,
            Some(t) if now - t <= Duration::hours(24) => SourceHealth::Healthy,
            Some(t) if now - t <= Duration::hours(72) => SourceHealth::Degraded,
            Some(_) => SourceHealth::Critical,
        }
    }
}

/// Outcome of an upsert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// An existing row with the same `(external_id, source)` was replaced.
    Updated,
    /// The store itself recognized the row as already present.
    Skipped,
}

/// Append-only structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub function: String,
    pub kind: String,
    pub message: String,
    /// Free-form context: endpoint, attempt number, upstream status, ...
    pub context: serde_json::Value,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Storage interface implemented by the (excluded) persistence layer.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn upsert_alert(&self, alert: Alert) -> Result<UpsertOutcome>;

    /// Alerts for one source published at or after `since`, for dedup.
    async fn recent_alerts_by_source(
        &self,
        source: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Alert>>;

    async fn run_state(&self, source_id: &str) -> Result<RunState>;

    async fn set_run_state(&self, source_id: &str, state: RunState) -> Result<()>;

    async fn append_log(&self, entry: ErrorLogEntry) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    alerts: Vec<Alert>,
    run_states: HashMap<String, RunState>,
    log: Vec<ErrorLogEntry>,
}

/// In-memory store. Not a production backend; it exists so the pipeline
/// can run end-to-end in tests and the demo binary.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all persisted alerts (test helper).
    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().expect("store lock").alerts.clone()
    }

    /// Snapshot of the structured log (test helper).
    pub fn log_entries(&self) -> Vec<ErrorLogEntry> {
        self.inner.lock().expect("store lock").log.clone()
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn upsert_alert(&self, alert: Alert) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().expect("store lock");

        if let Some(ext) = alert.external_id.as_deref() {
            if let Some(existing) = inner
                .alerts
                .iter_mut()
                .find(|a| a.source == alert.source && a.external_id.as_deref() == Some(ext))
            {
                *existing = alert;
                return Ok(UpsertOutcome::Updated);
            }
        }

        // Last-line guard against identical rows slipping past dedup.
        let already = inner.alerts.iter().any(|a| {
            a.source == alert.source
                && a.title == alert.title
                && a.published_date == alert.published_date
        });
        if already {
            return Ok(UpsertOutcome::Skipped);
        }

        inner.alerts.push(alert);
        Ok(UpsertOutcome::Inserted)
    }

    async fn recent_alerts_by_source(
        &self,
        source: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .alerts
            .iter()
            .filter(|a| a.source == source && a.published_date >= since)
            .cloned()
            .collect())
    }

    async fn run_state(&self, source_id: &str) -> Result<RunState> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner.run_states.get(source_id).cloned().unwrap_or_default())
    }

    async fn set_run_state(&self, source_id: &str, state: RunState) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        inner.run_states.insert(source_id.to_string(), state);
        Ok(())
    }

    async fn append_log(&self, entry: ErrorLogEntry) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        inner.log.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_alert(source: &str, title: &str, external_id: Option<&str>) -> Alert {
        Alert {
            title: title.to_string(),
            source: source.to_string(),
            agency: "FDA".into(),
            region: "US".into(),
            urgency: Urgency::Medium,
            summary: title.to_string(),
            published_date: Utc::now(),
            external_url: None,
            full_content: "{}".into(),
            external_id: external_id.map(|s| s.to_string()),
            content_hash: Alert::content_hash_for(source, title),
            provenance: None,
        }
    }

    #[tokio::test]
    async fn external_id_conflict_updates_in_place() {
        let store = MemoryStore::new();
        let a = mk_alert("fda-recalls", "Recall A", Some("R-1"));
        let mut b = mk_alert("fda-recalls", "Recall A (corrected)", Some("R-1"));
        b.published_date = a.published_date;

        assert_eq!(store.upsert_alert(a).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_alert(b).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.alerts().len(), 1);
        assert_eq!(store.alerts()[0].title, "Recall A (corrected)");
    }

    #[tokio::test]
    async fn recent_query_filters_by_source_and_time() {
        let store = MemoryStore::new();
        let mut old = mk_alert("fda-recalls", "Old recall", None);
        old.published_date = Utc::now() - Duration::days(30);
        store.upsert_alert(old).await.unwrap();
        store
            .upsert_alert(mk_alert("fda-recalls", "Fresh recall", None))
            .await
            .unwrap();
        store
            .upsert_alert(mk_alert("fsis-recalls", "Other feed", None))
            .await
            .unwrap();

        let recent = store
            .recent_alerts_by_source("fda-recalls", Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "Fresh recall");
    }

    #[test]
    fn health_bands() {
        let now = Utc::now();
        let mut rs = RunState::default();
        assert_eq!(rs.health(now), SourceHealth::Unknown);

        rs.last_successful_fetch = Some(now - Duration::hours(2));
        assert_eq!(rs.health(now), SourceHealth::Healthy);

        rs.last_successful_fetch = Some(now - Duration::hours(48));
        assert_eq!(rs.health(now), SourceHealth::Degraded);

        rs.last_successful_fetch = Some(now - Duration::days(10));
        assert_eq!(rs.health(now), SourceHealth::Critical);
    }

    #[test]
    fn content_hash_is_case_insensitive_on_title() {
        let a = Alert::content_hash_for("fda-recalls", "Listeria Recall");
        let b = Alert::content_hash_for("fda-recalls", "  listeria recall ");
        assert_eq!(a, b);
    }
}
