// src/ingest/mod.rs

//! Source orchestrator: drives fetch → parse → normalize → classify →
//! dedup → persist for every configured source, independently per source.
//!
//! One batch run is a callable unit: the external scheduler (out of scope
//! here) calls [`Pipeline::run_batch`] and receives a per-source result
//! map plus aggregate totals. A failure in one source never aborts the
//! others; the only environmental failure mode is the store itself being
//! unreachable, which is reported per source, not raised.

pub mod dedup;
pub mod normalize;
pub mod providers;
pub mod types;
pub mod urgency;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::enrich::{self, DynClassifier};
use crate::error::{FetchError, Severity};
use crate::net::fetch::ExpectedFormat;
use crate::net::{CircuitRegistry, Fetcher, RateLimiter, RetryPolicy, Transport};
use crate::sources::{Source, SourceKind};
use crate::store::{AlertStore, ErrorLogEntry, RunState, RunStatus, SourceHealth, UpsertOutcome};

/// One-time metrics registration (so series show up on any recorder).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Raw items parsed from sources.");
        describe_counter!(
            "ingest_alerts_inserted_total",
            "Alerts persisted after dedup."
        );
        describe_counter!("ingest_dedup_total", "Items dropped by the dedup window.");
        describe_counter!("ingest_source_errors_total", "Terminal per-source failures.");
        describe_counter!(
            "ingest_fetch_retries_total",
            "Fetch attempts that were retried."
        );
        describe_histogram!("ingest_parse_ms", "Per-source parse time in milliseconds.");
        describe_gauge!(
            "ingest_batch_last_run_ts",
            "Unix ts when the last batch run finished."
        );
    });
}

/// Pipeline tuning. One value per deployment, injected into the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded worker pool size for concurrent sources.
    pub concurrency: usize,
    /// Trailing dedup window.
    pub dedup_window: Duration,
    /// An empty result set is an error only past this staleness.
    pub staleness_window: Duration,
    /// Per-call budget for the optional enrichment step.
    pub enrich_timeout: StdDuration,
    /// Hard batch deadline; unstarted sources are skipped once it passes.
    pub batch_deadline: Option<StdDuration>,
    /// Deliberate pause before each source's fetch, to be gentle on
    /// shared upstream infrastructure.
    pub pause_between_sources: Option<StdDuration>,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            dedup_window: Duration::days(dedup::DEDUP_WINDOW_DAYS),
            staleness_window: Duration::days(14),
            enrich_timeout: StdDuration::from_secs(10),
            batch_deadline: None,
            pause_between_sources: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Filters accepted by the batch trigger interface.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub region: Option<String>,
    pub agency: Option<String>,
    /// Run every matching source regardless of its polling interval.
    pub force_refresh: bool,
}

/// Terminal state of one source within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Completed,
    Skipped { reason: String },
    Failed { kind: String, message: String },
}

/// Per-source result row.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub status: SourceStatus,
    pub items: usize,
    pub inserted: usize,
    pub updated: usize,
    pub duplicates: usize,
    pub health: SourceHealth,
}

impl SourceReport {
    fn skipped(source_id: &str, reason: &str, health: SourceHealth) -> Self {
        Self {
            source_id: source_id.to_string(),
            status: SourceStatus::Skipped {
                reason: reason.to_string(),
            },
            items: 0,
            inserted: 0,
            updated: 0,
            duplicates: 0,
            health,
        }
    }
}

/// Aggregate outcome of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub sources: HashMap<String, SourceReport>,
    pub total_items: usize,
    pub total_inserted: usize,
    pub total_updated: usize,
    pub total_duplicates: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
    pub deadline_hit: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The ingestion pipeline. Breaker and limiter registries are owned here
/// (dependency injection) so each batch run in tests gets fresh state.
pub struct Pipeline {
    store: Arc<dyn AlertStore>,
    fetcher: Fetcher,
    classifier: DynClassifier,
    breakers: CircuitRegistry,
    limiter: RateLimiter,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn AlertStore>,
        transport: Arc<dyn Transport>,
        classifier: DynClassifier,
        config: PipelineConfig,
    ) -> Self {
        let fetcher = Fetcher::new(transport, config.retry.clone());
        Self {
            store,
            fetcher,
            classifier,
            breakers: CircuitRegistry::default(),
            limiter: RateLimiter::new(),
            config,
        }
    }

    /// Run one batch over the catalog. Sources are processed in priority
    /// order through a bounded worker pool; partial completion under the
    /// batch deadline is a normal terminal state.
    pub async fn run_batch(&self, sources: &[Source], opts: &BatchOptions) -> BatchReport {
        ensure_metrics_described();
        let started_at = Utc::now();
        let deadline = self
            .config
            .batch_deadline
            .map(|d| tokio::time::Instant::now() + d);

        let mut eligible: Vec<&Source> = sources
            .iter()
            .filter(|s| s.active)
            .filter(|s| s.matches(opts.region.as_deref(), opts.agency.as_deref()))
            .collect();
        eligible.sort_by_key(|s| std::cmp::Reverse(s.priority_weight));

        let reports: Vec<SourceReport> = stream::iter(eligible.into_iter().map(|source| {
            let opts = opts.clone();
            async move {
                if let Some(d) = deadline {
                    if tokio::time::Instant::now() >= d {
                        tracing::warn!(source = %source.id, "batch deadline passed, skipping");
                        return SourceReport::skipped(&source.id, "deadline", SourceHealth::Unknown);
                    }
                }
                self.process_source(source, &opts).await
            }
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;

        let mut map = HashMap::with_capacity(reports.len());
        let mut report = BatchReport {
            sources: HashMap::new(),
            total_items: 0,
            total_inserted: 0,
            total_updated: 0,
            total_duplicates: 0,
            total_failed: 0,
            total_skipped: 0,
            deadline_hit: false,
            started_at,
            finished_at: started_at,
        };
        for r in reports {
            report.total_items += r.items;
            report.total_inserted += r.inserted;
            report.total_updated += r.updated;
            report.total_duplicates += r.duplicates;
            match &r.status {
                SourceStatus::Failed { .. } => report.total_failed += 1,
                SourceStatus::Skipped { reason } => {
                    report.total_skipped += 1;
                    if reason == "deadline" {
                        report.deadline_hit = true;
                    }
                }
                SourceStatus::Completed => {}
            }
            map.insert(r.source_id.clone(), r);
        }
        report.sources = map;
        report.finished_at = Utc::now();

        gauge!("ingest_batch_last_run_ts").set(report.finished_at.timestamp() as f64);
        tracing::info!(
            target: "ingest",
            inserted = report.total_inserted,
            duplicates = report.total_duplicates,
            failed = report.total_failed,
            skipped = report.total_skipped,
            "batch finished"
        );
        report
    }

    async fn process_source(&self, source: &Source, opts: &BatchOptions) -> SourceReport {
        let now = Utc::now();

        let mut run_state = match self.store.run_state(&source.id).await {
            Ok(rs) => rs,
            Err(e) => {
                // Store unreachable: report, never crash the batch.
                tracing::error!(source = %source.id, error = %e, "cannot read run state");
                return SourceReport {
                    source_id: source.id.clone(),
                    status: SourceStatus::Failed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    },
                    items: 0,
                    inserted: 0,
                    updated: 0,
                    duplicates: 0,
                    health: SourceHealth::Unknown,
                };
            }
        };

        if !opts.force_refresh {
            if let Some(next) = run_state.next_run {
                if now < next {
                    return SourceReport::skipped(&source.id, "not_due", run_state.health(now));
                }
            }
        }

        if let Some(quota) = &source.quota {
            if let Err(e) = self.limiter.check(&source.id, quota, source.has_api_key(), now) {
                tracing::info!(source = %source.id, error = %e, "quota exhausted, skipping cycle");
                self.log_event(source, &e, false, 0).await;
                return SourceReport::skipped(&source.id, "rate_limited", run_state.health(now));
            }
        }

        if let Some(pause) = self.config.pause_between_sources {
            tokio::time::sleep(pause).await;
        }

        let expect = match source.kind {
            SourceKind::Rss => ExpectedFormat::Xml,
            SourceKind::Api => ExpectedFormat::Json,
            SourceKind::Scraper => ExpectedFormat::Html,
        };

        let breaker = self.breakers.breaker(&source.id);
        let fetch_result = breaker
            .execute(|| async move {
                let result = self
                    .fetcher
                    .fetch_with_fallback(&source.url, source.backup_url.as_deref(), expect)
                    .await;
                // The window advances on every attempted call, pass or fail.
                if source.quota.is_some() {
                    self.limiter.record(&source.id, Utc::now());
                }
                result
            })
            .await;

        let body = match fetch_result {
            Ok(body) => body,
            Err(e) => return self.fail_source(source, run_state, e, now).await,
        };

        let t0 = std::time::Instant::now();
        let parsed = providers::adapter_for(source.kind).parse(source, &body);
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let items = match parsed {
            Ok(items) => items,
            Err(e) => return self.fail_source(source, run_state, e, now).await,
        };
        counter!("ingest_items_total").increment(items.len() as u64);

        if items.is_empty() {
            let stale_days = run_state
                .last_successful_fetch
                .map(|t| (now - t).num_days())
                .unwrap_or(i64::MAX);
            if stale_days > self.config.staleness_window.num_days() {
                let e = FetchError::NoResults {
                    source_id: source.id.clone(),
                    days_stale: stale_days.min(9_999),
                };
                return self.fail_source(source, run_state, e, now).await;
            }
        }

        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut duplicates = 0usize;
        let item_count = items.len();

        for raw in &items {
            let mut normalized = normalize::normalize_item(source, raw, now);

            let det_score = urgency::score(
                source,
                &normalized.agency,
                &normalized.title,
                &normalized.summary,
                raw.classification(),
                normalized.published,
                now,
            );
            let mut tier = urgency::tier_for(det_score);

            // Best-effort enrichment; every failure mode falls back to the
            // deterministic tier above.
            if self.classifier.provider_name() != "disabled" {
                match enrich::classify_with_timeout(
                    self.classifier.as_ref(),
                    &normalized.title,
                    &normalized.summary,
                    self.config.enrich_timeout,
                )
                .await
                {
                    Some(c) => {
                        tier = urgency::tier_from_model_score(c.urgency_score);
                        if !c.summary.is_empty() {
                            normalized.summary = c.summary;
                        }
                    }
                    None => {
                        tracing::warn!(
                            source = %source.id,
                            provider = self.classifier.provider_name(),
                            "enrichment unavailable, using deterministic score"
                        );
                    }
                }
            }

            // External ids resolve through upsert; everything else goes
            // through the title-similarity window.
            if normalized.external_id.is_none() {
                match dedup::is_duplicate(
                    self.store.as_ref(),
                    &normalized.source,
                    &normalized.title,
                    now,
                    self.config.dedup_window,
                )
                .await
                {
                    Ok(true) => {
                        duplicates += 1;
                        counter!("ingest_dedup_total").increment(1);
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => return self.fail_source(source, run_state, e, now).await,
                }
            }

            match self.store.upsert_alert(normalized.into_alert(tier)).await {
                Ok(UpsertOutcome::Inserted) => {
                    inserted += 1;
                    counter!("ingest_alerts_inserted_total").increment(1);
                }
                Ok(UpsertOutcome::Updated) => updated += 1,
                Ok(UpsertOutcome::Skipped) => duplicates += 1,
                Err(e) => return self.fail_source(source, run_state, e, now).await,
            }
        }

        run_state.last_run = Some(now);
        run_state.next_run = Some(now + source.poll_interval());
        run_state.last_status = Some(RunStatus::Success);
        run_state.last_error = None;
        run_state.last_successful_fetch = Some(now);
        if let Err(e) = self.store.set_run_state(&source.id, run_state.clone()).await {
            tracing::error!(source = %source.id, error = %e, "cannot persist run state");
        }

        let _ = self
            .store
            .append_log(ErrorLogEntry {
                function: "process_source".into(),
                kind: "success".into(),
                message: format!(
                    "{}: {} items, {} inserted, {} duplicates",
                    source.id, item_count, inserted, duplicates
                ),
                context: serde_json::json!({
                    "source": source.id,
                    "endpoint": source.url,
                }),
                severity: Severity::Info,
                timestamp: now,
            })
            .await;

        tracing::info!(
            source = %source.id,
            items = item_count,
            inserted,
            duplicates,
            "source ingested"
        );

        SourceReport {
            source_id: source.id.clone(),
            status: SourceStatus::Completed,
            items: item_count,
            inserted,
            updated,
            duplicates,
            health: run_state.health(now),
        }
    }

    /// Record a terminal per-source failure: run state, structured log,
    /// metrics. The batch carries on with the next source.
    async fn fail_source(
        &self,
        source: &Source,
        mut run_state: RunState,
        err: FetchError,
        now: DateTime<Utc>,
    ) -> SourceReport {
        counter!("ingest_source_errors_total").increment(1);

        run_state.last_run = Some(now);
        run_state.next_run = Some(now + source.poll_interval());
        run_state.last_status = Some(RunStatus::Error);
        run_state.last_error = Some(err.to_string());
        if let Err(e) = self.store.set_run_state(&source.id, run_state.clone()).await {
            tracing::error!(source = %source.id, error = %e, "cannot persist run state");
        }

        self.log_event(source, &err, false, 0).await;
        tracing::error!(source = %source.id, endpoint = %source.url, error = %err, "source failed");

        SourceReport {
            source_id: source.id.clone(),
            status: SourceStatus::Failed {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
            items: 0,
            inserted: 0,
            updated: 0,
            duplicates: 0,
            health: run_state.health(now),
        }
    }

    async fn log_event(&self, source: &Source, err: &FetchError, retry_pending: bool, attempt: u32) {
        let entry = ErrorLogEntry {
            function: "process_source".into(),
            kind: err.kind().into(),
            message: err.to_string(),
            context: serde_json::json!({
                "source": source.id,
                "endpoint": source.url,
                "attempt": attempt,
                "retry_pending": retry_pending,
            }),
            severity: err.severity(retry_pending),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append_log(entry).await {
            tracing::error!(source = %source.id, error = %e, "cannot append log entry");
        }
    }

    /// Manual breaker reset, for operator recovery.
    pub fn reset_breaker(&self, source_id: &str) {
        self.breakers.breaker(source_id).reset();
    }
}
