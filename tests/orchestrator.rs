// tests/orchestrator.rs
//
// End-to-end batch runs against a scripted transport and the in-memory
// store: per-source isolation, polling eligibility, breaker behavior,
// rate limiting, staleness reporting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regwatch::enrich::DisabledClassifier;
use regwatch::error::FetchError;
use regwatch::net::{RetryPolicy, Transport, TransportResponse};
use regwatch::sources::{Quota, QuotaWindow, Source, SourceKind};
use regwatch::store::{AlertStore, MemoryStore, RunState};
use regwatch::{BatchOptions, Pipeline, PipelineConfig, Severity, SourceStatus};

/// Serves canned bodies per URL and counts calls.
struct MapTransport {
    responses: Mutex<HashMap<String, Result<TransportResponse, FetchError>>>,
    calls: AtomicUsize,
}

impl MapTransport {
    fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn ok(self, url: &str, body: &str, content_type: &str) -> Self {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Ok(TransportResponse {
                status: 200,
                body: body.to_string(),
                content_type: Some(content_type.to_string()),
                retry_after: None,
            }),
        );
        self
    }

    fn err(self, url: &str, e: FetchError) -> Self {
        self.responses.lock().unwrap().insert(url.to_string(), Err(e));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MapTransport {
    async fn get(&self, url: &str, _timeout: StdDuration) -> Result<TransportResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(url) {
            Some(Ok(r)) => Ok(r.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(TransportResponse {
                status: 404,
                body: String::new(),
                content_type: None,
                retry_after: None,
            }),
        }
    }
}

fn rss_source(id: &str, url: &str) -> Source {
    Source {
        id: id.into(),
        name: format!("{id} feed"),
        agency: "FDA".into(),
        region: "US".into(),
        kind: SourceKind::Rss,
        url: url.into(),
        backup_url: None,
        poll_interval_minutes: 60,
        priority_weight: 9,
        urgency_keywords: vec!["recall".into(), "listeria".into()],
        quota: None,
        selectors: None,
        api_fields: None,
        active: true,
    }
}

fn rss_body(titles: &[&str]) -> String {
    let items: String = titles
        .iter()
        .map(|t| {
            format!(
                "<item><title>{t}</title><link>https://upstream.test/{}</link>\
                 <pubDate>Tue, 04 Aug 2026 14:00:00 GMT</pubDate></item>",
                t.len()
            )
        })
        .collect();
    format!("<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>{items}</channel></rss>")
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(5),
            jitter_factor: 0.0,
            request_timeout: StdDuration::from_secs(1),
        },
        ..PipelineConfig::default()
    }
}

fn pipeline(store: Arc<MemoryStore>, transport: Arc<MapTransport>) -> Pipeline {
    Pipeline::new(
        store,
        transport,
        Arc::new(DisabledClassifier),
        fast_config(),
    )
}

#[tokio::test]
async fn one_failing_source_does_not_abort_the_batch() {
    let good_body = rss_body(&["Brand X Cheese Recall Over Listeria Concerns"]);
    let transport = Arc::new(
        MapTransport::new()
            .ok("https://a.test/feed", &good_body, "application/rss+xml")
            .err(
                "https://b.test/feed",
                FetchError::UpstreamHttp {
                    status: 503,
                    message: "unavailable".into(),
                },
            )
            .ok(
                "https://c.test/feed",
                &rss_body(&["Sunrise Granola Bars Recalled For Undeclared Peanuts"]),
                "application/rss+xml",
            ),
    );
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), transport);

    let sources = vec![
        rss_source("alpha", "https://a.test/feed"),
        rss_source("bravo", "https://b.test/feed"),
        rss_source("charlie", "https://c.test/feed"),
    ];

    let report = p.run_batch(&sources, &BatchOptions::default()).await;

    assert_eq!(report.total_inserted, 2);
    assert_eq!(report.total_failed, 1);
    assert_eq!(report.sources["alpha"].status, SourceStatus::Completed);
    assert!(matches!(
        report.sources["bravo"].status,
        SourceStatus::Failed { ref kind, .. } if kind == "upstream_http"
    ));
    assert_eq!(report.sources["charlie"].status, SourceStatus::Completed);

    // The failing source's run state records the error for health checks.
    let rs = store.run_state("bravo").await.unwrap();
    assert!(rs.last_error.as_deref().unwrap_or("").contains("503"));
    assert!(rs.last_successful_fetch.is_none());

    // Exhausted 5xx failures land in the structured log as critical.
    let log = store.log_entries();
    assert!(log
        .iter()
        .any(|e| e.kind == "upstream_http" && e.severity == Severity::Critical));
    assert!(log.iter().any(|e| e.severity == Severity::Info));
}

#[tokio::test]
async fn polling_interval_gates_reruns_and_force_refresh_overrides() {
    let body = rss_body(&["Brand X Cheese Recall Over Listeria Concerns"]);
    let transport =
        Arc::new(MapTransport::new().ok("https://a.test/feed", &body, "application/rss+xml"));
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), transport);
    let sources = vec![rss_source("alpha", "https://a.test/feed")];

    let first = p.run_batch(&sources, &BatchOptions::default()).await;
    assert_eq!(first.total_inserted, 1);

    // Within the polling interval: skipped, nothing fetched.
    let second = p.run_batch(&sources, &BatchOptions::default()).await;
    assert!(matches!(
        second.sources["alpha"].status,
        SourceStatus::Skipped { ref reason } if reason == "not_due"
    ));

    // Forced: runs again, and the dedup window swallows the repeat items.
    let third = p
        .run_batch(
            &sources,
            &BatchOptions {
                force_refresh: true,
                ..BatchOptions::default()
            },
        )
        .await;
    assert_eq!(third.sources["alpha"].status, SourceStatus::Completed);
    assert_eq!(third.total_inserted, 0);
    assert_eq!(third.total_duplicates, 1);
    assert_eq!(store.alerts().len(), 1, "dedup idempotence end to end");
}

#[tokio::test]
async fn five_failures_open_the_breaker_and_the_sixth_run_does_no_io() {
    let transport = Arc::new(
        MapTransport::new().err("https://a.test/feed", FetchError::network("timed out")),
    );
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), transport.clone());
    let sources = vec![rss_source("alpha", "https://a.test/feed")];
    let force = BatchOptions {
        force_refresh: true,
        ..BatchOptions::default()
    };

    for _ in 0..5 {
        let r = p.run_batch(&sources, &force).await;
        assert!(matches!(
            r.sources["alpha"].status,
            SourceStatus::Failed { ref kind, .. } if kind == "network"
        ));
    }
    assert_eq!(transport.calls(), 5);

    let sixth = p.run_batch(&sources, &force).await;
    assert!(matches!(
        sixth.sources["alpha"].status,
        SourceStatus::Failed { ref kind, .. } if kind == "circuit_open"
    ));
    assert_eq!(transport.calls(), 5, "open circuit must not touch the network");
}

#[tokio::test]
async fn quota_exhaustion_skips_the_cycle() {
    let body = rss_body(&["Brand X Cheese Recall Over Listeria Concerns"]);
    let transport =
        Arc::new(MapTransport::new().ok("https://a.test/feed", &body, "application/rss+xml"));
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), transport.clone());

    let mut src = rss_source("alpha", "https://a.test/feed");
    src.quota = Some(Quota {
        limit: 1,
        window: QuotaWindow::RollingHour,
        authenticated_limit: None,
    });
    let sources = vec![src];
    let force = BatchOptions {
        force_refresh: true,
        ..BatchOptions::default()
    };

    let first = p.run_batch(&sources, &force).await;
    assert_eq!(first.sources["alpha"].status, SourceStatus::Completed);

    let second = p.run_batch(&sources, &force).await;
    assert!(matches!(
        second.sources["alpha"].status,
        SourceStatus::Skipped { ref reason } if reason == "rate_limited"
    ));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn stale_empty_feed_reports_no_results() {
    let empty = "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel></channel></rss>";
    let transport =
        Arc::new(MapTransport::new().ok("https://a.test/feed", empty, "application/rss+xml"));
    let store = Arc::new(MemoryStore::new());

    // The source last produced data a month ago.
    store
        .set_run_state(
            "alpha",
            RunState {
                last_successful_fetch: Some(Utc::now() - Duration::days(30)),
                ..RunState::default()
            },
        )
        .await
        .unwrap();

    let p = pipeline(store.clone(), transport);
    let sources = vec![rss_source("alpha", "https://a.test/feed")];
    let report = p.run_batch(&sources, &BatchOptions::default()).await;

    assert!(matches!(
        report.sources["alpha"].status,
        SourceStatus::Failed { ref kind, .. } if kind == "no_results"
    ));
    let log = store.log_entries();
    assert!(log
        .iter()
        .any(|e| e.kind == "no_results" && e.severity == Severity::Critical));
}

#[tokio::test]
async fn fresh_empty_feed_is_a_successful_zero_item_run() {
    let empty = "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel></channel></rss>";
    let transport =
        Arc::new(MapTransport::new().ok("https://a.test/feed", empty, "application/rss+xml"));
    let store = Arc::new(MemoryStore::new());
    store
        .set_run_state(
            "alpha",
            RunState {
                last_successful_fetch: Some(Utc::now() - Duration::days(2)),
                ..RunState::default()
            },
        )
        .await
        .unwrap();

    let p = pipeline(store.clone(), transport);
    let sources = vec![rss_source("alpha", "https://a.test/feed")];
    let report = p.run_batch(&sources, &BatchOptions::default()).await;

    assert_eq!(report.sources["alpha"].status, SourceStatus::Completed);
    assert_eq!(report.total_items, 0);
}

#[tokio::test]
async fn region_and_agency_filters_limit_the_batch() {
    let body = rss_body(&["Brand X Cheese Recall Over Listeria Concerns"]);
    let transport = Arc::new(
        MapTransport::new()
            .ok("https://us.test/feed", &body, "application/rss+xml")
            .ok("https://eu.test/feed", &body, "application/rss+xml"),
    );
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), transport);

    let mut eu = rss_source("eu-feed", "https://eu.test/feed");
    eu.region = "EU".into();
    let sources = vec![rss_source("us-feed", "https://us.test/feed"), eu];

    let report = p
        .run_batch(
            &sources,
            &BatchOptions {
                region: Some("EU".into()),
                ..BatchOptions::default()
            },
        )
        .await;

    assert!(report.sources.contains_key("eu-feed"));
    assert!(
        !report.sources.contains_key("us-feed"),
        "filtered-out sources do not appear in the report"
    );
}

#[tokio::test]
async fn expired_batch_deadline_skips_unstarted_sources() {
    let transport = Arc::new(MapTransport::new());
    let store = Arc::new(MemoryStore::new());
    let p = Pipeline::new(
        store.clone(),
        transport.clone(),
        Arc::new(DisabledClassifier),
        PipelineConfig {
            batch_deadline: Some(StdDuration::ZERO),
            ..fast_config()
        },
    );

    let sources = vec![
        rss_source("alpha", "https://a.test/feed"),
        rss_source("bravo", "https://b.test/feed"),
    ];
    let report = p.run_batch(&sources, &BatchOptions::default()).await;

    assert!(report.deadline_hit);
    assert_eq!(report.total_skipped, 2);
    assert_eq!(transport.calls(), 0);
    for r in report.sources.values() {
        assert!(matches!(
            r.status,
            SourceStatus::Skipped { ref reason } if reason == "deadline"
        ));
    }
}

#[tokio::test]
async fn inactive_sources_are_never_polled() {
    let transport = Arc::new(MapTransport::new());
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store.clone(), transport.clone());

    let mut src = rss_source("alpha", "https://a.test/feed");
    src.active = false;
    let report = p.run_batch(&[src], &BatchOptions::default()).await;

    assert!(report.sources.is_empty());
    assert_eq!(transport.calls(), 0);
}
