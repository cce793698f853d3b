//! Regwatch — Batch Runner Entrypoint
//! Loads the source catalog, runs one ingestion batch against the
//! in-memory store, and logs the per-source report.
//!
//! The production scheduler/trigger layer lives outside this crate; this
//! binary exists for local runs and smoke checks.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use regwatch::enrich;
use regwatch::net::HttpTransport;
use regwatch::sources;
use regwatch::{BatchOptions, MemoryStore, Pipeline, PipelineConfig, SourceStatus};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("regwatch=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op elsewhere.
    let _ = dotenvy::dotenv();
    init_tracing();

    let catalog = sources::load_catalog_default()?;
    tracing::info!(sources = catalog.len(), "source catalog loaded");

    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(HttpTransport::new("regwatch/0.1")?);
    let classifier = enrich::build_classifier(&enrich::load_enrich_config());
    let pipeline = Pipeline::new(
        store.clone(),
        transport,
        classifier,
        PipelineConfig::default(),
    );

    let opts = BatchOptions {
        region: std::env::var("REGWATCH_REGION").ok(),
        agency: std::env::var("REGWATCH_AGENCY").ok(),
        force_refresh: std::env::var("REGWATCH_FORCE")
            .map(|v| v == "1")
            .unwrap_or(false),
    };

    let report = pipeline.run_batch(&catalog, &opts).await;

    let mut rows: Vec<_> = report.sources.values().collect();
    rows.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    for row in rows {
        match &row.status {
            SourceStatus::Completed => tracing::info!(
                source = %row.source_id,
                items = row.items,
                inserted = row.inserted,
                duplicates = row.duplicates,
                health = ?row.health,
                "completed"
            ),
            SourceStatus::Skipped { reason } => {
                tracing::info!(source = %row.source_id, reason = %reason, "skipped")
            }
            SourceStatus::Failed { kind, message } => {
                tracing::warn!(source = %row.source_id, kind = %kind, message = %message, "failed")
            }
        }
    }
    tracing::info!(
        inserted = report.total_inserted,
        duplicates = report.total_duplicates,
        failed = report.total_failed,
        skipped = report.total_skipped,
        "batch report"
    );
    Ok(())
}
