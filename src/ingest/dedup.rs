// src/ingest/dedup.rs

//! Near-duplicate suppression against the recent persisted window.
//!
//! Sources with a stable external id skip this entirely; their conflicts
//! resolve through the store's `(external_id, source)` upsert.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::store::AlertStore;

/// Canonical trailing window; one value for the whole deployment.
pub const DEDUP_WINDOW_DAYS: i64 = 7;

/// Containment matching only kicks in past this length; short titles
/// ("Recall notice") contain each other too easily.
const CONTAINMENT_MIN_LEN: usize = 20;

/// Jaro-Winkler floor for the near-duplicate check on long titles.
const SIMILARITY_THRESHOLD: f64 = 0.93;

/// Whether two titles describe the same event.
pub fn titles_match(candidate: &str, existing: &str) -> bool {
    let a = candidate.trim().to_lowercase();
    let b = existing.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    if a.chars().count() > CONTAINMENT_MIN_LEN && b.chars().count() > CONTAINMENT_MIN_LEN {
        if a.contains(&b) || b.contains(&a) {
            return true;
        }
        if strsim::jaro_winkler(&a, &b) >= SIMILARITY_THRESHOLD {
            return true;
        }
    }
    false
}

/// Check the candidate title against every alert this source persisted
/// inside the window. The check-then-insert pair is not atomic; a rare
/// duplicate under concurrent runs of the same source is tolerated.
pub async fn is_duplicate(
    store: &dyn AlertStore,
    source: &str,
    title: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<bool> {
    let since = now - window;
    let recent = store.recent_alerts_by_source(source, since).await?;
    Ok(recent.iter().any(|a| titles_match(title, &a.title)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_duplicate_case_insensitive() {
        assert!(titles_match(
            "Brand X Cheese Recall",
            "  brand x cheese recall "
        ));
    }

    #[test]
    fn short_titles_only_match_exactly() {
        assert!(!titles_match("Recall notice", "Recall notice update"));
        assert!(titles_match("Recall notice", "recall notice"));
    }

    #[test]
    fn long_titles_match_on_containment_either_direction() {
        let full = "Brand X Cheese Recalled Due To Listeria Contamination Risk";
        let partial = "Brand X Cheese Recalled Due To Listeria";
        assert!(titles_match(full, partial));
        assert!(titles_match(partial, full));
    }

    #[test]
    fn near_identical_long_titles_match_on_similarity() {
        assert!(titles_match(
            "Brand X Cheese Recalled Due To Listeria Contamination Risks",
            "Brand X Cheese Recalled Due To Listeria Contamination Risk"
        ));
    }

    #[test]
    fn distinct_recalls_do_not_match() {
        assert!(!titles_match(
            "Brand X Cheese Recalled Due To Listeria Contamination",
            "Brand Y Peanut Butter Recalled Due To Salmonella Contamination"
        ));
    }
}
