// src/ingest/urgency.rs

//! Deterministic urgency scoring.
//!
//! Score = source priority weight
//!       + 2 per matched per-source urgency keyword (title + summary)
//!       + recency bonus (+3 within 24h, +1 within 72h)
//!       + agency-specific boosts (classification hints, signal phrases)
//!
//! Tier bands, identical across source families and monotonic in the
//! score: >= 18 Critical, >= 14 High, >= 9 Medium, else Low.
//!
//! The optional AI-assisted path (see [`crate::enrich`]) may override the
//! tier; any AI failure falls back to this scorer.

use chrono::{DateTime, Duration, Utc};

use crate::sources::Source;
use crate::store::Urgency;

pub const CRITICAL_THRESHOLD: i32 = 18;
pub const HIGH_THRESHOLD: i32 = 14;
pub const MEDIUM_THRESHOLD: i32 = 9;

const KEYWORD_POINTS: i32 = 2;

/// Phrases that raise urgency beyond the per-source keyword list, keyed by
/// agency. Classification hints ("Class I") are the strongest signal the
/// feeds carry.
const AGENCY_BOOSTS: &[(&str, &[(&str, i32)])] = &[
    ("FDA", &[("do not eat", 3)]),
    ("USDA", &[("public health alert", 3), ("do not consume", 3)]),
    ("CDC", &[("multistate outbreak", 3), ("hospitalized", 2)]),
    ("CPSC", &[("death", 4), ("serious injury", 3)]),
    ("NHTSA", &[("do not drive", 4), ("crash risk", 2)]),
];

/// Recall classification carried by FDA/FSIS payloads. Matched exactly so
/// "Class I" never fires on a "Class II" record.
fn classification_boost(classification: Option<&str>) -> i32 {
    match classification.map(|c| c.trim().to_lowercase()) {
        Some(c) if c == "class i" => 4,
        Some(c) if c == "class ii" => 2,
        _ => 0,
    }
}

/// Matched keyword count, case-insensitive substring containment.
pub fn keyword_matches(keywords: &[String], text: &str) -> u32 {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty() && lower.contains(&k.to_lowercase()))
        .count() as u32
}

/// +3 for items published within 24h, +1 within 72h, else 0.
pub fn recency_bonus(published: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    let age = now - published;
    if age <= Duration::hours(24) {
        3
    } else if age <= Duration::hours(72) {
        1
    } else {
        0
    }
}

fn agency_boost(agency: &str, text: &str) -> i32 {
    let haystack = text.to_lowercase();

    AGENCY_BOOSTS
        .iter()
        .find(|(a, _)| agency.eq_ignore_ascii_case(a))
        .map(|(_, boosts)| {
            boosts
                .iter()
                .filter(|(phrase, _)| haystack.contains(phrase))
                .map(|(_, pts)| *pts)
                .sum::<i32>()
        })
        .unwrap_or(0)
}

/// Deterministic score for one item.
pub fn score(
    source: &Source,
    agency: &str,
    title: &str,
    summary: &str,
    classification: Option<&str>,
    published: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i32 {
    let text = format!("{title} {summary}");
    let mut total = source.priority_weight;
    total += KEYWORD_POINTS * keyword_matches(&source.urgency_keywords, &text) as i32;
    total += recency_bonus(published, now);
    total += agency_boost(agency, &text);
    total += classification_boost(classification);
    total
}

/// Band mapping; monotonic by construction.
pub fn tier_for(score: i32) -> Urgency {
    if score >= CRITICAL_THRESHOLD {
        Urgency::Critical
    } else if score >= HIGH_THRESHOLD {
        Urgency::High
    } else if score >= MEDIUM_THRESHOLD {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

/// Tier for a model-generated 1-10 urgency score from the enrichment path.
pub fn tier_from_model_score(model_score: u8) -> Urgency {
    match model_score {
        9.. => Urgency::Critical,
        7..=8 => Urgency::High,
        4..=6 => Urgency::Medium,
        _ => Urgency::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::seed_catalog;

    fn fda() -> Source {
        seed_catalog()
            .into_iter()
            .find(|s| s.id == "fda-recalls")
            .unwrap()
    }

    #[test]
    fn listeria_recall_two_hours_old_lands_high_or_above() {
        let src = fda();
        let now = Utc::now();
        let s = score(
            &src,
            "FDA",
            "Listeria Recall - Brand X Cheese",
            "Brand X cheese recalled due to possible Listeria contamination.",
            None,
            now - Duration::hours(2),
            now,
        );
        // weight 9 + keywords (recall, listeria, contamination) + recency 3
        assert!(s >= HIGH_THRESHOLD, "score {s} should clear the High band");
        assert!(matches!(tier_for(s), Urgency::High | Urgency::Critical));
    }

    #[test]
    fn extra_keyword_never_decreases_score() {
        let src = fda();
        let now = Utc::now();
        let base = score(
            &src,
            "FDA",
            "Cheese product recall announced",
            "",
            None,
            now,
            now,
        );
        let more = score(
            &src,
            "FDA",
            "Cheese product recall announced, salmonella contamination found",
            "",
            None,
            now,
            now,
        );
        assert!(more >= base);
    }

    #[test]
    fn recency_bonus_bands() {
        let now = Utc::now();
        assert_eq!(recency_bonus(now - Duration::hours(2), now), 3);
        assert_eq!(recency_bonus(now - Duration::hours(48), now), 1);
        assert_eq!(recency_bonus(now - Duration::days(10), now), 0);
    }

    #[test]
    fn class_i_classification_boosts_fda_items() {
        let src = fda();
        let now = Utc::now();
        let without = score(&src, "FDA", "Soft cheese wheel recall", "", None, now, now);
        let with = score(
            &src,
            "FDA",
            "Soft cheese wheel recall",
            "",
            Some("Class I"),
            now,
            now,
        );
        assert_eq!(with, without + 4);
    }

    #[test]
    fn tier_bands_are_monotonic() {
        let mut prev = tier_for(-5);
        for s in -5..40 {
            let t = tier_for(s);
            assert!(t >= prev, "tier must not decrease as score rises");
            prev = t;
        }
        assert_eq!(tier_for(MEDIUM_THRESHOLD), Urgency::Medium);
        assert_eq!(tier_for(HIGH_THRESHOLD), Urgency::High);
        assert_eq!(tier_for(CRITICAL_THRESHOLD), Urgency::Critical);
    }

    #[test]
    fn model_score_mapping() {
        assert_eq!(tier_from_model_score(10), Urgency::Critical);
        assert_eq!(tier_from_model_score(8), Urgency::High);
        assert_eq!(tier_from_model_score(5), Urgency::Medium);
        assert_eq!(tier_from_model_score(1), Urgency::Low);
    }
}
