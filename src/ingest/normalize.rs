// src/ingest/normalize.rs

//! Raw item → canonical alert shape: text cleanup, date resolution,
//! agency re-attribution, summary truncation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::RawItem;
use crate::sources::Source;
use crate::store::{Alert, Urgency};

/// Character budget for alert summaries.
pub const SUMMARY_BUDGET: usize = 500;
const ELLIPSIS: &str = "...";

/// Normalize text: decode HTML entities, strip tags, normalize typographic
/// quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Truncate to the summary budget on a char boundary, marking the cut.
pub fn truncate_summary(s: &str) -> String {
    if s.chars().count() <= SUMMARY_BUDGET {
        return s.to_string();
    }
    let cut: String = s.chars().take(SUMMARY_BUDGET - ELLIPSIS.len()).collect();
    format!("{}{ELLIPSIS}", cut.trim_end())
}

/// Parse a published date in any of the formats the sources actually emit.
/// Returns `(timestamp, parsed)`; unparseable input falls back to `now` —
/// an item is never rejected for a bad date.
pub fn parse_published(raw: Option<&str>, now: DateTime<Utc>) -> (DateTime<Utc>, bool) {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return (now, false);
    };

    // RFC2822 (RSS pubDate) and RFC3339 (Atom, APIs) cover most feeds.
    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc2822) {
        if let Some(ts) = Utc.timestamp_opt(dt.unix_timestamp(), 0).single() {
            return (ts, true);
        }
    }
    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc3339) {
        if let Some(ts) = Utc.timestamp_opt(dt.unix_timestamp(), 0).single() {
            return (ts, true);
        }
    }

    // Date-only and API-specific shapes.
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d", "%B %d, %Y", "%b %d, %Y"];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return (Utc.from_utc_datetime(&dt), true);
            }
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return (Utc.from_utc_datetime(&dt), true);
    }

    (now, false)
}

/// Attribution after applying republication heuristics.
struct Attribution {
    agency: String,
    source: String,
    provenance: Option<String>,
}

/// CDC feeds frequently republish FDA and USDA/FSIS recalls. When the text
/// carries the originating agency's cues, attribute the alert to that
/// agency and keep the CDC feed name as provenance. Keyword sniffing is
/// heuristic and occasionally misclassifies; treat the result as noisy.
fn reattribute(source: &Source, text: &str) -> Attribution {
    let direct = Attribution {
        agency: source.agency.clone(),
        source: source.name.clone(),
        provenance: None,
    };
    if !source.agency.eq_ignore_ascii_case("CDC") {
        return direct;
    }

    let lower = text.to_lowercase();
    let mentions_recall = lower.contains("recall") || lower.contains("outbreak");
    if !mentions_recall {
        return direct;
    }

    if lower.contains("fsis")
        || lower.contains("usda")
        || lower.contains("food safety and inspection service")
    {
        return Attribution {
            agency: "USDA".into(),
            source: "USDA".into(),
            provenance: Some(source.name.clone()),
        };
    }
    if lower.contains("fda") || lower.contains("food and drug administration") {
        return Attribution {
            agency: "FDA".into(),
            source: "FDA".into(),
            provenance: Some(source.name.clone()),
        };
    }
    direct
}

/// Canonicalized item, one step short of an [`Alert`] (urgency is decided
/// by the classifier afterwards).
#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub title: String,
    pub summary: String,
    pub agency: String,
    pub source: String,
    pub provenance: Option<String>,
    pub region: String,
    pub published: DateTime<Utc>,
    pub date_parsed: bool,
    pub link: Option<String>,
    pub external_id: Option<String>,
    pub full_content: String,
}

impl NormalizedItem {
    pub fn into_alert(self, urgency: Urgency) -> Alert {
        let content_hash = Alert::content_hash_for(&self.source, &self.title);
        Alert {
            title: self.title,
            source: self.source,
            agency: self.agency,
            region: self.region,
            urgency,
            summary: self.summary,
            published_date: self.published,
            external_url: self.link,
            full_content: self.full_content,
            external_id: self.external_id,
            content_hash,
            provenance: self.provenance,
        }
    }
}

/// Map one raw item into the canonical shape.
pub fn normalize_item(source: &Source, raw: &RawItem, now: DateTime<Utc>) -> NormalizedItem {
    let title = normalize_text(&raw.title);
    let description = normalize_text(&raw.description);

    // Title stands in for an empty description.
    let summary = if description.is_empty() {
        truncate_summary(&title)
    } else {
        truncate_summary(&description)
    };

    let (published, date_parsed) = parse_published(raw.published_raw.as_deref(), now);
    let attribution = reattribute(source, &format!("{title} {description}"));
    let full_content = serde_json::to_string(raw).unwrap_or_else(|_| "{}".to_string());

    NormalizedItem {
        title,
        summary,
        agency: attribution.agency,
        source: attribution.source,
        provenance: attribution.provenance,
        region: source.region.clone(),
        published,
        date_parsed,
        link: raw.link.clone(),
        external_id: raw.external_id.clone(),
        full_content,
    }
}
