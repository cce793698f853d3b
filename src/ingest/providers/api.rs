// src/ingest/providers/api.rs

//! JSON REST adapter.
//!
//! Endpoints disagree on everything: some wrap items in a paginated
//! envelope, some return a bare array, some a single object. Field names
//! come from the source's [`ApiFieldMap`], with common fallbacks so a
//! half-configured source still yields items.

use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::ingest::providers::accept_title;
use crate::ingest::types::{RawItem, SourceAdapter};
use crate::sources::{ApiFieldMap, Source};

const WRAPPER_KEYS: &[&str] = &["results", "data", "items", "recalls"];
const TITLE_FALLBACKS: &[&str] = &["title", "Title", "headline", "product_description"];
const LINK_FALLBACKS: &[&str] = &["link", "url", "URL"];
const DESC_FALLBACKS: &[&str] = &["description", "Description", "summary", "reason_for_recall"];
const DATE_FALLBACKS: &[&str] = &["date", "published", "report_date", "recall_date", "RecallDate"];
const ID_FALLBACKS: &[&str] = &["id", "recall_number", "RecallNumber"];

pub struct ApiAdapter;

impl SourceAdapter for ApiAdapter {
    fn parse(&self, source: &Source, body: &str) -> Result<Vec<RawItem>> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| FetchError::parse(&source.id, format!("invalid json: {e}")))?;

        let default_map = ApiFieldMap::default();
        let map = source.api_fields.as_ref().unwrap_or(&default_map);

        let items = extract_items(&value, map)
            .ok_or_else(|| FetchError::parse(&source.id, "no item array in response"))?;

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let Some(obj) = item.as_object() else {
                continue;
            };

            let title = pick_string(obj, &map.title, TITLE_FALLBACKS).unwrap_or_default();
            if !accept_title(&title) {
                continue;
            }

            let mut raw = RawItem {
                title,
                description: pick_string(obj, &map.description, DESC_FALLBACKS)
                    .unwrap_or_default(),
                link: pick_string(obj, &map.link, LINK_FALLBACKS),
                published_raw: pick_string(obj, &map.date, DATE_FALLBACKS),
                external_id: pick_string(obj, &map.external_id, ID_FALLBACKS),
                extra: Default::default(),
            };
            if let Some(cls) = pick_string(obj, &map.classification, &[]) {
                raw.extra.insert("classification".into(), Value::String(cls));
            }
            out.push(raw);
        }
        Ok(out)
    }
}

/// Locate the item array: configured wrapper key, common wrapper keys,
/// bare array, or a single object treated as a one-item list.
fn extract_items<'a>(value: &'a Value, map: &ApiFieldMap) -> Option<Vec<&'a Value>> {
    if let Some(key) = map.items.as_deref() {
        return value.get(key)?.as_array().map(|a| a.iter().collect());
    }
    if let Some(arr) = value.as_array() {
        return Some(arr.iter().collect());
    }
    if let Some(obj) = value.as_object() {
        for key in WRAPPER_KEYS {
            if let Some(arr) = obj.get(*key).and_then(Value::as_array) {
                return Some(arr.iter().collect());
            }
        }
        // A single announcement object.
        return Some(vec![value]);
    }
    None
}

/// First present candidate field, configured names before fallbacks.
/// Numbers are stringified; arrays of strings are joined.
fn pick_string(
    obj: &serde_json::Map<String, Value>,
    configured: &[String],
    fallbacks: &[&str],
) -> Option<String> {
    let candidates = configured
        .iter()
        .map(String::as_str)
        .chain(fallbacks.iter().copied());
    for key in candidates {
        match obj.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            Some(Value::Array(arr)) => {
                let joined = arr
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ");
                if !joined.is_empty() {
                    return Some(joined);
                }
            }
            _ => {}
        }
    }
    None
}
