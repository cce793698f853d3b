// src/ingest/providers/mod.rs

//! Format-specific adapters turning raw response bodies into [`RawItem`]s.

pub mod api;
pub mod html;
pub mod rss;

use crate::ingest::types::SourceAdapter;
use crate::sources::SourceKind;

/// Items with shorter titles are navigation fragments or placeholders,
/// not announcements.
pub(crate) const MIN_TITLE_LEN: usize = 8;

pub(crate) fn accept_title(title: &str) -> bool {
    title.trim().chars().count() >= MIN_TITLE_LEN
}

static RSS: rss::RssAdapter = rss::RssAdapter;
static API: api::ApiAdapter = api::ApiAdapter;
static HTML: html::HtmlAdapter = html::HtmlAdapter;

/// Adapter for a source kind. Adapters are stateless; all per-source
/// detail arrives through the `Source` passed to `parse`.
pub fn adapter_for(kind: SourceKind) -> &'static dyn SourceAdapter {
    match kind {
        SourceKind::Rss => &RSS,
        SourceKind::Api => &API,
        SourceKind::Scraper => &HTML,
    }
}
