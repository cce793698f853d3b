// src/ingest/providers/html.rs

//! Targeted HTML extraction for sources without a feed or API.
//!
//! Not a general scraping framework: one repeating card/row selector plus
//! field selectors from the source config, nothing else. Relative links
//! are absolutized against the page URL.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{FetchError, Result};
use crate::ingest::providers::accept_title;
use crate::ingest::types::{RawItem, SourceAdapter};
use crate::sources::Source;

pub struct HtmlAdapter;

impl SourceAdapter for HtmlAdapter {
    fn parse(&self, source: &Source, body: &str) -> Result<Vec<RawItem>> {
        let selectors = source
            .selectors
            .as_ref()
            .ok_or_else(|| FetchError::parse(&source.id, "scraper source without selectors"))?;

        let item_sel = compile(&source.id, &selectors.item)?;
        let title_sel = compile(&source.id, &selectors.title)?;
        let link_sel = selectors
            .link
            .as_deref()
            .map(|s| compile(&source.id, s))
            .transpose()?;
        let desc_sel = selectors
            .description
            .as_deref()
            .map(|s| compile(&source.id, s))
            .transpose()?;
        let date_sel = selectors
            .date
            .as_deref()
            .map(|s| compile(&source.id, s))
            .transpose()?;

        let doc = Html::parse_document(body);
        let base = Url::parse(&source.url).ok();

        let mut out = Vec::new();
        for card in doc.select(&item_sel) {
            let Some(title_el) = card.select(&title_sel).next() else {
                continue;
            };
            let title = text_of(title_el);
            if !accept_title(&title) {
                continue;
            }

            // The link lives on its own selector, or on the title anchor.
            let link_el = link_sel
                .as_ref()
                .and_then(|sel| card.select(sel).next())
                .or(Some(title_el));
            let link = link_el
                .and_then(|el| el.value().attr("href"))
                .map(|href| absolutize(base.as_ref(), href));

            let description = desc_sel
                .as_ref()
                .and_then(|sel| card.select(sel).next())
                .map(text_of)
                .unwrap_or_default();

            let published_raw = date_sel.as_ref().and_then(|sel| {
                card.select(sel).next().map(|el| {
                    // Prefer the machine-readable datetime attribute.
                    el.value()
                        .attr("datetime")
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| text_of(el))
                })
            });

            out.push(RawItem {
                title,
                description,
                link,
                published_raw,
                external_id: None,
                extra: Default::default(),
            });
        }
        Ok(out)
    }
}

fn compile(source_id: &str, css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| FetchError::parse(source_id, format!("bad selector '{css}': {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn absolutize(base: Option<&Url>, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match base.and_then(|b| b.join(href).ok()) {
        Some(abs) => abs.to_string(),
        None => href.to_string(),
    }
}
