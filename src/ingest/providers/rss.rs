// src/ingest/providers/rss.rs

//! RSS 2.0 / Atom adapter.
//!
//! Tolerates CDATA-wrapped text, stray HTML entities and missing optional
//! fields; an item is accepted on a non-trivial title alone.

use anyhow::Context;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::{FetchError, Result};
use crate::ingest::providers::accept_title;
use crate::ingest::types::{RawItem, SourceAdapter};
use crate::sources::Source;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    guid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    summary: Option<String>,
    content: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
}

pub struct RssAdapter;

impl SourceAdapter for RssAdapter {
    fn parse(&self, source: &Source, body: &str) -> Result<Vec<RawItem>> {
        let xml = scrub_html_entities_for_xml(body);

        if looks_like_atom(&xml) {
            parse_atom(source, &xml)
        } else {
            parse_rss(source, &xml)
        }
    }
}

fn looks_like_atom(xml: &str) -> bool {
    // Cheap sniff: an Atom feed's root element is <feed>.
    xml.find("<feed").is_some_and(|pos| {
        !xml[..pos].contains("<rss") && !xml[..pos].contains("<channel")
    })
}

fn parse_rss(source: &Source, xml: &str) -> Result<Vec<RawItem>> {
    let rss: Rss = from_str(xml)
        .with_context(|| format!("parsing rss xml for {}", source.id))
        .map_err(|e| FetchError::parse(&source.id, e))?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let title = it.title.unwrap_or_default();
        if !accept_title(&title) {
            continue;
        }
        // guid doubles as the permalink on feeds that omit <link>.
        let guid = it.guid;
        let link = it
            .link
            .filter(|l| !l.trim().is_empty())
            .or_else(|| guid.clone().filter(|g| g.starts_with("http")));

        out.push(RawItem {
            title,
            description: it.description.unwrap_or_default(),
            link,
            published_raw: it.pub_date,
            external_id: guid,
            extra: Default::default(),
        });
    }
    Ok(out)
}

fn parse_atom(source: &Source, xml: &str) -> Result<Vec<RawItem>> {
    let feed: AtomFeed = from_str(xml)
        .with_context(|| format!("parsing atom xml for {}", source.id))
        .map_err(|e| FetchError::parse(&source.id, e))?;

    let mut out = Vec::with_capacity(feed.entry.len());
    for en in feed.entry {
        let title = en.title.unwrap_or_default();
        if !accept_title(&title) {
            continue;
        }
        let link = en
            .link
            .iter()
            .find_map(|l| l.href.clone())
            .or_else(|| en.id.clone().filter(|i| i.starts_with("http")));

        out.push(RawItem {
            title,
            description: en.summary.or(en.content).unwrap_or_default(),
            link,
            published_raw: en.published.or(en.updated),
            external_id: en.id,
            extra: Default::default(),
        });
    }
    Ok(out)
}

/// Named HTML entities are not valid XML; replace the common ones before
/// handing the document to the XML parser.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
