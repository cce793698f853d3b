// src/sources.rs

//! Source catalog: configuration describing each upstream feed/API.
//!
//! Operators edit the catalog (TOML or JSON); the pipeline reads it once
//! per batch and treats every entry as read-only. Per-run bookkeeping
//! (last run, last error) lives in [`crate::store::RunState`], not here.
//!
//! Lookup order for the catalog file:
//! 1. `$REGWATCH_SOURCES_PATH`
//! 2. `config/sources.toml`
//! 3. `config/sources.json`
//! 4. built-in seed catalog

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

const ENV_PATH: &str = "REGWATCH_SOURCES_PATH";

/// How a source is fetched and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Api,
    Scraper,
}

/// Quota window shapes offered by upstream APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    RollingHour,
    CalendarDay,
}

/// Per-source request quota, with an optional higher authenticated tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub limit: u32,
    pub window: QuotaWindow,
    /// Applied instead of `limit` when the source has an API key configured.
    #[serde(default)]
    pub authenticated_limit: Option<u32>,
}

impl Quota {
    /// Effective limit for the given auth state.
    pub fn effective_limit(&self, authenticated: bool) -> u32 {
        if authenticated {
            self.authenticated_limit.unwrap_or(self.limit)
        } else {
            self.limit
        }
    }
}

/// CSS selectors for scraper sources: one repeating row/card selector plus
/// field selectors evaluated inside each match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlSelectors {
    pub item: String,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// Field mapping for JSON API sources. Each entry lists candidate field
/// names tried in order; empty lists fall back to common defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiFieldMap {
    /// Key holding the item array inside a paginated wrapper. Bare arrays
    /// and single-object responses need no key; common wrapper keys
    /// (`results`, `data`, `items`) are tried when this is unset.
    #[serde(default)]
    pub items: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub link: Vec<String>,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub date: Vec<String>,
    #[serde(default)]
    pub external_id: Vec<String>,
    /// Recall classification / severity hint field (e.g. openFDA
    /// `classification` carrying "Class I").
    #[serde(default)]
    pub classification: Vec<String>,
}

fn default_poll_interval() -> u32 {
    60
}
fn default_priority_weight() -> i32 {
    5
}
fn default_active() -> bool {
    true
}

/// One configured upstream feed/API the pipeline polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Stable slug, also the run-state and breaker/limiter key.
    pub id: String,
    pub name: String,
    pub agency: String,
    pub region: String,
    pub kind: SourceKind,
    pub url: String,
    /// Tried once when the primary URL fails terminally.
    #[serde(default)]
    pub backup_url: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u32,
    #[serde(default = "default_priority_weight")]
    pub priority_weight: i32,
    #[serde(default)]
    pub urgency_keywords: Vec<String>,
    #[serde(default)]
    pub quota: Option<Quota>,
    #[serde(default)]
    pub selectors: Option<HtmlSelectors>,
    #[serde(default)]
    pub api_fields: Option<ApiFieldMap>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Source {
    pub fn poll_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.poll_interval_minutes))
    }

    /// Whether an API key is configured for this source, switching it to
    /// the authenticated quota tier. Keys live in the environment as
    /// `REGWATCH_API_KEY_<ID>` with dashes mapped to underscores.
    pub fn has_api_key(&self) -> bool {
        let var = format!(
            "REGWATCH_API_KEY_{}",
            self.id.to_ascii_uppercase().replace('-', "_")
        );
        std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Region/agency filter used by the batch trigger interface.
    pub fn matches(&self, region: Option<&str>, agency: Option<&str>) -> bool {
        let region_ok = region.is_none_or(|r| self.region.eq_ignore_ascii_case(r));
        let agency_ok = agency.is_none_or(|a| self.agency.eq_ignore_ascii_case(a));
        region_ok && agency_ok
    }
}

/// Load the catalog from an explicit path. Supports TOML or JSON.
pub fn load_catalog_from(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source catalog from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_catalog(&content, ext.as_str())
}

/// Load the catalog using the env var and file fallbacks, ending at the
/// built-in seed.
pub fn load_catalog_default() -> Result<Vec<Source>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_catalog_from(&pb);
        }
        return Err(anyhow!("REGWATCH_SOURCES_PATH points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_catalog_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_catalog_from(&json_p);
    }
    Ok(seed_catalog())
}

fn parse_catalog(s: &str, hint_ext: &str) -> Result<Vec<Source>> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported source catalog format"))
}

fn parse_toml(s: &str) -> Result<Vec<Source>> {
    #[derive(Deserialize)]
    struct Catalog {
        sources: Vec<Source>,
    }
    let c: Catalog = toml::from_str(s)?;
    validate(c.sources)
}

fn parse_json(s: &str) -> Result<Vec<Source>> {
    let v: Vec<Source> = serde_json::from_str(s)?;
    validate(v)
}

fn validate(sources: Vec<Source>) -> Result<Vec<Source>> {
    let mut seen = std::collections::BTreeSet::new();
    for src in &sources {
        if src.id.trim().is_empty() {
            return Err(anyhow!("source with empty id"));
        }
        if !seen.insert(src.id.clone()) {
            return Err(anyhow!("duplicate source id: {}", src.id));
        }
        if src.kind == SourceKind::Scraper && src.selectors.is_none() {
            return Err(anyhow!("scraper source {} has no selectors", src.id));
        }
    }
    Ok(sources)
}

fn rss(id: &str, name: &str, agency: &str, region: &str, url: &str, weight: i32) -> Source {
    Source {
        id: id.into(),
        name: name.into(),
        agency: agency.into(),
        region: region.into(),
        kind: SourceKind::Rss,
        url: url.into(),
        backup_url: None,
        poll_interval_minutes: 60,
        priority_weight: weight,
        urgency_keywords: vec![],
        quota: None,
        selectors: None,
        api_fields: None,
        active: true,
    }
}

const FOOD_KEYWORDS: &[&str] = &[
    "recall",
    "contamination",
    "listeria",
    "salmonella",
    "e. coli",
    "undeclared",
    "outbreak",
    "do not eat",
];

const PRODUCT_KEYWORDS: &[&str] = &[
    "recall",
    "injury",
    "death",
    "fire",
    "burn",
    "choking",
    "laceration",
];

/// Built-in catalog of US/EU/CA regulatory feeds, used when no config file
/// is present. Operators are expected to maintain their own catalog; this
/// seed keeps the demo binary and integration tests meaningful.
pub fn seed_catalog() -> Vec<Source> {
    let mut sources = Vec::new();

    let mut fda_recalls = rss(
        "fda-recalls",
        "FDA Recalls",
        "FDA",
        "US",
        "https://www.fda.gov/about-fda/contact-fda/stay-informed/rss-feeds/recalls/rss.xml",
        9,
    );
    fda_recalls.poll_interval_minutes = 30;
    fda_recalls.urgency_keywords = FOOD_KEYWORDS.iter().map(|s| s.to_string()).collect();
    sources.push(fda_recalls);

    let mut medwatch = rss(
        "fda-medwatch",
        "FDA MedWatch Safety Alerts",
        "FDA",
        "US",
        "https://www.fda.gov/about-fda/contact-fda/stay-informed/rss-feeds/medwatch/rss.xml",
        8,
    );
    medwatch.urgency_keywords = vec![
        "recall".into(),
        "safety alert".into(),
        "adverse event".into(),
        "serious".into(),
        "death".into(),
    ];
    sources.push(medwatch);

    let mut openfda = Source {
        id: "openfda-food-enforcement".into(),
        name: "openFDA Food Enforcement".into(),
        agency: "FDA".into(),
        region: "US".into(),
        kind: SourceKind::Api,
        url: "https://api.fda.gov/food/enforcement.json?sort=report_date:desc&limit=50".into(),
        backup_url: None,
        poll_interval_minutes: 120,
        priority_weight: 8,
        urgency_keywords: FOOD_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        quota: Some(Quota {
            limit: 240,
            window: QuotaWindow::RollingHour,
            authenticated_limit: Some(1000),
        }),
        selectors: None,
        api_fields: Some(ApiFieldMap {
            items: Some("results".into()),
            title: vec!["product_description".into()],
            link: vec![],
            description: vec!["reason_for_recall".into()],
            date: vec!["report_date".into(), "recall_initiation_date".into()],
            external_id: vec!["recall_number".into()],
            classification: vec!["classification".into()],
        }),
        active: true,
    };
    openfda.backup_url =
        Some("https://api.fda.gov/food/enforcement.json?limit=50".into());
    sources.push(openfda);

    let mut fsis = Source {
        id: "fsis-recalls".into(),
        name: "USDA FSIS Recalls".into(),
        agency: "USDA".into(),
        region: "US".into(),
        kind: SourceKind::Api,
        url: "https://www.fsis.usda.gov/fsis/api/recall/v/1".into(),
        backup_url: None,
        poll_interval_minutes: 60,
        priority_weight: 9,
        urgency_keywords: FOOD_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        quota: Some(Quota {
            limit: 60,
            window: QuotaWindow::RollingHour,
            authenticated_limit: None,
        }),
        selectors: None,
        api_fields: Some(ApiFieldMap {
            items: None,
            title: vec!["field_title".into(), "title".into()],
            link: vec!["field_recall_url".into(), "url".into()],
            description: vec!["field_summary".into(), "field_product_items".into()],
            date: vec!["field_recall_date".into()],
            external_id: vec!["field_recall_number".into()],
            classification: vec!["field_recall_classification".into()],
        }),
        active: true,
    };
    fsis.urgency_keywords.push("public health alert".into());
    sources.push(fsis);

    let mut cdc = rss(
        "cdc-outbreaks",
        "CDC Food Safety Alerts",
        "CDC",
        "US",
        "https://tools.cdc.gov/api/v2/resources/media/285676.rss",
        8,
    );
    cdc.urgency_keywords = FOOD_KEYWORDS.iter().map(|s| s.to_string()).collect();
    sources.push(cdc);

    sources.push(Source {
        id: "cpsc-recalls".into(),
        name: "CPSC Recalls".into(),
        agency: "CPSC".into(),
        region: "US".into(),
        kind: SourceKind::Api,
        url: "https://www.saferproducts.gov/RestWebServices/Recall?format=json".into(),
        backup_url: None,
        poll_interval_minutes: 120,
        priority_weight: 7,
        urgency_keywords: PRODUCT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        quota: Some(Quota {
            limit: 30,
            window: QuotaWindow::RollingHour,
            authenticated_limit: None,
        }),
        selectors: None,
        api_fields: Some(ApiFieldMap {
            items: None,
            title: vec!["Title".into()],
            link: vec!["URL".into()],
            description: vec!["Description".into()],
            date: vec!["RecallDate".into()],
            external_id: vec!["RecallNumber".into()],
            classification: vec![],
        }),
        active: true,
    });

    sources.push(Source {
        id: "nhtsa-recalls".into(),
        name: "NHTSA Vehicle Recalls".into(),
        agency: "NHTSA".into(),
        region: "US".into(),
        kind: SourceKind::Api,
        url: "https://api.nhtsa.gov/recalls/recallsByVehicle?make=all&model=all".into(),
        backup_url: None,
        poll_interval_minutes: 240,
        priority_weight: 6,
        urgency_keywords: vec![
            "recall".into(),
            "crash".into(),
            "fire".into(),
            "injury".into(),
            "airbag".into(),
        ],
        quota: Some(Quota {
            limit: 100,
            window: QuotaWindow::CalendarDay,
            authenticated_limit: None,
        }),
        selectors: None,
        api_fields: Some(ApiFieldMap {
            items: Some("results".into()),
            title: vec!["Component".into(), "Summary".into()],
            link: vec![],
            description: vec!["Summary".into(), "Consequence".into()],
            date: vec!["ReportReceivedDate".into()],
            external_id: vec!["NHTSACampaignNumber".into()],
            classification: vec![],
        }),
        active: true,
    });

    sources.push(Source {
        id: "epa-enforcement".into(),
        name: "EPA Enforcement Announcements".into(),
        agency: "EPA".into(),
        region: "US".into(),
        kind: SourceKind::Scraper,
        url: "https://www.epa.gov/newsreleases/search?subject=enforcement".into(),
        backup_url: None,
        poll_interval_minutes: 360,
        priority_weight: 5,
        urgency_keywords: vec![
            "enforcement".into(),
            "penalty".into(),
            "violation".into(),
            "settlement".into(),
        ],
        quota: None,
        selectors: Some(HtmlSelectors {
            item: "div.view-content article".into(),
            title: "h3 a".into(),
            link: Some("h3 a".into()),
            description: Some("div.field--name-body".into()),
            date: Some("time".into()),
        }),
        api_fields: None,
        active: true,
    });

    let mut osha = rss(
        "osha-news",
        "OSHA News Releases",
        "OSHA",
        "US",
        "https://www.osha.gov/rss/quicktakes.xml",
        4,
    );
    osha.poll_interval_minutes = 720;
    osha.urgency_keywords = vec![
        "citation".into(),
        "fatality".into(),
        "penalty".into(),
        "violation".into(),
    ];
    sources.push(osha);

    let mut rapex = rss(
        "eu-safety-gate",
        "EU Safety Gate (RAPEX)",
        "EU-COM",
        "EU",
        "https://ec.europa.eu/safety-gate-alerts/public/api/notification/rss",
        6,
    );
    rapex.poll_interval_minutes = 360;
    rapex.urgency_keywords = PRODUCT_KEYWORDS.iter().map(|s| s.to_string()).collect();
    sources.push(rapex);

    let mut hc = rss(
        "health-canada-recalls",
        "Health Canada Recalls",
        "HC-SC",
        "CA",
        "https://recalls-rappels.canada.ca/en/feeds/recent",
        6,
    );
    hc.poll_interval_minutes = 180;
    hc.urgency_keywords = FOOD_KEYWORDS.iter().map(|s| s.to_string()).collect();
    sources.push(hc);

    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn seed_catalog_is_valid() {
        let sources = seed_catalog();
        assert!(sources.len() >= 8);
        validate(sources).expect("seed catalog must validate");
    }

    #[test]
    fn toml_and_json_formats_parse() {
        let toml = r#"
[[sources]]
id = "fda-recalls"
name = "FDA Recalls"
agency = "FDA"
region = "US"
kind = "rss"
url = "https://example.test/rss.xml"
priority_weight = 9
urgency_keywords = ["recall"]
"#;
        let parsed = parse_toml(toml).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, SourceKind::Rss);
        assert_eq!(parsed[0].poll_interval_minutes, 60); // default
        assert!(parsed[0].active);

        let json = r#"[{
            "id": "cpsc",
            "name": "CPSC",
            "agency": "CPSC",
            "region": "US",
            "kind": "api",
            "url": "https://example.test/api"
        }]"#;
        let parsed = parse_json(json).unwrap();
        assert_eq!(parsed[0].priority_weight, 5);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let json = r#"[
            {"id":"x","name":"A","agency":"FDA","region":"US","kind":"rss","url":"u"},
            {"id":"x","name":"B","agency":"FDA","region":"US","kind":"rss","url":"u"}
        ]"#;
        assert!(parse_json(json).is_err());
    }

    #[test]
    fn scraper_requires_selectors() {
        let json = r#"[{"id":"s","name":"S","agency":"EPA","region":"US","kind":"scraper","url":"u"}]"#;
        assert!(parse_json(json).is_err());
    }

    #[test]
    fn filters_match_case_insensitively() {
        let s = &seed_catalog()[0];
        assert!(s.matches(Some("us"), None));
        assert!(s.matches(None, Some("fda")));
        assert!(!s.matches(Some("EU"), None));
        assert!(s.matches(None, None));
    }

    #[test]
    fn quota_tiers() {
        let q = Quota {
            limit: 240,
            window: QuotaWindow::RollingHour,
            authenticated_limit: Some(1000),
        };
        assert_eq!(q.effective_limit(false), 240);
        assert_eq!(q.effective_limit(true), 1000);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_PATH);

        // No files in temp CWD: seed catalog.
        let v = load_catalog_default().unwrap();
        assert!(!v.is_empty());

        // Env var takes precedence.
        let p_json = tmp.path().join("sources.json");
        fs::write(
            &p_json,
            r#"[{"id":"only","name":"Only","agency":"FDA","region":"US","kind":"rss","url":"u"}]"#,
        )
        .unwrap();
        env::set_var(ENV_PATH, p_json.display().to_string());
        let v2 = load_catalog_default().unwrap();
        assert_eq!(v2.len(), 1);
        assert_eq!(v2[0].id, "only");
        env::remove_var(ENV_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
