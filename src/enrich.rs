// src/enrich.rs

//! Optional AI-assisted classification: provider abstraction + daily limit.
//!
//! Strictly best-effort. The pipeline calls this with a timeout and treats
//! every failure mode (disabled, over limit, HTTP error, unparseable
//! output) as "no result", falling back to the deterministic scorer.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result returned by classification providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    /// Model-assigned urgency, 1-10.
    pub urgency_score: u8,
    pub summary: String,
}

/// Trait object used by the orchestrator and tests.
pub trait Classifier: Send + Sync {
    /// Classify one item. `None` means "no usable result"; the caller
    /// falls back to deterministic scoring.
    fn classify<'a>(
        &'a self,
        title: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Classification>> + Send + 'a>>;

    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn Classifier>;

/// Config loaded from `config/enrich.json`. Reading/parsing failures fall
/// back to the disabled default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    pub enabled: bool,
    /// "openai" is the only wired provider.
    pub provider: Option<String>,
    /// Per-day call budget; defaults to 200 if absent.
    pub daily_limit: Option<u32>,
    /// Per-call timeout in seconds; defaults to 10.
    pub timeout_secs: Option<u64>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            daily_limit: Some(200),
            timeout_secs: Some(10),
        }
    }
}

/// Load config from `config/enrich.json`, defaulting to disabled.
pub fn load_enrich_config() -> EnrichConfig {
    let path = Path::new("config/enrich.json");
    match std::fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
        Err(_) => EnrichConfig::default(),
    }
}

/// Factory: build a classifier according to config and environment.
///
/// * If `REGWATCH_AI_TEST_MODE=mock`, returns a deterministic mock.
/// * Else if `config.enabled == false`, returns a disabled classifier.
/// * Else builds the real provider with the daily limit applied.
pub fn build_classifier(config: &EnrichConfig) -> DynClassifier {
    if std::env::var("REGWATCH_AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockClassifier {
            fixed: Classification {
                urgency_score: 5,
                summary: "Mock classification".to_string(),
            },
        });
    }

    if !config.enabled {
        return Arc::new(DisabledClassifier);
    }

    match config.provider.as_deref() {
        Some("openai") => Arc::new(OpenAiClassifier::new(
            None,
            config.daily_limit.unwrap_or(200),
        )),
        _ => Arc::new(DisabledClassifier),
    }
}

/// Call the classifier under a timeout. Timeouts and absent results both
/// come back as `None`; the caller logs and falls back.
pub async fn classify_with_timeout(
    classifier: &dyn Classifier,
    title: &str,
    content: &str,
    timeout: Duration,
) -> Option<Classification> {
    match tokio::time::timeout(timeout, classifier.classify(title, content)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                provider = classifier.provider_name(),
                "enrichment call timed out"
            );
            None
        }
    }
}

/// Returns `None` always; used when enrichment is disabled.
pub struct DisabledClassifier;

impl Classifier for DisabledClassifier {
    fn classify<'a>(
        &'a self,
        _title: &'a str,
        _content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Classification>> + Send + 'a>> {
        Box::pin(async { None })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed-answer classifier for tests and local runs.
#[derive(Clone)]
pub struct MockClassifier {
    pub fixed: Classification,
}

impl Classifier for MockClassifier {
    fn classify<'a>(
        &'a self,
        _title: &'a str,
        _content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Classification>> + Send + 'a>> {
        let out = self.fixed.clone();
        Box::pin(async move { Some(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Debug, Clone)]
struct DailyCounter {
    day: i64,
    count: u32,
}

impl DailyCounter {
    fn new() -> Self {
        Self {
            day: today(),
            count: 0,
        }
    }
}

fn today() -> i64 {
    chrono::Utc::now().timestamp() / 86_400
}

/// OpenAI-backed classifier. Requires `OPENAI_API_KEY`.
pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl OpenAiClassifier {
    pub fn new(model_override: Option<&str>, daily_limit: u32) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let http = reqwest::Client::builder()
            .user_agent("regwatch/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        let model = model_override.unwrap_or("gpt-4o-mini").to_string();
        Self {
            http,
            api_key,
            model,
            daily_limit,
            counter: Mutex::new(DailyCounter::new()),
        }
    }

    fn within_budget(&self) -> bool {
        let mut g = self.counter.lock().expect("counter lock");
        if g.day != today() {
            *g = DailyCounter::new();
        }
        if g.count >= self.daily_limit {
            return false;
        }
        g.count += 1;
        true
    }

    async fn classify_impl(&self, title: &str, content: &str) -> Option<Classification> {
        if self.api_key.is_empty() || !self.within_budget() {
            return None;
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "You classify regulatory alerts. Reply with ONLY a JSON object: \
                   {\"urgency\": <integer 1-10>, \"summary\": \"<one sentence>\"}.";
        let user = format!("Title: {title}\n\n{content}");
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
            max_tokens: 160,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .ok()?;

        if !resp.status().is_success() {
            return None;
        }
        let body: Resp = resp.json().await.ok()?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_model_output(content)
    }
}

impl Classifier for OpenAiClassifier {
    fn classify<'a>(
        &'a self,
        title: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Classification>> + Send + 'a>> {
        Box::pin(self.classify_impl(title, content))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Pull the JSON object out of the model reply (models love to wrap it in
/// prose) and validate it. Anything unparseable is `None`.
pub fn parse_model_output(reply: &str) -> Option<Classification> {
    #[derive(Deserialize)]
    struct Raw {
        urgency: i64,
        summary: Option<String>,
    }

    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let raw: Raw = serde_json::from_str(&reply[start..=end]).ok()?;
    if !(1..=10).contains(&raw.urgency) {
        return None;
    }
    let summary = sanitize_summary(raw.summary.as_deref().unwrap_or(""));
    Some(Classification {
        urgency_score: raw.urgency as u8,
        summary,
    })
}

/// Single line, collapsed whitespace, bounded length.
fn sanitize_summary(input: &str) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(crate::ingest::normalize::SUMMARY_BUDGET).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_classifier_returns_none() {
        let c = DisabledClassifier;
        assert!(c.classify("t", "c").await.is_none());
    }

    #[tokio::test]
    async fn timeout_returns_none() {
        struct SlowClassifier;
        impl Classifier for SlowClassifier {
            fn classify<'a>(
                &'a self,
                _t: &'a str,
                _c: &'a str,
            ) -> Pin<Box<dyn Future<Output = Option<Classification>> + Send + 'a>> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Some(Classification {
                        urgency_score: 9,
                        summary: "too late".into(),
                    })
                })
            }
            fn provider_name(&self) -> &'static str {
                "slow"
            }
        }

        let out =
            classify_with_timeout(&SlowClassifier, "t", "c", Duration::from_millis(20)).await;
        assert!(out.is_none());
    }

    #[test]
    fn model_output_parsing() {
        let ok = parse_model_output(r#"{"urgency": 8, "summary": "Serious recall."}"#).unwrap();
        assert_eq!(ok.urgency_score, 8);
        assert_eq!(ok.summary, "Serious recall.");

        let wrapped =
            parse_model_output("Sure! Here you go: {\"urgency\": 3, \"summary\": \"Minor.\"} Hope that helps.")
                .unwrap();
        assert_eq!(wrapped.urgency_score, 3);

        assert!(parse_model_output("no json here").is_none());
        assert!(parse_model_output(r#"{"urgency": 40, "summary": "x"}"#).is_none());
        assert!(parse_model_output(r#"{"summary": "missing score"}"#).is_none());
    }
}
