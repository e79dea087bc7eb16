//! Optional generative augmentation of heuristic filters.
//!
//! An [`Augmenter`] receives the raw query and the heuristic
//! [`FilterConfig`] and may propose a revision. The stage is strictly
//! additive: [`run_augmentation`] bounds the call with a timeout and a
//! cancellation token, and [`apply_outcome`] keeps the heuristic result
//! whenever the call does not produce a usable revision.
//!
//! Revised names are re-canonicalized against the alias index, so the
//! plan selector never sees a value the index does not know.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use disclosure_nlq_core::alias::AliasIndex;
use disclosure_nlq_core::compiler::Compilation;
use disclosure_nlq_core::models::{EntityType, FilterConfig};

use crate::config::AugmentationConfig;

/// A proposed revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Augmentation {
    pub filters: FilterConfig,
    pub final_text: Option<String>,
}

#[async_trait]
pub trait Augmenter: Send + Sync {
    fn name(&self) -> &str;

    async fn augment(
        &self,
        query: &str,
        heuristic: &FilterConfig,
        today: NaiveDate,
    ) -> Result<Augmentation>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum AugmentOutcome {
    Revised(Augmentation),
    TimedOut,
    Failed(String),
    Cancelled,
}

pub async fn run_augmentation(
    augmenter: &dyn Augmenter,
    query: &str,
    heuristic: &FilterConfig,
    today: NaiveDate,
    timeout: Duration,
    cancel: &CancellationToken,
) -> AugmentOutcome {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => AugmentOutcome::Cancelled,
        r = tokio::time::timeout(timeout, augmenter.augment(query, heuristic, today)) => match r {
            Err(_) => AugmentOutcome::TimedOut,
            Ok(Err(e)) => AugmentOutcome::Failed(e.to_string()),
            Ok(Ok(a)) => AugmentOutcome::Revised(a),
        },
    };
    match &outcome {
        AugmentOutcome::Revised(_) => {
            info!(augmenter = augmenter.name(), "augmentation revised filters")
        }
        AugmentOutcome::TimedOut => warn!(
            augmenter = augmenter.name(),
            timeout_ms = timeout.as_millis() as u64,
            "augmentation timed out"
        ),
        AugmentOutcome::Failed(e) => {
            warn!(augmenter = augmenter.name(), error = %e, "augmentation failed")
        }
        AugmentOutcome::Cancelled => info!(augmenter = augmenter.name(), "augmentation cancelled"),
    }
    outcome
}

/// Folds `outcome` into `compilation`. Confidence is left unchanged: it
/// measures what the heuristics resolved.
pub fn apply_outcome(compilation: &mut Compilation, outcome: AugmentOutcome, aliases: &AliasIndex) {
    let notes = &mut compilation.diagnostics.notes;
    let revision = match outcome {
        AugmentOutcome::Revised(a) => a,
        AugmentOutcome::TimedOut => {
            notes.push("augmentation timed out; heuristic filters kept".to_string());
            return;
        }
        AugmentOutcome::Failed(e) => {
            notes.push(format!("augmentation unavailable ({e}); heuristic filters kept"));
            return;
        }
        AugmentOutcome::Cancelled => {
            notes.push("augmentation cancelled; heuristic filters kept".to_string());
            return;
        }
    };

    let heuristic = &compilation.filters;
    let mut revised = FilterConfig {
        quantity: revision.filters.quantity.or(heuristic.quantity),
        ..Default::default()
    };
    for name in &revision.filters.company_names {
        match aliases.canonicalize(name, EntityType::Company) {
            Some(c) => {
                revised.push_company(c);
            }
            None => notes.push(format!("augmentation proposed unknown company '{name}'")),
        }
    }
    for name in &revision.filters.announcement_types {
        match aliases.canonicalize(name, EntityType::ReportType) {
            Some(c) => {
                revised.push_announcement_type(c);
            }
            None => notes.push(format!("augmentation proposed unknown report type '{name}'")),
        }
    }
    if revision.filters.start_date.is_some() || revision.filters.end_date.is_some() {
        revised.start_date = revision.filters.start_date;
        revised.end_date = revision.filters.end_date;
    } else {
        revised.start_date = heuristic.start_date;
        revised.end_date = heuristic.end_date;
        revised.relative_timeframe = heuristic.relative_timeframe;
    }
    revised.normalize_dates();

    if revised.is_empty() {
        notes.push("augmentation returned no usable filters; heuristic filters kept".to_string());
        return;
    }
    compilation.filters = revised;
    if let Some(text) = revision.final_text {
        compilation.diagnostics.final_text = Some(text);
    }
}

// ============ HTTP augmenter ============

/// Calls an OpenAI-compatible chat-completions endpoint (OpenAI, Ollama).
pub struct HttpAugmenter {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpAugmenter {
    pub fn from_config(config: &AugmentationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("augmentation.model required"))?;
        let api_key = match config.provider.as_str() {
            "openai" => Some(
                std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?,
            ),
            _ => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.endpoint(),
            model,
            api_key,
        })
    }
}

const SYSTEM_PROMPT: &str = "You convert Hebrew or English questions about Israeli corporate \
disclosures into JSON filters. Reply with one JSON object only, with keys \
\"companies\" (array of company names), \"report_types\" (array of report type names), \
\"start_date\" and \"end_date\" (YYYY-MM-DD or null), and \"final_text\" (a short \
restatement of the understood query).";

#[async_trait]
impl Augmenter for HttpAugmenter {
    fn name(&self) -> &str {
        &self.model
    }

    async fn augment(
        &self,
        query: &str,
        heuristic: &FilterConfig,
        today: NaiveDate,
    ) -> Result<Augmentation> {
        let user = format!(
            "Today is {}. Query: {}\nHeuristic filters: {}",
            today,
            query,
            serde_json::to_string(heuristic)?
        );
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user },
            ],
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("augmentation API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))?;
        parse_reply(content)
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default, alias = "companyNames")]
    companies: Vec<String>,
    #[serde(default, alias = "announcementTypes")]
    report_types: Vec<String>,
    #[serde(default, alias = "startDate")]
    start_date: Option<String>,
    #[serde(default, alias = "endDate")]
    end_date: Option<String>,
    #[serde(default, alias = "finalText")]
    final_text: Option<String>,
}

/// Extracts the first `{...}` object from a model reply.
fn parse_reply(content: &str) -> Result<Augmentation> {
    let start = content.find('{').ok_or_else(|| anyhow!("reply contains no JSON object"))?;
    let end = content.rfind('}').ok_or_else(|| anyhow!("reply contains no JSON object"))?;
    if end < start {
        bail!("reply contains no JSON object");
    }
    let reply: Reply = serde_json::from_str(&content[start..=end])?;
    let date = |s: &Option<String>| {
        s.as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(d), "%Y-%m-%d").ok())
    };
    Ok(Augmentation {
        filters: FilterConfig {
            company_names: reply.companies,
            announcement_types: reply.report_types,
            start_date: date(&reply.start_date),
            end_date: date(&reply.end_date),
            ..Default::default()
        },
        final_text: reply.final_text.filter(|t| !t.trim().is_empty()),
    })
}
