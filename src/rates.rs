// Runtime benchmark acquisition via a web search API. Lookup is best
// effort and degrades to "no rate found" rather than failing the audit

use anyhow::Context;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateQuote {
    pub code: String,
    pub rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Source of runtime allowed-amount quotes. The orchestrator depends on
/// this seam, not on the concrete client.
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
    /// Search for the Medicare allowed amount of a procedure code,
    /// optionally narrowed to a state. Returns `Ok(None)` when lookup is
    /// disabled or no dollar figure could be recovered.
    async fn lookup(&self, code: &str, locality: Option<&str>)
        -> anyhow::Result<Option<RateQuote>>;
}

pub struct RateClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RateClient {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        RateClient {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl RateSource for RateClient {
    async fn lookup(&self, code: &str, locality: Option<&str>) -> anyhow::Result<Option<RateQuote>> {
        let api_key = match &self.api_key {
            Some(key) => key,
            None => return Ok(None),
        };

        let query = format!(
            "CPT {} Medicare allowed amount {} 2024 2025",
            code,
            locality.unwrap_or("")
        );
        let url = format!(
            "{}?engine=google&q={}&api_key={}&num=3",
            self.endpoint,
            urlencoding::encode(&query),
            api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Rate lookup request failed")?;

        if !response.status().is_success() {
            tracing::debug!(code = %code, status = %response.status(), "rate lookup rejected");
            return Ok(None);
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse rate lookup response")?;

        let mut haystack = String::new();
        for fragment in [
            payload["answer_box"]["answer"].as_str(),
            payload["answer_box"]["snippet"].as_str(),
            payload["knowledge_graph"]["description"].as_str(),
        ]
        .into_iter()
        .flatten()
        {
            haystack.push_str(fragment);
            haystack.push(' ');
        }
        if let Some(results) = payload["organic_results"].as_array() {
            for result in results.iter().take(3) {
                if let Some(snippet) = result["snippet"].as_str() {
                    haystack.push_str(snippet);
                    haystack.push(' ');
                }
            }
        }

        let rate = match extract_rate(&haystack) {
            Some(rate) => rate,
            None => {
                tracing::debug!(code = %code, "no dollar figure in rate lookup results");
                return Ok(None);
            }
        };

        let source = payload["answer_box"]["link"]
            .as_str()
            .or_else(|| payload["organic_results"][0]["link"].as_str())
            .map(str::to_string);

        Ok(Some(RateQuote {
            code: code.to_string(),
            rate,
            source,
            fetched_at: Utc::now(),
        }))
    }
}

/// First dollar figure in the text, cents optional.
fn extract_rate(text: &str) -> Option<f64> {
    let money = Regex::new(r"\$\s?(\d+(?:\.\d{2})?)").unwrap();
    money
        .captures(text)?
        .get(1)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}
