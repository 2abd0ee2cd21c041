// Completion adapter: builds the auditor prompt, calls an OpenAI-compatible
// endpoint, and recovers structured findings from the reply

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::forensic::ForensicOutput;
use crate::types::{ChatMessage, ChatRole, InsuranceDocument, InsuranceState};

/// How many prior messages ride along with each completion.
const HISTORY_WINDOW: usize = 10;

const AUDITOR_PERSONA: &str = "You are a senior forensic health-insurance auditor working on the member's behalf.\n\
\n\
Operating rules:\n\
1. DATA PRIMACY: when member documents are provided below, their figures outrank general knowledge. Quote copays, deductibles and allowed amounts from the documents whenever they answer the question.\n\
2. FINANCIAL PRECISION: every dollar figure must be arithmetically consistent with the plan state and the documents. Show the calculation when you assert a liability.\n\
3. NON-EVALUATIVE STANCE: report what the numbers show. Never speculate about provider intent or accuse anyone of fraud.\n\
4. NO LEGAL OR CLINICAL ADVICE: you analyze billing data. Refer the member to licensed professionals for legal or medical decisions.\n\
5. End every response with a single line starting with \"Next Strategic Step:\" naming one concrete action the member can take.\n\
\n\
When your analysis yields structured findings, append a <forensic_data>{...}</forensic_data> block after your prose. The JSON inside uses the keys liability_calc, confidence_score, code_validation, strategic_disclaimer, and optionally fmv_variance, dispute_token and is_overcharge.";

/// Everything a provider needs to produce the next reply.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub history: Vec<ChatMessage>,
    pub user_message: String,
    pub documents: Vec<InsuranceDocument>,
    pub plan: Option<InsuranceState>,
}

#[derive(Debug, Clone)]
pub struct CompletionReply {
    pub content: String,
}

#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply>;
}

pub struct OpenAiCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompletionClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120)) // 2 minutes for LLM responses
            .connect_timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        OpenAiCompletionClient {
            client,
            base_url,
            api_key,
        }
    }

    fn build_messages(&self, request: &CompletionRequest) -> Vec<Value> {
        let mut messages = vec![json!({
            "role": "system",
            "content": build_system_prompt(&request.documents, request.plan.as_ref()),
        })];

        let start = request.history.len().saturating_sub(HISTORY_WINDOW);
        for msg in &request.history[start..] {
            messages.push(json!({
                "role": if msg.role == ChatRole::User { "user" } else { "assistant" },
                "content": msg.content,
            }));
        }

        messages.push(json!({
            "role": "user",
            "content": request.user_message,
        }));

        messages
    }
}

#[async_trait::async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply> {
        let messages = self.build_messages(request);

        let body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": 16000,
        });

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Provider error ({}): {}", status, error_text);
        }

        let payload: Value = response.json().await?;
        let content = payload["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| anyhow::anyhow!("No content in completion response"))?
            .to_string();

        Ok(CompletionReply { content })
    }
}

fn build_system_prompt(documents: &[InsuranceDocument], plan: Option<&InsuranceState>) -> String {
    let document_context = if documents.is_empty() {
        "No member documents are on file. Encourage the member to upload their SBC or latest EOB before relying on plan-specific figures.".to_string()
    } else {
        documents
            .iter()
            .map(|doc| {
                format!(
                    "[DOCUMENT: {} ({})]\n{}\n---",
                    doc.title,
                    doc.category.label(),
                    doc.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let plan_context = match plan {
        Some(state) => format!(
            "CURRENT PLAN STATE: {} plan, {}. Deductible ${:.2} used of ${:.2}. Out-of-pocket ${:.2} used of ${:.2} maximum.",
            state.plan_type.map(|p| p.label()).unwrap_or("UNKNOWN"),
            state
                .network_status
                .map(|n| n.label())
                .unwrap_or("network status unverified"),
            state.deductible_used,
            state.deductible_total,
            state.oop_used,
            state.oop_max,
        ),
        None => "CURRENT PLAN STATE: not provided.".to_string(),
    };

    format!(
        "{}\n\n=== MEMBER DOCUMENTS ===\n{}\n\n{}",
        AUDITOR_PERSONA, document_context, plan_context
    )
}

/// Split a completion into prose and the structured findings block, if any.
///
/// The findings JSON is often wrapped in a markdown code fence; the fence is
/// stripped before parsing. A block that fails to parse still yields partial
/// output when a liability figure can be recovered from the raw text, marked
/// with reduced confidence and failed code validation.
pub fn extract_forensic_payload(content: &str) -> (String, Option<ForensicOutput>) {
    let block = Regex::new(r"(?s)<forensic_data>(.*?)</forensic_data>").unwrap();

    let captures = match block.captures(content) {
        Some(captures) => captures,
        None => return (content.to_string(), None),
    };

    let raw_inner = captures.get(1).map(|m| m.as_str()).unwrap_or("");
    let mut inner = raw_inner.trim();
    if let Some(stripped) = inner.strip_prefix("```json") {
        inner = stripped.trim_start();
    } else if let Some(stripped) = inner.strip_prefix("```") {
        inner = stripped.trim_start();
    }
    if let Some(stripped) = inner.strip_suffix("```") {
        inner = stripped.trim_end();
    }

    let output = match serde_json::from_str::<ForensicOutput>(inner) {
        Ok(output) => Some(output),
        Err(_) => recover_partial(raw_inner),
    };

    let clean = block.replace_all(content, "").trim().to_string();
    (clean, output)
}

fn recover_partial(raw: &str) -> Option<ForensicOutput> {
    let liability = Regex::new(r#""liability_calc":\s*([\d.]+)"#).unwrap();
    let value = liability
        .captures(raw)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()?;

    Some(ForensicOutput {
        liability_calc: value,
        confidence_score: 0.5,
        code_validation: false,
        strategic_disclaimer: "Partial audit data recovered from malformed payload.".to_string(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentCategory, DocumentStatus};
    use chrono::Utc;

    #[test]
    fn test_extract_plain_block() {
        let content = "Your claim looks inflated.\n<forensic_data>{\"liability_calc\": 120.8, \"confidence_score\": 0.95, \"code_validation\": true, \"strategic_disclaimer\": \"Verified against benchmarks.\", \"fmv_variance\": 67.41}</forensic_data>";
        let (clean, output) = extract_forensic_payload(content);
        let output = output.unwrap();

        assert_eq!(clean, "Your claim looks inflated.");
        assert_eq!(output.liability_calc, 120.8);
        assert_eq!(output.confidence_score, 0.95);
        assert!(output.code_validation);
        assert_eq!(output.fmv_variance, Some(67.41));
    }

    #[test]
    fn test_extract_fenced_block() {
        let content = "Summary above.\n<forensic_data>\n```json\n{\"liability_calc\": 75.0, \"confidence_score\": 0.9, \"code_validation\": true, \"strategic_disclaimer\": \"ok\"}\n```\n</forensic_data>";
        let (clean, output) = extract_forensic_payload(content);

        assert_eq!(clean, "Summary above.");
        assert_eq!(output.unwrap().liability_calc, 75.0);
    }

    #[test]
    fn test_malformed_block_recovers_liability() {
        let content = "Findings:\n<forensic_data>{\"liability_calc\": 300.5, \"confidence_score\": oops}</forensic_data>";
        let (clean, output) = extract_forensic_payload(content);
        let output = output.unwrap();

        assert_eq!(clean, "Findings:");
        assert_eq!(output.liability_calc, 300.5);
        assert_eq!(output.confidence_score, 0.5);
        assert!(!output.code_validation);
        assert_eq!(
            output.strategic_disclaimer,
            "Partial audit data recovered from malformed payload."
        );
    }

    #[test]
    fn test_unrecoverable_block_yields_none() {
        let content = "Findings:\n<forensic_data>not json at all</forensic_data>";
        let (clean, output) = extract_forensic_payload(content);
        assert_eq!(clean, "Findings:");
        assert!(output.is_none());
    }

    #[test]
    fn test_no_block_passes_through() {
        let (clean, output) = extract_forensic_payload("Just prose, no findings.");
        assert_eq!(clean, "Just prose, no findings.");
        assert!(output.is_none());
    }

    #[test]
    fn test_system_prompt_includes_documents_and_plan() {
        let documents = vec![InsuranceDocument {
            id: "d1".to_string(),
            title: "EOB March".to_string(),
            category: DocumentCategory::Eob,
            content: "Allowed amount $128.00 for 99214".to_string(),
            upload_date: Utc::now(),
            status: DocumentStatus::Active,
        }];
        let plan = InsuranceState::default_plan();

        let prompt = build_system_prompt(&documents, Some(&plan));
        assert!(prompt.contains("[DOCUMENT: EOB March (EOB)]"));
        assert!(prompt.contains("Allowed amount $128.00 for 99214"));
        assert!(prompt.contains("PPO plan, In-Network"));
        assert!(prompt.contains("Next Strategic Step:"));
    }

    #[test]
    fn test_system_prompt_without_documents() {
        let prompt = build_system_prompt(&[], None);
        assert!(prompt.contains("No member documents are on file"));
        assert!(prompt.contains("CURRENT PLAN STATE: not provided."));
    }

    #[test]
    fn test_build_messages_caps_history() {
        let client = OpenAiCompletionClient::new("https://example.invalid/v1".to_string(), String::new());
        let history: Vec<ChatMessage> = (0..15)
            .map(|i| ChatMessage::user(format!("message {}", i)))
            .collect();
        let request = CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            history,
            user_message: "latest question".to_string(),
            documents: Vec::new(),
            plan: None,
        };

        let messages = client.build_messages(&request);
        // system + 10 most recent + the new user message
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[1]["content"], "message 5");
        assert_eq!(messages[11]["content"], "latest question");
    }
}
