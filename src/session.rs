// Session orchestrator: one tokio task per conversation owns all of its
// state; commands arrive over an mpsc channel and run strictly one at a time

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::benchmarks::BenchmarkTable;
use crate::compliance::{log_operation, ComplianceLogEntry};
use crate::completion::{extract_forensic_payload, CompletionClient, CompletionRequest};
use crate::config::ForensicConfig;
use crate::forensic::{
    audit_claim, calculate_burn_rate, detect_discrepancies, generate_dispute_token, AuditRecord,
    BurnRate, ForensicOutput,
};
use crate::rates::{RateQuote, RateSource};
use crate::scrubber::{PiiCategory, ScrubEngine, ScrubOutcome};
use crate::types::{
    ChatMessage, ChatRole, DocumentCategory, DocumentStatus, InsuranceDocument, InsuranceState,
    RiskLevel, SystemMetrics,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("session channel closed")]
    ChannelClosed,
}

/// Shared collaborators handed to every session task.
#[derive(Clone)]
pub struct SessionDeps {
    pub scrubber: Arc<ScrubEngine>,
    pub completion: Arc<dyn CompletionClient>,
    pub rates: Arc<dyn RateSource>,
    pub forensic: Arc<ForensicConfig>,
    pub default_model: String,
}

pub enum SessionCommand {
    ProcessMessage {
        message: String,
        model: Option<String>,
        respond_to: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    Scrub {
        text: String,
        respond_to: oneshot::Sender<ScrubOutcome>,
    },
    UploadDocument {
        title: String,
        category: DocumentCategory,
        content: String,
        respond_to: oneshot::Sender<InsuranceDocument>,
    },
    DeleteDocument {
        document_id: String,
        respond_to: oneshot::Sender<bool>,
    },
    SyncContext {
        insurance: Option<InsuranceState>,
        documents: Option<Vec<InsuranceDocument>>,
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
    LookupRate {
        code: String,
        locality: Option<String>,
        respond_to: oneshot::Sender<Option<RateQuote>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cheap cloneable address of a session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn process_message(
        &self,
        message: String,
        model: Option<String>,
    ) -> Result<SessionSnapshot, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::ProcessMessage {
                message,
                model,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    pub async fn scrub(&self, text: String) -> Result<ScrubOutcome, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Scrub { text, respond_to })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn upload_document(
        &self,
        title: String,
        category: DocumentCategory,
        content: String,
    ) -> Result<InsuranceDocument, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::UploadDocument {
                title,
                category,
                content,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn delete_document(&self, document_id: String) -> Result<bool, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::DeleteDocument {
                document_id,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn sync_context(
        &self,
        insurance: Option<InsuranceState>,
        documents: Option<Vec<InsuranceDocument>>,
    ) -> Result<SessionSnapshot, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::SyncContext {
                insurance,
                documents,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn lookup_rate(
        &self,
        code: String,
        locality: Option<String>,
    ) -> Result<Option<RateQuote>, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::LookupRate {
                code,
                locality,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Snapshot { respond_to })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}

/// Observable session state, returned to clients after each command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub is_processing: bool,
    pub model: String,
    pub insurance_state: InsuranceState,
    pub documents: Vec<InsuranceDocument>,
    pub audit_logs: Vec<AuditRecord>,
    pub compliance_logs: Vec<ComplianceLogEntry>,
    pub benchmarks: HashMap<String, f64>,
    /// Spend projection derived from the audit log at snapshot time.
    pub burn_rate: BurnRate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_context_sync: Option<DateTime<Utc>>,
    pub metrics: SystemMetrics,
}

struct SessionState {
    id: String,
    messages: Vec<ChatMessage>,
    insurance: InsuranceState,
    documents: Vec<InsuranceDocument>,
    // Newest-first, capped.
    audit_logs: Vec<AuditRecord>,
    compliance_logs: Vec<ComplianceLogEntry>,
    benchmarks: BenchmarkTable,
    model: String,
    is_processing: bool,
    last_context_sync: Option<DateTime<Utc>>,
    metrics: SystemMetrics,
}

impl SessionState {
    fn new(id: String, model: String) -> Self {
        SessionState {
            id,
            messages: Vec::new(),
            insurance: InsuranceState::default_plan(),
            documents: Vec::new(),
            audit_logs: Vec::new(),
            compliance_logs: Vec::new(),
            benchmarks: BenchmarkTable::seed_default(),
            model,
            is_processing: false,
            last_context_sync: None,
            metrics: SystemMetrics::default(),
        }
    }

    fn log_compliance(&mut self, entry: ComplianceLogEntry, cap: usize) {
        push_front_capped(&mut self.compliance_logs, entry, cap);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            messages: self.messages.clone(),
            is_processing: self.is_processing,
            model: self.model.clone(),
            insurance_state: self.insurance.clone(),
            documents: self.documents.clone(),
            audit_logs: self.audit_logs.clone(),
            compliance_logs: self.compliance_logs.clone(),
            benchmarks: self.benchmarks.snapshot(),
            burn_rate: calculate_burn_rate(&self.audit_logs, self.insurance.oop_max),
            last_context_sync: self.last_context_sync,
            metrics: self.metrics.clone(),
        }
    }
}

fn push_front_capped<T>(log: &mut Vec<T>, item: T, cap: usize) {
    log.insert(0, item);
    log.truncate(cap);
}

/// Start a session task and return its handle. The task ends when every
/// handle is dropped.
pub fn spawn_session(id: String, deps: SessionDeps) -> SessionHandle {
    let (tx, rx) = mpsc::channel(32);
    let state = SessionState::new(id, deps.default_model.clone());
    tokio::spawn(run_session(state, deps, rx));
    SessionHandle { tx }
}

async fn run_session(
    mut state: SessionState,
    deps: SessionDeps,
    mut rx: mpsc::Receiver<SessionCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SessionCommand::ProcessMessage {
                message,
                model,
                respond_to,
            } => {
                let result = process_message(&mut state, &deps, message, model).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::Scrub { text, respond_to } => {
                let outcome = scrub_and_log(&mut state, &deps, &text);
                let _ = respond_to.send(outcome);
            }
            SessionCommand::UploadDocument {
                title,
                category,
                content,
                respond_to,
            } => {
                let document = upload_document(&mut state, &deps, title, category, content);
                let _ = respond_to.send(document);
            }
            SessionCommand::DeleteDocument {
                document_id,
                respond_to,
            } => {
                let removed = delete_document(&mut state, &deps, &document_id);
                let _ = respond_to.send(removed);
            }
            SessionCommand::SyncContext {
                insurance,
                documents,
                respond_to,
            } => {
                if let Some(insurance) = insurance {
                    state.insurance = insurance;
                }
                if let Some(documents) = documents {
                    state.documents = documents;
                }
                state.last_context_sync = Some(Utc::now());
                let _ = respond_to.send(state.snapshot());
            }
            SessionCommand::LookupRate {
                code,
                locality,
                respond_to,
            } => {
                let quote = lookup_rate(&mut state, &deps, &code, locality.as_deref()).await;
                let _ = respond_to.send(quote);
            }
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(state.snapshot());
            }
        }
    }
    tracing::debug!(session_id = %state.id, "session task ended");
}

/// De-identify text and leave the PII_SCRUB compliance entry. Every scrub
/// goes through here, whether it serves a chat turn, a document upload or a
/// standalone call.
fn scrub_and_log(state: &mut SessionState, deps: &SessionDeps, text: &str) -> ScrubOutcome {
    let outcome = deps.scrubber.scrub(text);
    let entry = log_operation(
        "PII_SCRUB",
        &json!({ "text": text }),
        &json!({
            "tokens": outcome.token_map.len(),
            "confidence": outcome.confidence,
        }),
        RiskLevel::Low,
    );
    state.log_compliance(entry, deps.forensic.compliance_log_cap);
    outcome
}

/// A billing signal is a detected 5-digit code plus a currency amount
/// surviving in the redacted text. Best effort: first code, first amount,
/// no co-location check.
fn detect_billing_signal(outcome: &ScrubOutcome) -> Option<(String, f64)> {
    let code = outcome
        .detections
        .iter()
        .find(|d| d.category == PiiCategory::Code5)
        .map(|d| d.value.clone())?;

    let money = Regex::new(r"\$\s?(\d+(?:,\d{3})*(?:\.\d{2})?)").unwrap();
    let amount = money
        .captures(&outcome.redacted_text)?
        .get(1)?
        .as_str()
        .replace(',', "")
        .parse::<f64>()
        .ok()?;

    Some((code, amount))
}

async fn process_message(
    state: &mut SessionState,
    deps: &SessionDeps,
    message: String,
    model_override: Option<String>,
) -> Result<SessionSnapshot, SessionError> {
    let started = Instant::now();

    if let Some(model) = model_override {
        state.model = model;
    }

    let outcome = scrub_and_log(state, deps, &message);

    // Audit before any external call, so the records exist even when the
    // completion fails.
    if let Some((code, amount)) = detect_billing_signal(&outcome) {
        let mut record = audit_claim(
            &code,
            amount,
            &state.insurance,
            &state.benchmarks,
            &deps.forensic,
        );
        let findings = ForensicOutput {
            liability_calc: record.liability,
            confidence_score: record.confidence,
            code_validation: record.baseline > 0.0,
            strategic_disclaimer: "Automated benchmark screen, not a payer determination."
                .to_string(),
            fmv_variance: Some(record.variance),
            dispute_token: None,
            is_overcharge: Some(record.is_overcharge),
        };
        let discrepancy = detect_discrepancies(&state.insurance, &findings, &deps.forensic);
        if discrepancy.has_discrepancy {
            tracing::warn!(
                session_id = %state.id,
                claim_id = %record.claim_id,
                "billing discrepancy escalated"
            );
        }
        record.dispute_token = generate_dispute_token(
            record.variance,
            discrepancy.has_discrepancy,
            state.benchmarks.is_dynamic(&code),
            &deps.forensic,
        );

        let entry = log_operation(
            "CLAIM_AUDIT",
            &json!({ "code": code, "billed": amount }),
            &serde_json::to_value(&record).unwrap_or(Value::Null),
            record.risk,
        );
        state.log_compliance(entry, deps.forensic.compliance_log_cap);
        tracing::info!(
            session_id = %state.id,
            claim_id = %record.claim_id,
            code = %record.code,
            risk = ?record.risk,
            "claim audited"
        );
        push_front_capped(&mut state.audit_logs, record, deps.forensic.audit_log_cap);
        state.metrics.audit_count += 1;
    }

    // History snapshot is taken before the push so the new message rides
    // only in the user slot of the request.
    let request = CompletionRequest {
        model: state.model.clone(),
        history: state.messages.clone(),
        user_message: outcome.redacted_text.clone(),
        documents: state.documents.clone(),
        plan: Some(state.insurance.clone()),
    };

    state.messages.push(ChatMessage::user(outcome.redacted_text));
    state.is_processing = true;

    let reply = deps.completion.complete(&request).await;
    let latency_ms = started.elapsed().as_millis() as f64;
    state.is_processing = false;

    let reply = match reply {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(session_id = %state.id, latency_ms, "completion failed");
            return Err(SessionError::Completion(e.to_string()));
        }
    };

    let (clean, findings) = extract_forensic_payload(&reply.content);
    if let Some(findings) = &findings {
        tracing::info!(
            session_id = %state.id,
            liability = findings.liability_calc,
            validated = findings.code_validation,
            "structured findings in reply"
        );
    }
    state.messages.push(ChatMessage::assistant(clean));

    let turns = state
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::User)
        .count()
        .max(1) as f64;
    state.metrics.worker_latency =
        ((turns - 1.0) * state.metrics.worker_latency + latency_ms) / turns;
    state.metrics.scrub_avg_confidence =
        ((turns - 1.0) * state.metrics.scrub_avg_confidence + outcome.confidence) / turns;

    tracing::info!(
        session_id = %state.id,
        latency_ms,
        messages = state.messages.len(),
        "message processed"
    );

    Ok(state.snapshot())
}

fn upload_document(
    state: &mut SessionState,
    deps: &SessionDeps,
    title: String,
    category: DocumentCategory,
    content: String,
) -> InsuranceDocument {
    let outcome = scrub_and_log(state, deps, &content);

    let document = InsuranceDocument {
        id: Uuid::new_v4().to_string(),
        title,
        category,
        content: outcome.redacted_text,
        upload_date: Utc::now(),
        status: DocumentStatus::Active,
    };

    let entry = log_operation(
        "DOCUMENT_INGEST",
        &json!({ "docId": document.id, "title": document.title, "type": category.label() }),
        &json!({ "stored": true, "redactions": outcome.token_map.len() }),
        RiskLevel::Med,
    );
    state.log_compliance(entry, deps.forensic.compliance_log_cap);
    tracing::info!(
        session_id = %state.id,
        doc_id = %document.id,
        redactions = outcome.token_map.len(),
        "document ingested"
    );

    state.documents.push(document.clone());
    document
}

fn delete_document(state: &mut SessionState, deps: &SessionDeps, document_id: &str) -> bool {
    let before = state.documents.len();
    state.documents.retain(|d| d.id != document_id);
    let removed = state.documents.len() < before;

    let entry = log_operation(
        "DOCUMENT_DELETE",
        &json!({ "docId": document_id }),
        &json!({ "removed": removed }),
        RiskLevel::Low,
    );
    state.log_compliance(entry, deps.forensic.compliance_log_cap);

    removed
}

async fn lookup_rate(
    state: &mut SessionState,
    deps: &SessionDeps,
    code: &str,
    locality: Option<&str>,
) -> Option<RateQuote> {
    let quote = match deps.rates.lookup(code, locality).await {
        Ok(quote) => quote,
        Err(e) => {
            tracing::warn!(session_id = %state.id, code = %code, error = %e, "rate lookup failed");
            None
        }
    };

    if let Some(quote) = &quote {
        state.benchmarks.insert_dynamic(&quote.code, quote.rate);
        tracing::info!(session_id = %state.id, code = %quote.code, "dynamic benchmark installed");
    }

    quote
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionReply;
    use crate::types::{NetworkStatus, PlanType};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockCompletion {
        replies: Mutex<VecDeque<Result<String, String>>>,
    }

    impl MockCompletion {
        fn new(replies: Vec<Result<String, String>>) -> Self {
            MockCompletion {
                replies: Mutex::new(replies.into_iter().collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for MockCompletion {
        async fn complete(&self, _request: &CompletionRequest) -> anyhow::Result<CompletionReply> {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(content)) => Ok(CompletionReply { content }),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Ok(CompletionReply {
                    content: "ack. Next Strategic Step: none.".to_string(),
                }),
            }
        }
    }

    struct MockRates {
        rate: Option<f64>,
    }

    #[async_trait::async_trait]
    impl RateSource for MockRates {
        async fn lookup(
            &self,
            code: &str,
            _locality: Option<&str>,
        ) -> anyhow::Result<Option<RateQuote>> {
            Ok(self.rate.map(|rate| RateQuote {
                code: code.to_string(),
                rate,
                source: Some("https://example.com/fee-schedule".to_string()),
                fetched_at: Utc::now(),
            }))
        }
    }

    fn test_deps_with_config(
        replies: Vec<Result<String, String>>,
        forensic: ForensicConfig,
    ) -> SessionDeps {
        SessionDeps {
            scrubber: Arc::new(ScrubEngine::new("test-key").unwrap()),
            completion: Arc::new(MockCompletion::new(replies)),
            rates: Arc::new(MockRates { rate: None }),
            forensic: Arc::new(forensic),
            default_model: "gpt-4o-mini".to_string(),
        }
    }

    fn test_deps(replies: Vec<Result<String, String>>) -> SessionDeps {
        test_deps_with_config(replies, ForensicConfig::default())
    }

    #[tokio::test]
    async fn test_plain_message_turn() {
        let handle = spawn_session("s-1".to_string(), test_deps(vec![]));
        let snapshot = handle
            .process_message("What does my deductible mean?".to_string(), None)
            .await
            .unwrap();

        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].role, ChatRole::User);
        assert_eq!(snapshot.messages[1].role, ChatRole::Assistant);
        assert!(snapshot.messages[1].content.contains("Next Strategic Step"));
        assert!(!snapshot.is_processing);
        assert!(snapshot.audit_logs.is_empty());
        assert_eq!(snapshot.compliance_logs.len(), 1);
        assert_eq!(snapshot.compliance_logs[0].operation, "PII_SCRUB");
        assert_eq!(snapshot.metrics.audit_count, 0);
        assert!((snapshot.metrics.scrub_avg_confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_billing_message_triggers_audit() {
        let handle = spawn_session("s-2".to_string(), test_deps(vec![]));
        let snapshot = handle
            .process_message("I was billed $300 for CPT 99214".to_string(), None)
            .await
            .unwrap();

        assert_eq!(snapshot.audit_logs.len(), 1);
        let record = &snapshot.audit_logs[0];
        assert_eq!(record.code, "99214");
        assert_eq!(record.billed, 300.0);
        assert_eq!(record.liability, 120.8);
        assert_eq!(record.risk, RiskLevel::High);
        assert!(record
            .dispute_token
            .as_deref()
            .map(|t| t.starts_with("NAV-DS-CRIT-"))
            .unwrap_or(false));

        // Audit entry lands after the scrub entry, so it sits newest-first.
        assert_eq!(snapshot.compliance_logs.len(), 2);
        assert_eq!(snapshot.compliance_logs[0].operation, "CLAIM_AUDIT");
        assert_eq!(snapshot.compliance_logs[1].operation, "PII_SCRUB");

        // The stored user turn only ever holds redacted text.
        let user = &snapshot.messages[0];
        assert!(!user.content.contains("CPT 99214"));
        assert!(user.content.contains("[PSEUDO-"));
        assert!(user.content.contains("$300"));

        assert_eq!(snapshot.metrics.audit_count, 1);
        // One liability-bearing claim cannot establish a spend rate yet.
        assert_eq!(snapshot.burn_rate.daily_burn, 0.0);
    }

    #[tokio::test]
    async fn test_completion_failure_keeps_audit_trail() {
        let handle = spawn_session(
            "s-3".to_string(),
            test_deps(vec![Err("upstream timeout".to_string())]),
        );
        let result = handle
            .process_message("I was billed $300 for CPT 99214".to_string(), None)
            .await;
        assert!(matches!(result, Err(SessionError::Completion(_))));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].role, ChatRole::User);
        assert!(!snapshot.is_processing);
        assert_eq!(snapshot.audit_logs.len(), 1);
        assert_eq!(snapshot.compliance_logs.len(), 2);
    }

    #[tokio::test]
    async fn test_document_upload_stores_redacted_content() {
        let handle = spawn_session("s-4".to_string(), test_deps(vec![]));
        let document = handle
            .upload_document(
                "EOB March".to_string(),
                DocumentCategory::Eob,
                "Member SSN 123-45-6789, allowed amount $92.47".to_string(),
            )
            .await
            .unwrap();

        assert!(!document.content.contains("123-45-6789"));
        assert!(document.content.contains("[PSEUDO-"));
        assert_eq!(document.status, DocumentStatus::Active);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.documents.len(), 1);
        assert_eq!(snapshot.compliance_logs.len(), 2);
        assert_eq!(snapshot.compliance_logs[0].operation, "DOCUMENT_INGEST");
        assert_eq!(snapshot.compliance_logs[1].operation, "PII_SCRUB");
    }

    #[tokio::test]
    async fn test_document_delete_logs_either_way() {
        let handle = spawn_session("s-5".to_string(), test_deps(vec![]));
        let document = handle
            .upload_document(
                "Bill".to_string(),
                DocumentCategory::Bill,
                "plain statement".to_string(),
            )
            .await
            .unwrap();

        assert!(handle.delete_document(document.id.clone()).await.unwrap());
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.documents.is_empty());
        assert_eq!(snapshot.compliance_logs[0].operation, "DOCUMENT_DELETE");

        // A miss still leaves an entry.
        assert!(!handle.delete_document("nope".to_string()).await.unwrap());
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.compliance_logs[0].operation, "DOCUMENT_DELETE");
        assert_eq!(
            snapshot
                .compliance_logs
                .iter()
                .filter(|e| e.operation == "DOCUMENT_DELETE")
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_sync_context_merges_partial_update() {
        let handle = spawn_session("s-6".to_string(), test_deps(vec![]));
        let insurance = InsuranceState {
            deductible_total: 5000.0,
            deductible_used: 0.0,
            oop_max: 9000.0,
            oop_used: 0.0,
            plan_type: Some(PlanType::Hdhp),
            network_status: Some(NetworkStatus::OutOfNetwork),
        };
        let snapshot = handle.sync_context(Some(insurance), None).await.unwrap();

        assert_eq!(snapshot.insurance_state.plan_type, Some(PlanType::Hdhp));
        assert_eq!(snapshot.insurance_state.oop_max, 9000.0);
        assert!(snapshot.documents.is_empty());
        assert!(snapshot.last_context_sync.is_some());
        // Context sync is not a logged operation.
        assert!(snapshot.compliance_logs.is_empty());
    }

    #[tokio::test]
    async fn test_model_override_persists() {
        let handle = spawn_session("s-7".to_string(), test_deps(vec![]));
        let snapshot = handle
            .process_message("hello".to_string(), Some("gpt-4o".to_string()))
            .await
            .unwrap();
        assert_eq!(snapshot.model, "gpt-4o");

        let snapshot = handle.process_message("again".to_string(), None).await.unwrap();
        assert_eq!(snapshot.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_audit_log_cap_keeps_newest() {
        let config = ForensicConfig {
            audit_log_cap: 3,
            ..ForensicConfig::default()
        };
        let handle = spawn_session("s-8".to_string(), test_deps_with_config(vec![], config));

        for amount in [100, 200, 300, 400, 500] {
            handle
                .process_message(format!("Billed ${} for CPT 99214", amount), None)
                .await
                .unwrap();
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.audit_logs.len(), 3);
        assert_eq!(snapshot.audit_logs[0].billed, 500.0);
        assert_eq!(snapshot.audit_logs[2].billed, 300.0);
        assert_eq!(snapshot.metrics.audit_count, 5);

        // Same-day claims span one accounting day: 120.8 + 220.8 + 320.8.
        assert_eq!(snapshot.burn_rate.daily_burn, 662.4);
    }

    #[tokio::test]
    async fn test_metrics_track_running_mean() {
        let handle = spawn_session("s-9".to_string(), test_deps(vec![]));

        // One SSN detection: confidence 0.99.
        handle
            .process_message("My SSN is 987-65-4321.".to_string(), None)
            .await
            .unwrap();
        // Clean text: confidence 1.0.
        let snapshot = handle
            .process_message("Thanks for the help.".to_string(), None)
            .await
            .unwrap();

        assert!((snapshot.metrics.scrub_avg_confidence - 0.995).abs() < 1e-9);
        assert!(snapshot.metrics.worker_latency >= 0.0);
    }

    #[tokio::test]
    async fn test_standalone_scrub_leaves_compliance_entry() {
        let handle = spawn_session("s-10".to_string(), test_deps(vec![]));
        let outcome = handle
            .scrub("Reach me at j.doe@example.com".to_string())
            .await
            .unwrap();

        assert!(!outcome.redacted_text.contains('@'));
        assert_eq!(outcome.token_map.len(), 1);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.compliance_logs.len(), 1);
        assert_eq!(snapshot.compliance_logs[0].operation, "PII_SCRUB");
    }

    #[tokio::test]
    async fn test_compliance_log_cap_evicts_oldest() {
        let config = ForensicConfig {
            compliance_log_cap: 2,
            ..ForensicConfig::default()
        };
        let handle = spawn_session("s-11".to_string(), test_deps_with_config(vec![], config));

        for text in ["first note", "second note", "third note"] {
            handle.scrub(text.to_string()).await.unwrap();
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.compliance_logs.len(), 2);
        assert!(snapshot
            .compliance_logs
            .iter()
            .all(|e| e.operation == "PII_SCRUB"));
        assert!(snapshot.compliance_logs[0].timestamp >= snapshot.compliance_logs[1].timestamp);
    }

    #[tokio::test]
    async fn test_rate_lookup_folds_into_later_audits() {
        let mut deps = test_deps(vec![]);
        deps.rates = Arc::new(MockRates { rate: Some(950.0) });
        let handle = spawn_session("s-12".to_string(), deps);

        let quote = handle.lookup_rate("27447".to_string(), None).await.unwrap();
        assert_eq!(quote.map(|q| q.rate), Some(950.0));

        let snapshot = handle
            .process_message("Billed $2000 for CPT 27447".to_string(), None)
            .await
            .unwrap();

        assert_eq!(snapshot.audit_logs.len(), 1);
        let record = &snapshot.audit_logs[0];
        assert_eq!(record.code, "27447");
        // Learned rate drives the baseline: 950.00 * 1.4.
        assert_eq!(record.baseline, 1330.0);
        assert_eq!(record.liability, 670.0);
        assert!(record
            .dispute_token
            .as_deref()
            .map(|t| t.starts_with("DYN-"))
            .unwrap_or(false));
        assert!(snapshot.benchmarks.contains_key("27447"));
    }

    #[tokio::test]
    async fn test_rate_lookup_miss_leaves_benchmarks_alone() {
        let handle = spawn_session("s-13".to_string(), test_deps(vec![]));

        let quote = handle
            .lookup_rate("27447".to_string(), Some("CA".to_string()))
            .await
            .unwrap();
        assert!(quote.is_none());

        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.benchmarks.contains_key("27447"));
    }

    #[tokio::test]
    async fn test_redacted_amount_skips_audit() {
        // A 5-digit dollar figure redacts like a procedure code, leaving the
        // amount scan nothing to read.
        let handle = spawn_session("s-14".to_string(), test_deps(vec![]));
        let snapshot = handle
            .process_message("Charged $12345.67 for CPT 99214".to_string(), None)
            .await
            .unwrap();

        assert!(snapshot.audit_logs.is_empty());
        assert_eq!(snapshot.metrics.audit_count, 0);
        assert_eq!(snapshot.compliance_logs.len(), 1);
        assert_eq!(snapshot.compliance_logs[0].operation, "PII_SCRUB");
    }
}
