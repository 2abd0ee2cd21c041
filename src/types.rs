// Shared type definitions for the forensic audit service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON envelope used by every HTTP route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanType {
    Ppo,
    Hmo,
    Hdhp,
    Epo,
}

impl PlanType {
    pub fn label(&self) -> &'static str {
        match self {
            PlanType::Ppo => "PPO",
            PlanType::Hmo => "HMO",
            PlanType::Hdhp => "HDHP",
            PlanType::Epo => "EPO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    #[serde(rename = "Preferred")]
    Preferred,
    #[serde(rename = "In-Network")]
    InNetwork,
    #[serde(rename = "Out-of-Network")]
    OutOfNetwork,
}

impl NetworkStatus {
    pub fn label(&self) -> &'static str {
        match self {
            NetworkStatus::Preferred => "Preferred",
            NetworkStatus::InNetwork => "In-Network",
            NetworkStatus::OutOfNetwork => "Out-of-Network",
        }
    }
}

/// Plan facts read by the valuation engine as audit context.
/// used > total is tolerated and surfaced, never rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceState {
    pub deductible_total: f64,
    pub deductible_used: f64,
    pub oop_max: f64,
    pub oop_used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<PlanType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_status: Option<NetworkStatus>,
}

impl InsuranceState {
    /// Starter plan seeded into every new session until the client syncs
    /// real policy data.
    pub fn default_plan() -> Self {
        InsuranceState {
            deductible_total: 3000.0,
            deductible_used: 1350.0,
            oop_max: 6500.0,
            oop_used: 2100.0,
            plan_type: Some(PlanType::Ppo),
            network_status: Some(NetworkStatus::InNetwork),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentCategory {
    Sbc,
    Eoc,
    Eob,
    Formulary,
    Bill,
}

impl DocumentCategory {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentCategory::Sbc => "SBC",
            DocumentCategory::Eoc => "EOC",
            DocumentCategory::Eob => "EOB",
            DocumentCategory::Formulary => "FORMULARY",
            DocumentCategory::Bill => "BILL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Parsing,
    Active,
    Verified,
}

/// Stored content is always post-redaction; never mutated after upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceDocument {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub category: DocumentCategory,
    pub content: String,
    pub upload_date: DateTime<Utc>,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub worker_latency: f64,
    pub audit_count: u64,
    pub scrub_avg_confidence: f64,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        SystemMetrics {
            worker_latency: 0.0,
            audit_count: 0,
            scrub_avg_confidence: 0.98,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_status_wire_names() {
        let json = serde_json::to_string(&NetworkStatus::OutOfNetwork).unwrap();
        assert_eq!(json, "\"Out-of-Network\"");
        let back: NetworkStatus = serde_json::from_str("\"In-Network\"").unwrap();
        assert_eq!(back, NetworkStatus::InNetwork);
    }

    #[test]
    fn test_plan_type_wire_names() {
        assert_eq!(serde_json::to_string(&PlanType::Ppo).unwrap(), "\"PPO\"");
        assert_eq!(serde_json::to_string(&PlanType::Hdhp).unwrap(), "\"HDHP\"");
    }

    #[test]
    fn test_api_response_skips_empty_fields() {
        let ok: ApiResponse<u32> = ApiResponse::ok(7);
        let json = serde_json::to_string(&ok).unwrap();
        assert_eq!(json, "{\"success\":true,\"data\":7}");

        let err: ApiResponse<u32> = ApiResponse::err("nope");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"error\":\"nope\""));
        assert!(!json.contains("data"));
    }

    #[test]
    fn test_insurance_state_camel_case() {
        let plan = InsuranceState::default_plan();
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"deductibleTotal\":3000.0"));
        assert!(json.contains("\"oopMax\":6500.0"));
        assert!(json.contains("\"networkStatus\":\"In-Network\""));
    }
}
