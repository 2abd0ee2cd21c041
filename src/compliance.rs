// Compliance trail: every sensitive operation leaves a record carrying
// digests of its inputs and outcome, never the values themselves

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::RiskLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceMetadata {
    pub env: String,
    pub version: String,
}

/// One entry in the compliance trail. Arguments and outcomes are stored
/// only as SHA-256 digests of their canonical JSON, so the trail can prove
/// what was processed without retaining it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub args_hash: String,
    pub outcome_hash: String,
    pub risk_level: RiskLevel,
    pub metadata: ComplianceMetadata,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Record one operation. Identical inputs always produce identical digests
/// (JSON objects serialize with sorted keys), while id and timestamp stay
/// unique per occurrence.
pub fn log_operation(
    operation: &str,
    args: &Value,
    outcome: &Value,
    risk_level: RiskLevel,
) -> ComplianceLogEntry {
    ComplianceLogEntry {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        operation: operation.to_string(),
        args_hash: sha256_hex(args.to_string().as_bytes()),
        outcome_hash: sha256_hex(outcome.to_string().as_bytes()),
        risk_level,
        metadata: ComplianceMetadata {
            env: "production".to_string(),
            version: "2.4-PURE".to_string(),
        },
    }
}
