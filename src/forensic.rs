// Forensic valuation engine: fair-market-value assessment, claim audits,
// dispute token issuance, discrepancy escalation, and burn-rate projection

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::benchmarks::BenchmarkTable;
use crate::config::ForensicConfig;
use crate::types::{InsuranceState, NetworkStatus, PlanType, RiskLevel};

/// Fair-market-value verdict for a single billed amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FmvAssessment {
    pub variance: f64,
    pub baseline: f64,
    pub is_overcharge: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditPhase {
    PreService,
    PostService,
    Dispute,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Unbundled,
    Overcharge,
    NsaProtected,
    FmvMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One audited claim line, as surfaced to clients and the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub claim_id: String,
    pub code: String,
    pub billed: f64,
    pub liability: f64,
    pub baseline: f64,
    pub variance: f64,
    pub is_overcharge: bool,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub result: AuditResult,
    pub phase: AuditPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_token: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Structured findings block, either computed locally or recovered from a
/// completion payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForensicOutput {
    #[serde(default)]
    pub liability_calc: f64,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub code_validation: bool,
    #[serde(default)]
    pub strategic_disclaimer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmv_variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_overcharge: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscrepancyReport {
    pub has_discrepancy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub daily_burn: f64,
    pub projected_oop_max_date: DateTime<Utc>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn random_uppercase(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

pub fn end_of_current_year() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(now)
}

/// Compare a billed amount against the benchmark-derived commercial
/// baseline (benchmark rate times the configured multiplier).
///
/// A code with no benchmark yields a zeroed verdict at 0.2 confidence
/// rather than an error; the caller decides whether to chase a rate.
/// Variance is computed against the unrounded baseline, then rounded.
pub fn calculate_fmv(
    code: &str,
    billed: f64,
    benchmarks: &BenchmarkTable,
    config: &ForensicConfig,
) -> FmvAssessment {
    let rate = match benchmarks.rate_for(code) {
        Some(rate) => rate,
        None => {
            return FmvAssessment {
                variance: 0.0,
                baseline: 0.0,
                is_overcharge: false,
                confidence: 0.2,
            }
        }
    };

    let baseline = rate * config.baseline_multiplier;
    let variance = round2((billed - baseline) / baseline * 100.0);

    FmvAssessment {
        variance,
        baseline: round2(baseline),
        is_overcharge: variance > 0.0,
        confidence: 0.95,
    }
}

/// Variance-to-risk mapping. Both thresholds are inclusive.
pub fn classify_risk(variance: f64, config: &ForensicConfig) -> RiskLevel {
    if variance >= config.high_variance_threshold {
        RiskLevel::High
    } else if variance >= config.med_variance_threshold {
        RiskLevel::Med
    } else {
        RiskLevel::Low
    }
}

/// Full audit of one claim line against the plan and benchmark table.
///
/// PPO out-of-network claims are classified NSA_PROTECTED unconditionally;
/// federal balance-billing protection outranks the variance verdict in
/// both directions. Liability stays zero when no benchmark was found, so
/// an unverifiable baseline never feeds downstream exposure math.
pub fn audit_claim(
    code: &str,
    billed: f64,
    plan: &InsuranceState,
    benchmarks: &BenchmarkTable,
    config: &ForensicConfig,
) -> AuditRecord {
    let fmv = calculate_fmv(code, billed, benchmarks, config);
    let risk = classify_risk(fmv.variance, config);

    let nsa_protected = plan.plan_type == Some(PlanType::Ppo)
        && plan.network_status == Some(NetworkStatus::OutOfNetwork);
    let result = if nsa_protected {
        AuditResult::NsaProtected
    } else if fmv.is_overcharge {
        AuditResult::Overcharge
    } else {
        AuditResult::FmvMatch
    };

    let phase = if fmv.variance > config.dispute_phase_floor {
        AuditPhase::Dispute
    } else {
        AuditPhase::PostService
    };

    let liability = if fmv.baseline > 0.0 {
        round2((billed - fmv.baseline).max(0.0))
    } else {
        0.0
    };

    AuditRecord {
        claim_id: format!("CLM-{}", random_uppercase(6)),
        code: code.to_string(),
        billed,
        liability,
        baseline: fmv.baseline,
        variance: fmv.variance,
        is_overcharge: fmv.is_overcharge,
        confidence: fmv.confidence,
        risk,
        result,
        phase,
        dispute_token: None,
        timestamp: Utc::now(),
    }
}

/// Issue a dispute reference token, or decline when the variance is below
/// the dispute floor and no bridge override applies.
///
/// Token grammar: optional `DYN-` mark (dynamic benchmark at meaningful
/// variance), a severity prefix, and a random 4-character suffix.
pub fn generate_dispute_token(
    variance: f64,
    bridge: bool,
    dynamic_rate: bool,
    config: &ForensicConfig,
) -> Option<String> {
    if variance < config.dispute_token_floor && !bridge {
        return None;
    }

    let prefix = if bridge {
        "BRIDGE-DS"
    } else if variance >= config.high_variance_threshold {
        "NAV-DS-CRIT"
    } else {
        "NAV-DS-STD"
    };
    let dynamic_mark = if dynamic_rate && variance > config.dynamic_prefix_floor {
        "DYN-"
    } else {
        ""
    };

    Some(format!("{}{}-{}", dynamic_mark, prefix, random_uppercase(4)))
}

/// Scan a findings block for conditions that must escalate. One clause per
/// escalation rule.
pub fn detect_discrepancies(
    plan: &InsuranceState,
    output: &ForensicOutput,
    config: &ForensicConfig,
) -> DiscrepancyReport {
    let ppo_high_exposure = plan.plan_type == Some(PlanType::Ppo)
        && output.liability_calc > config.discrepancy_liability_floor
        && output.fmv_variance.unwrap_or(0.0) > config.discrepancy_variance_floor;

    if ppo_high_exposure {
        return DiscrepancyReport {
            has_discrepancy: true,
            reason: Some(format!(
                "PPO plan exposed to ${:.2} liability with FMV variance above {:.0}%",
                output.liability_calc, config.discrepancy_variance_floor
            )),
            severity: Severity::Critical,
        };
    }

    DiscrepancyReport {
        has_discrepancy: false,
        reason: None,
        severity: Severity::Info,
    }
}

/// Project when accumulated liability will exhaust the out-of-pocket
/// maximum, from the observed daily spend across audited claims.
///
/// Needs at least two liability-bearing claims to establish a spend rate;
/// otherwise reports zero burn and December 31 of the current year.
pub fn calculate_burn_rate(entries: &[AuditRecord], oop_max: f64) -> BurnRate {
    let liable: Vec<&AuditRecord> = entries.iter().filter(|e| e.liability > 0.0).collect();
    let default_date = end_of_current_year();

    if liable.len() < 2 {
        return BurnRate {
            daily_burn: 0.0,
            projected_oop_max_date: default_date,
        };
    }

    let total: f64 = liable.iter().map(|e| e.liability).sum();
    let earliest = liable
        .iter()
        .map(|e| e.timestamp)
        .min()
        .unwrap_or_else(Utc::now);
    let latest = liable
        .iter()
        .map(|e| e.timestamp)
        .max()
        .unwrap_or_else(Utc::now);
    let span_days = (latest - earliest).num_days().max(1);
    let daily_burn = total / span_days as f64;

    if daily_burn <= 0.0 {
        return BurnRate {
            daily_burn: 0.0,
            projected_oop_max_date: default_date,
        };
    }

    let headroom = (oop_max - total).max(0.0);
    // A slow burn against a large maximum projects dates beyond what chrono
    // can represent; out-of-range dates collapse to the year-end cap.
    let days_left = (headroom / daily_burn) as i64;
    let projected = Duration::try_days(days_left)
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .map_or(default_date, |date| date.min(default_date));

    BurnRate {
        daily_burn: round2(daily_burn),
        projected_oop_max_date: projected,
    }
}
