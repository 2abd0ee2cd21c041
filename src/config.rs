// Forensic thresholds and environment-driven service settings

use std::env;

use thiserror::Error;

/// Valuation constants carried as data so thresholds can be revisited per
/// plan type or jurisdiction without touching the engine.
#[derive(Debug, Clone)]
pub struct ForensicConfig {
    /// Acceptable ceiling above the raw benchmark (1.4 = 140%).
    pub baseline_multiplier: f64,
    /// Variance at or above this is HIGH risk.
    pub high_variance_threshold: f64,
    /// Variance at or above this is MED risk.
    pub med_variance_threshold: f64,
    /// Below this variance no dispute token is issued (absent a bridge flag).
    pub dispute_token_floor: f64,
    /// Above this variance the claim phase moves to DISPUTE.
    pub dispute_phase_floor: f64,
    /// Above this variance a dynamically sourced rate earns the DYN- prefix.
    pub dynamic_prefix_floor: f64,
    /// Liability floor (dollars) for the PPO network-schedule discrepancy rule.
    pub discrepancy_liability_floor: f64,
    /// Variance floor (percent) for the PPO network-schedule discrepancy rule.
    pub discrepancy_variance_floor: f64,
    pub audit_log_cap: usize,
    pub compliance_log_cap: usize,
    pub scrub_max_len: usize,
}

impl Default for ForensicConfig {
    fn default() -> Self {
        ForensicConfig {
            baseline_multiplier: 1.4,
            high_variance_threshold: 40.0,
            med_variance_threshold: 25.0,
            dispute_token_floor: 10.0,
            dispute_phase_floor: 10.0,
            dynamic_prefix_floor: 20.0,
            discrepancy_liability_floor: 500.0,
            discrepancy_variance_floor: 30.0,
            audit_log_cap: 50,
            compliance_log_cap: 512,
            scrub_max_len: 5000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("NAVIGATOR_SCRUB_KEY is not set; refusing to start without a de-identification key")]
    MissingScrubKey,
}

/// Runtime settings for the server binary, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    /// Secret key for deterministic pseudonyms. Required: the service fails
    /// closed at boot rather than scrub with a weak default.
    pub scrub_key: String,
    pub completion_base_url: String,
    pub completion_api_key: String,
    pub default_model: String,
    pub pricing_endpoint: String,
    pub pricing_api_key: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let scrub_key = env::var("NAVIGATOR_SCRUB_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingScrubKey)?;

        Ok(ServiceConfig {
            port: env::var("NAVIGATOR_HTTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3001),
            scrub_key,
            completion_base_url: env::var("NAVIGATOR_AI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            completion_api_key: env::var("NAVIGATOR_AI_API_KEY").unwrap_or_default(),
            default_model: env::var("NAVIGATOR_DEFAULT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            pricing_endpoint: env::var("NAVIGATOR_PRICING_URL")
                .unwrap_or_else(|_| "https://serpapi.com/search".to_string()),
            pricing_api_key: env::var("SERPAPI_KEY").ok().filter(|k| !k.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = ForensicConfig::default();
        assert_eq!(config.baseline_multiplier, 1.4);
        assert_eq!(config.high_variance_threshold, 40.0);
        assert_eq!(config.med_variance_threshold, 25.0);
        assert_eq!(config.dispute_token_floor, 10.0);
        assert_eq!(config.audit_log_cap, 50);
    }
}
