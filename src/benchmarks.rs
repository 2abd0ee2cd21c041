// Fair-market-value benchmark table: static Medicare-derived seed rates
// plus per-session dynamic overrides fetched at runtime

use std::collections::{HashMap, HashSet};

/// Allowed-amount benchmarks keyed by 5-digit procedure code.
///
/// Codes inserted at runtime are tracked separately from the static seed
/// so downstream dispute handling can tell a fetched rate from a vetted one.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkTable {
    rates: HashMap<String, f64>,
    dynamic: HashSet<String>,
}

impl BenchmarkTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table pre-loaded with national allowed amounts for the codes that
    /// dominate outpatient billing disputes.
    pub fn seed_default() -> Self {
        let mut table = Self::empty();
        for (code, rate) in [
            ("99213", 92.47),
            ("99214", 128.00),
            ("99203", 112.84),
            ("99204", 167.40),
            ("80053", 14.39),
            ("85025", 10.61),
            ("71046", 31.28),
            ("93000", 16.67),
            ("97110", 30.36),
            ("36415", 3.00),
        ] {
            table.rates.insert(code.to_string(), rate);
        }
        table
    }

    /// Install or overwrite a runtime-fetched rate. Dynamic rates shadow
    /// the static seed for the same code.
    pub fn insert_dynamic(&mut self, code: &str, rate: f64) {
        self.rates.insert(code.to_string(), rate);
        self.dynamic.insert(code.to_string());
    }

    pub fn rate_for(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }

    pub fn is_dynamic(&self, code: &str) -> bool {
        self.dynamic.contains(code)
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.rates.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_rates() {
        let table = BenchmarkTable::seed_default();
        assert_eq!(table.rate_for("99214"), Some(128.00));
        assert_eq!(table.rate_for("36415"), Some(3.00));
        assert_eq!(table.rate_for("00000"), None);
        assert!(!table.is_dynamic("99214"));
    }

    #[test]
    fn test_dynamic_override_shadows_seed() {
        let mut table = BenchmarkTable::seed_default();
        table.insert_dynamic("99214", 140.50);
        assert_eq!(table.rate_for("99214"), Some(140.50));
        assert!(table.is_dynamic("99214"));
    }

    #[test]
    fn test_dynamic_insert_for_unknown_code() {
        let mut table = BenchmarkTable::empty();
        assert_eq!(table.rate_for("27447"), None);
        table.insert_dynamic("27447", 1352.11);
        assert_eq!(table.rate_for("27447"), Some(1352.11));
        assert!(table.is_dynamic("27447"));
    }
}
