//! Weighted risk score

use crate::config::RiskConfig;

/// Score weights for the four components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub honeypot: f64,
    pub tax: f64,
    pub ownership: f64,
    pub holders: f64,
}

impl From<&RiskConfig> for Weights {
    fn from(config: &RiskConfig) -> Self {
        Self {
            honeypot: config.honeypot_weight,
            tax: config.tax_weight,
            ownership: config.ownership_weight,
            holders: config.holder_weight,
        }
    }
}

impl Default for Weights {
    fn default() -> Self {
        Weights::from(&RiskConfig::default())
    }
}

/// Component risks, each 0-100
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Components {
    pub honeypot: u8,
    pub tax: u8,
    pub ownership: u8,
    pub holders: u8,
}

/// Combine component risks into a 0-100 score.
///
/// A confirmed honeypot pins the score at the largest contribution the
/// honeypot component can make (`honeypot weight × 100`), whatever the other
/// components say.
pub fn weighted_score(components: Components, weights: &Weights, is_honeypot: bool) -> u8 {
    if is_honeypot {
        return (weights.honeypot * 100.0).round().clamp(0.0, 100.0) as u8;
    }

    let raw = components.honeypot.min(100) as f64 * weights.honeypot
        + components.tax.min(100) as f64 * weights.tax
        + components.ownership.min(100) as f64 * weights.ownership
        + components.holders.min(100) as f64 * weights.holders;

    raw.round().clamp(0.0, 100.0) as u8
}
