//! Position sizing
//!
//! Turns a balance, a token price and the token's risk score into a trade
//! size in token units. Every method produces a quote-denominated value
//! first, which is then converted at `price` and clamped.

use serde::{Deserialize, Serialize};

use crate::config::SizingConfig;
use crate::error::{Error, Result};

/// Sizing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// Fixed share of the available balance
    Fixed,
    /// Risk budget discounted by the risk score
    RiskBased,
    /// Fractional Kelly criterion
    Kelly,
    /// Share of 24h volume, discounted by risk and volatility
    Dynamic,
}

impl std::fmt::Display for SizingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SizingMethod::Fixed => "fixed",
            SizingMethod::RiskBased => "risk_based",
            SizingMethod::Kelly => "kelly",
            SizingMethod::Dynamic => "dynamic",
        };
        write!(f, "{}", name)
    }
}

/// Inputs for one sizing decision
#[derive(Debug, Clone, Default)]
pub struct SizingParams {
    /// Available balance in quote units (SOL)
    pub balance: f64,
    /// Token price in quote units per token
    pub price: f64,
    /// 0..=100
    pub risk_score: u8,
    /// Kelly win probability; falls back to the configured default
    pub win_probability: Option<f64>,
    /// Quote volume over the last 24h
    pub volume_24h: f64,
    /// Relative volatility, 0.0 = flat
    pub volatility: f64,
}

/// Position sizer
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Position size in token units
    pub fn size(&self, method: SizingMethod, params: &SizingParams) -> Result<f64> {
        let min = self.config.min_position_size;
        let max = self.config.max_position_size;

        if !params.price.is_finite() || params.price <= 0.0 {
            return Err(Error::InvalidPositionSize { size: 0.0, min, max });
        }

        // 1. Quote value the method is willing to commit
        let value = self.target_value(method, params).max(0.0);

        // 2. Convert to tokens
        let mut size = value / params.price;

        // 3. Hard caps: token count and quote exposure
        size = size.min(max);
        size = size.min(self.config.max_position_value / params.price);

        // 4. Never round a too-small position up
        if !size.is_finite() || size < min {
            return Err(Error::InvalidPositionSize { size, min, max });
        }

        Ok(size)
    }

    /// Quote-denominated value before conversion and caps
    pub fn target_value(&self, method: SizingMethod, params: &SizingParams) -> f64 {
        let risk_discount = 1.0 - f64::from(params.risk_score.min(100)) / 100.0;

        match method {
            SizingMethod::Fixed => params.balance * self.config.fixed_pct / 100.0,
            SizingMethod::RiskBased => {
                params.balance * self.config.risk_budget_pct / 100.0 * risk_discount
            }
            SizingMethod::Kelly => {
                let p = params
                    .win_probability
                    .unwrap_or(self.config.default_win_probability)
                    .clamp(0.0, 1.0);
                let fraction = kelly_fraction(p, self.config.kelly_win_loss_ratio)
                    * self.config.kelly_fraction;
                params.balance * fraction.clamp(0.0, 1.0)
            }
            SizingMethod::Dynamic => {
                params.volume_24h * self.config.volume_fraction * risk_discount
                    / (1.0 + params.volatility.max(0.0))
            }
        }
    }
}

/// Full Kelly fraction `(b·p − q) / b`; negative means no edge
pub fn kelly_fraction(win_probability: f64, win_loss_ratio: f64) -> f64 {
    if win_loss_ratio <= 0.0 {
        return 0.0;
    }
    let q = 1.0 - win_probability;
    (win_loss_ratio * win_probability - q) / win_loss_ratio
}
