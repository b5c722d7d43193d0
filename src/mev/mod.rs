//! MEV protection
//!
//! Classifies recent pool activity for sandwich, front-run and back-run
//! patterns and scales the priority fee, slippage and send delay one tier per
//! risk level. Only reads chain data; it never submits anything.

pub mod detector;
pub mod gas;

use std::sync::Arc;

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

use crate::chain::{ChainClient, ObservedSwap, TradeSide};
use crate::config::MevConfig;
use crate::error::Result;
use crate::pool::{PoolState, SwapQuote};

pub use detector::{MevPattern, PatternKind};
pub use gas::GasEstimate;

use detector::{detect, DetectorParams};
use gas::mean_fee;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MevRiskLevel {
    Low,
    Medium,
    High,
}

/// Fixed response for one risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub fee_multiplier: u64,
    /// Slippage scale in percent
    pub slippage_pct: u64,
    pub delay_ms: u64,
}

impl MevRiskLevel {
    pub fn tier(&self) -> Tier {
        match self {
            MevRiskLevel::Low => Tier {
                fee_multiplier: 1,
                slippage_pct: 100,
                delay_ms: 0,
            },
            MevRiskLevel::Medium => Tier {
                fee_multiplier: 2,
                slippage_pct: 125,
                delay_ms: 200,
            },
            MevRiskLevel::High => Tier {
                fee_multiplier: 3,
                slippage_pct: 150,
                delay_ms: 500,
            },
        }
    }

    /// One level up, saturating at High
    pub fn escalate(&self) -> Self {
        match self {
            MevRiskLevel::Low => MevRiskLevel::Medium,
            MevRiskLevel::Medium | MevRiskLevel::High => MevRiskLevel::High,
        }
    }
}

impl std::fmt::Display for MevRiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MevRiskLevel::Low => write!(f, "low"),
            MevRiskLevel::Medium => write!(f, "medium"),
            MevRiskLevel::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MevAssessment {
    pub risk_level: MevRiskLevel,
    pub sandwich_detected: bool,
    pub front_run_detected: bool,
    pub back_run_detected: bool,
    pub patterns: Vec<MevPattern>,
    pub network_priority_fee: u64,
    pub recommended_priority_fee: u64,
    pub recommended_slippage_bps: u16,
    pub recommended_delay_ms: u64,
    pub warnings: Vec<String>,
}

impl MevAssessment {
    pub fn count(&self, kind: PatternKind) -> usize {
        self.patterns.iter().filter(|p| p.kind == kind).count()
    }

    /// Re-derive the recommendations for a new level
    fn apply_level(&mut self, level: MevRiskLevel, gas: &GasEstimate, slippage_bps: u16) {
        let tier = level.tier();
        self.risk_level = level;
        self.recommended_priority_fee = gas
            .priority_fee
            .saturating_mul(tier.fee_multiplier)
            .min(gas.ceiling);
        self.recommended_slippage_bps =
            (slippage_bps as u64 * tier.slippage_pct / 100).min(10_000) as u16;
        self.recommended_delay_ms = tier.delay_ms;
    }
}

/// The swap about to be sent
#[derive(Debug, Clone)]
pub struct IntendedSwap {
    pub payer: Pubkey,
    pub token: Pubkey,
    pub quote: SwapQuote,
}

impl IntendedSwap {
    /// Pending buy placed at the tip of the window
    fn as_observed(&self, slot: u64) -> ObservedSwap {
        ObservedSwap {
            signature: "pending".to_string(),
            slot,
            payer: self.payer,
            side: TradeSide::Buy,
            token_amount: self.quote.amount_out,
            quote_amount: self.quote.amount_in,
            priority_fee: 0,
        }
    }
}

pub struct MevProtector {
    chain: Arc<dyn ChainClient>,
    config: MevConfig,
    params: DetectorParams,
}

impl MevProtector {
    pub fn new(chain: Arc<dyn ChainClient>, config: &MevConfig) -> Self {
        Self {
            chain,
            params: DetectorParams::from(config),
            config: config.clone(),
        }
    }

    /// Classify a slot-ordered window and recommend fee, slippage and delay
    pub fn classify(
        &self,
        window: &[ObservedSwap],
        gas: &GasEstimate,
        slippage_bps: u16,
    ) -> MevAssessment {
        let patterns = detect(window, &self.params);

        let count = |kind| patterns.iter().filter(|p| p.kind == kind).count();
        let sandwiches = count(PatternKind::Sandwich);
        let front_runs = count(PatternKind::FrontRun);
        let back_runs = count(PatternKind::BackRun);

        let level = if sandwiches >= self.config.high_pattern_count {
            MevRiskLevel::High
        } else if sandwiches + front_runs + back_runs > 0 {
            MevRiskLevel::Medium
        } else {
            MevRiskLevel::Low
        };

        let mut warnings = Vec::new();
        if sandwiches > 0 {
            warnings.push(format!(
                "{} sandwich pattern(s) in the last {} swaps",
                sandwiches,
                window.len()
            ));
        }
        if front_runs > 0 {
            warnings.push(format!("{} front-run pattern(s) detected", front_runs));
        }
        if back_runs > 0 {
            warnings.push(format!("{} back-run pattern(s) detected", back_runs));
        }
        if gas.exceeds_ceiling() {
            warnings.push(format!(
                "network priority fee {} above ceiling {}",
                gas.network_mean, gas.ceiling
            ));
        }

        let mut assessment = MevAssessment {
            risk_level: level,
            sandwich_detected: sandwiches > 0,
            front_run_detected: front_runs > 0,
            back_run_detected: back_runs > 0,
            patterns,
            network_priority_fee: gas.network_mean,
            recommended_priority_fee: 0,
            recommended_slippage_bps: 0,
            recommended_delay_ms: 0,
            warnings,
        };
        assessment.apply_level(level, gas, slippage_bps);
        assessment
    }

    /// Classify recent pool activity with the intended swap appended.
    ///
    /// Only swaps within `max_block_age` slots of the newest one are
    /// considered. A large intended swap into an actively sandwiched pool
    /// escalates one tier.
    pub async fn assess_bundle(
        &self,
        pool: &PoolState,
        intended: &IntendedSwap,
        max_block_age: u64,
        gas: &GasEstimate,
        slippage_bps: u16,
    ) -> Result<MevAssessment> {
        let mut window = self
            .chain
            .get_recent_swaps(pool, &intended.token, self.config.window_size)
            .await?;

        let tip = window.iter().map(|s| s.slot).max().unwrap_or(0);
        window.retain(|s| s.slot.saturating_add(max_block_age) >= tip);
        window.push(intended.as_observed(tip));

        let mut assessment = self.classify(&window, gas, slippage_bps);

        let intended_impact = intended.quote.price_impact_bps;
        if assessment.sandwich_detected && intended_impact >= self.config.impact_threshold_bps {
            let escalated = assessment.risk_level.escalate();
            if escalated != assessment.risk_level {
                assessment.warnings.push(format!(
                    "intended swap impact {} bps is a sandwich target",
                    intended_impact
                ));
                assessment.apply_level(escalated, gas, slippage_bps);
            }
        }

        info!(
            "MEV assessment for pool {}: level={} sandwiches={} fee={} slippage={}bps delay={}ms",
            pool.address,
            assessment.risk_level,
            assessment.count(PatternKind::Sandwich),
            assessment.recommended_priority_fee,
            assessment.recommended_slippage_bps,
            assessment.recommended_delay_ms
        );

        Ok(assessment)
    }

    /// Mean recent prioritization fee on the pool, clamped to `[floor, ceiling]`
    pub async fn optimize_gas(&self, pool: &PoolState, floor: u64, ceiling: u64) -> Result<GasEstimate> {
        let fees = self.chain.get_recent_priority_fees(&[pool.address]).await?;
        let estimate = GasEstimate::from_mean(mean_fee(&fees), floor, ceiling);
        debug!(
            "Priority fees for {}: samples={} mean={} bid={}",
            pool.address,
            fees.len(),
            estimate.network_mean,
            estimate.priority_fee
        );
        Ok(estimate)
    }
}
