//! Holder concentration
//!
//! Token accounts owned by an off-curve address (a program or PDA, such as a
//! pool vault or a locker) count as locked supply, not as a holder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

use super::types::{
    CheckKind, Findings, HolderDistribution, PartialRisk, RiskWarning, Severity, WarningKind,
};
use super::{RiskCheck, RiskContext};
use crate::chain::{ChainClient, TokenHolder};
use crate::config::RiskConfig;
use crate::error::{Error, Result};

pub struct HolderConcentrationCheck {
    chain: Arc<dyn ChainClient>,
    config: RiskConfig,
}

fn pct(part: u128, total: u128) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / total as f64
}

/// Rank wallet holders and compute supply shares
pub fn distribution(holders: &[TokenHolder]) -> Option<HolderDistribution> {
    let total_supply: u128 = holders.iter().map(|h| h.amount as u128).sum();
    if total_supply == 0 {
        return None;
    }

    // One wallet may hold several token accounts
    let mut by_owner: HashMap<Pubkey, u128> = HashMap::new();
    for holder in holders.iter().filter(|h| h.amount > 0 && h.owner.is_on_curve()) {
        *by_owner.entry(holder.owner).or_default() += holder.amount as u128;
    }

    let mut balances: Vec<u128> = by_owner.into_values().collect();
    balances.sort_unstable_by(|a, b| b.cmp(a));

    let top = |n: usize| -> u128 { balances.iter().take(n).sum() };
    let circulating: u128 = balances.iter().sum();

    Some(HolderDistribution {
        holder_count: balances.len(),
        total_supply,
        top10_pct: pct(top(10), total_supply),
        top50_pct: pct(top(50), total_supply),
        top100_pct: pct(top(100), total_supply),
        circulating_pct: pct(circulating, total_supply),
    })
}

impl HolderConcentrationCheck {
    pub fn new(chain: Arc<dyn ChainClient>, config: &RiskConfig) -> Self {
        Self {
            chain,
            config: config.clone(),
        }
    }

    pub fn evaluate(&self, dist: HolderDistribution) -> PartialRisk {
        let mut warnings = Vec::new();
        let mut penalty: u32 = 0;

        if dist.holder_count < self.config.min_holders {
            penalty += self.config.holder_warning_penalty as u32;
            warnings.push(RiskWarning::new(
                WarningKind::HolderCount,
                Severity::Medium,
                format!(
                    "only {} holders (minimum {})",
                    dist.holder_count, self.config.min_holders
                ),
            ));
        }

        if dist.top10_pct > self.config.max_top_holders_pct {
            warnings.push(RiskWarning::new(
                WarningKind::HolderConcentration,
                Severity::High,
                format!(
                    "top 10 holders own {:.1}% of supply (max {:.1}%)",
                    dist.top10_pct, self.config.max_top_holders_pct
                ),
            ));
        }

        if dist.circulating_pct < self.config.min_circulating_pct {
            penalty += self.config.holder_warning_penalty as u32;
            warnings.push(RiskWarning::new(
                WarningKind::LowCirculation,
                Severity::Medium,
                format!(
                    "circulating supply {:.1}% below {:.1}%",
                    dist.circulating_pct, self.config.min_circulating_pct
                ),
            ));
        }

        let risk = (dist.top10_pct.round() as u32 + penalty).min(100) as u8;

        PartialRisk {
            check: CheckKind::HolderConcentration,
            risk,
            warnings,
            findings: Findings::Holders(dist),
        }
    }
}

#[async_trait]
impl RiskCheck for HolderConcentrationCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::HolderConcentration
    }

    async fn assess(&self, ctx: &RiskContext) -> Result<PartialRisk> {
        let holders = self.chain.get_token_holders(&ctx.token).await?;
        let dist = distribution(&holders).ok_or_else(|| Error::InvalidToken {
            token: ctx.token.to_string(),
            reason: "no circulating supply".to_string(),
        })?;
        Ok(self.evaluate(dist))
    }
}
