//! Buy/sell tax measurement

use async_trait::async_trait;

use super::probe::Leg;
use super::types::{CheckKind, Findings, PartialRisk, RiskWarning, Severity, WarningKind};
use super::{RiskCheck, RiskContext};
use crate::config::RiskConfig;
use crate::error::{Error, Result};

pub struct TaxCheck {
    full_scale_bps: u64,
    max_acceptable_bps: u64,
}

impl TaxCheck {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            full_scale_bps: ((config.tax_full_scale_pct * 100.0) as u64).max(1),
            max_acceptable_bps: (config.max_acceptable_tax_pct * 100.0) as u64,
        }
    }

    /// 0-100, saturating at the full-scale tax
    pub fn tax_risk(&self, worst_bps: u64) -> u8 {
        (worst_bps.saturating_mul(100) / self.full_scale_bps).min(100) as u8
    }

    fn warning(&self, side: &str, bps: u64) -> Option<RiskWarning> {
        if bps <= self.max_acceptable_bps {
            return None;
        }
        let severity = if bps > self.max_acceptable_bps * 2 {
            Severity::High
        } else {
            Severity::Medium
        };
        Some(RiskWarning::new(
            WarningKind::Tax,
            severity,
            format!(
                "{} tax {:.2}% exceeds {:.2}%",
                side,
                bps as f64 / 100.0,
                self.max_acceptable_bps as f64 / 100.0
            ),
        ))
    }
}

#[async_trait]
impl RiskCheck for TaxCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Tax
    }

    async fn assess(&self, ctx: &RiskContext) -> Result<PartialRisk> {
        let pool = ctx
            .pool
            .as_ref()
            .ok_or_else(|| Error::Internal("no pool state available".to_string()))?;

        let trip = ctx.round_trip.get(pool, &ctx.token).await?;

        let buy_bps = trip.buy.tax_bps();
        // Nothing bought means nothing can be sold back
        let sell_bps = trip.sell.as_ref().map_or(10_000, Leg::tax_bps);

        let warnings = [self.warning("buy", buy_bps), self.warning("sell", sell_bps)]
            .into_iter()
            .flatten()
            .collect();

        Ok(PartialRisk {
            check: CheckKind::Tax,
            risk: self.tax_risk(buy_bps.max(sell_bps)),
            warnings,
            findings: Findings::Tax {
                buy_tax_pct: buy_bps as f64 / 100.0,
                sell_tax_pct: sell_bps as f64 / 100.0,
            },
        })
    }
}
