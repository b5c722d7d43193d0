//! Honeypot detection
//!
//! A token is a honeypot when a small buy or the sell of its proceeds cannot
//! clear, or when the round trip loses more than the tax ceiling.

use async_trait::async_trait;

use super::probe::Leg;
use super::types::{CheckKind, Findings, PartialRisk, RiskWarning, Severity, WarningKind};
use super::{RiskCheck, RiskContext};
use crate::config::RiskConfig;
use crate::error::{Error, Result};

pub struct HoneypotCheck {
    tax_ceiling_bps: u64,
}

impl HoneypotCheck {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            tax_ceiling_bps: (config.honeypot_tax_ceiling_pct * 100.0) as u64,
        }
    }

    fn honeypot(message: String) -> PartialRisk {
        PartialRisk {
            check: CheckKind::Honeypot,
            risk: 100,
            warnings: vec![RiskWarning::new(WarningKind::Honeypot, Severity::Critical, message)],
            findings: Findings::Honeypot { is_honeypot: true },
        }
    }
}

#[async_trait]
impl RiskCheck for HoneypotCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Honeypot
    }

    async fn assess(&self, ctx: &RiskContext) -> Result<PartialRisk> {
        let pool = ctx
            .pool
            .as_ref()
            .ok_or_else(|| Error::Internal("no pool state available".to_string()))?;

        let trip = ctx.round_trip.get(pool, &ctx.token).await?;

        if let Leg::Failed(reason) = &trip.buy {
            return Ok(Self::honeypot(format!("buy simulation failed: {}", reason)));
        }

        match &trip.sell {
            Some(Leg::Filled { .. }) => {}
            Some(Leg::Failed(reason)) => {
                return Ok(Self::honeypot(format!("sell simulation failed: {}", reason)));
            }
            None => {
                return Ok(Self::honeypot("sell simulation failed: nothing to sell".to_string()));
            }
        }

        let worst_bps = trip
            .buy
            .tax_bps()
            .max(trip.sell.as_ref().map_or(0, Leg::tax_bps));
        if worst_bps > self.tax_ceiling_bps {
            return Ok(Self::honeypot(format!(
                "realized tax {:.2}% exceeds {:.2}% ceiling",
                worst_bps as f64 / 100.0,
                self.tax_ceiling_bps as f64 / 100.0
            )));
        }

        Ok(PartialRisk {
            check: CheckKind::Honeypot,
            risk: 0,
            warnings: vec![],
            findings: Findings::Honeypot { is_honeypot: false },
        })
    }
}
