//! Contract risk analysis
//!
//! Four independent sub-checks run concurrently against fresh chain data and
//! are folded into one 0-100 score by [`scoring::weighted_score`]. A check
//! that errors or times out is replaced by a conservative degraded result;
//! it never reads as safe.

pub mod cache;
pub mod holders;
pub mod honeypot;
pub mod ownership;
mod probe;
pub mod scoring;
pub mod tax;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::config::RiskConfig;
use crate::error::Result;
use crate::pool::{PoolState, PoolStateCodec};

pub use cache::RiskCache;
pub use types::{
    CheckKind, Findings, HolderDistribution, PartialRisk, RiskAssessment, RiskWarning, Severity,
    WarningKind,
};

use holders::HolderConcentrationCheck;
use honeypot::HoneypotCheck;
use ownership::OwnershipCheck;
use probe::SharedRoundTrip;
use scoring::{weighted_score, Components, Weights};
use tax::TaxCheck;

/// Inputs shared by every sub-check
pub struct RiskContext {
    pub token: Pubkey,
    /// Freshly read pool, `None` when unavailable
    pub pool: Option<PoolState>,
    /// Buy-then-sell dry run, run at most once per assessment
    round_trip: SharedRoundTrip,
}

/// One risk sub-check
#[async_trait]
pub trait RiskCheck: Send + Sync {
    fn kind(&self) -> CheckKind;

    async fn assess(&self, ctx: &RiskContext) -> Result<PartialRisk>;
}

/// Runs the four sub-checks and composes the assessment
pub struct RiskAnalyzer {
    chain: Arc<dyn ChainClient>,
    codec: PoolStateCodec,
    cache: Arc<RiskCache>,
    weights: Weights,
    check_timeout: Duration,
    degraded_risk: u8,
    probe_cap: u64,
    honeypot: HoneypotCheck,
    tax: TaxCheck,
    ownership: OwnershipCheck,
    holders: HolderConcentrationCheck,
}

impl RiskAnalyzer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        codec: PoolStateCodec,
        config: &RiskConfig,
        cache: Arc<RiskCache>,
    ) -> Self {
        Self {
            honeypot: HoneypotCheck::new(config),
            tax: TaxCheck::new(config),
            ownership: OwnershipCheck::new(chain.clone(), config),
            holders: HolderConcentrationCheck::new(chain.clone(), config),
            chain,
            codec,
            cache,
            weights: Weights::from(config),
            check_timeout: Duration::from_millis(config.check_timeout_ms),
            degraded_risk: config.degraded_risk,
            probe_cap: config.honeypot_probe_lamports,
        }
    }

    pub fn cache(&self) -> &Arc<RiskCache> {
        &self.cache
    }

    /// Cached assessment if still fresh, otherwise a new one
    pub async fn analyze(&self, token: &Pubkey, pool: Option<&Pubkey>) -> Arc<RiskAssessment> {
        if let Some(cached) = self.cache.get(token) {
            debug!("Risk cache hit for {}", token);
            return cached;
        }
        self.analyze_fresh(token, pool).await
    }

    /// Always recompute, replacing the cached assessment
    pub async fn analyze_fresh(&self, token: &Pubkey, pool: Option<&Pubkey>) -> Arc<RiskAssessment> {
        let pool_state = match pool {
            Some(address) => self.read_pool(address).await,
            None => None,
        };
        let assessment = Arc::new(self.assess(*token, pool_state).await);
        self.cache.insert(assessment.clone());
        assessment
    }

    /// Assess against an already-read pool snapshot, bypassing the cache
    pub async fn assess(&self, token: Pubkey, pool: Option<PoolState>) -> RiskAssessment {
        let pool_address = pool.as_ref().map(|p| p.address);
        let ctx = RiskContext {
            token,
            pool,
            round_trip: SharedRoundTrip::new(self.chain.clone(), self.probe_cap),
        };

        let (honeypot, tax, ownership, holders) = tokio::join!(
            self.run_check(&self.honeypot, &ctx),
            self.run_check(&self.tax, &ctx),
            self.run_check(&self.ownership, &ctx),
            self.run_check(&self.holders, &ctx),
        );

        let assessment = compose(token, pool_address, [honeypot, tax, ownership, holders], &self.weights);

        info!(
            "Risk for {}: score={} honeypot={} degraded={} warnings={}",
            token,
            assessment.score,
            assessment.is_honeypot,
            assessment.degraded,
            assessment.warnings.len()
        );

        assessment
    }

    async fn read_pool(&self, address: &Pubkey) -> Option<PoolState> {
        let data = match self.chain.get_account_bytes(address).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                warn!("Pool {} does not exist", address);
                return None;
            }
            Err(e) => {
                warn!("Failed to read pool {}: {}", address, e);
                return None;
            }
        };
        match self.codec.decode(*address, &data) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Failed to decode pool {}: {}", address, e);
                None
            }
        }
    }

    async fn run_check<C: RiskCheck>(&self, check: &C, ctx: &RiskContext) -> PartialRisk {
        match tokio::time::timeout(self.check_timeout, check.assess(ctx)).await {
            Ok(Ok(partial)) => partial,
            Ok(Err(e)) => {
                warn!("{} check degraded for {}: {}", check.kind(), ctx.token, e);
                PartialRisk::degraded(check.kind(), self.degraded_risk, &e.to_string())
            }
            Err(_) => {
                warn!(
                    "{} check timed out for {} after {:?}",
                    check.kind(),
                    ctx.token,
                    self.check_timeout
                );
                PartialRisk::degraded(
                    check.kind(),
                    self.degraded_risk,
                    &format!("timed out after {}ms", self.check_timeout.as_millis()),
                )
            }
        }
    }
}

/// Fold partial results, in honeypot, tax, ownership, holders order
pub fn compose(
    token: Pubkey,
    pool: Option<Pubkey>,
    partials: [PartialRisk; 4],
    weights: &Weights,
) -> RiskAssessment {
    let degraded = partials.iter().any(PartialRisk::is_degraded);

    let mut is_honeypot = false;
    let mut is_renounced = false;
    let mut buy_tax_pct = None;
    let mut sell_tax_pct = None;
    let mut holder_distribution = None;
    let mut components = Components::default();
    let mut warnings = Vec::new();

    for partial in partials {
        match partial.check {
            CheckKind::Honeypot => components.honeypot = partial.risk,
            CheckKind::Tax => components.tax = partial.risk,
            CheckKind::Ownership => components.ownership = partial.risk,
            CheckKind::HolderConcentration => components.holders = partial.risk,
        }

        match partial.findings {
            Findings::Honeypot { is_honeypot: flag } => is_honeypot = flag,
            Findings::Tax {
                buy_tax_pct: buy,
                sell_tax_pct: sell,
            } => {
                buy_tax_pct = Some(buy);
                sell_tax_pct = Some(sell);
            }
            Findings::Ownership {
                is_renounced: renounced,
                ..
            } => is_renounced = renounced,
            Findings::Holders(dist) => holder_distribution = Some(dist),
            Findings::Degraded => {}
        }

        warnings.extend(partial.warnings);
    }

    RiskAssessment {
        token,
        pool,
        honeypot_risk: components.honeypot,
        tax_risk: components.tax,
        ownership_risk: components.ownership,
        holder_risk: components.holders,
        buy_tax_pct,
        sell_tax_pct,
        is_honeypot,
        is_renounced,
        holder_distribution,
        warnings,
        degraded,
        score: weighted_score(components, weights, is_honeypot),
        computed_at: Utc::now(),
    }
}
