//! Buy-then-sell dry run shared by the honeypot and tax checks

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::chain::{ChainClient, SwapProbe};
use crate::error::{Error, Result};
use crate::pool::amm::{simulate_swap, tax_bps};
use crate::pool::PoolState;

/// Outcome of one simulated leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leg {
    /// Amount expected from the pool curve and amount actually received
    Filled { expected: u128, actual: u64 },
    /// Dry run rejected, or it paid out nothing
    Failed(String),
}

impl Leg {
    /// Shortfall against the curve in basis points; a failed leg loses everything
    pub fn tax_bps(&self) -> u64 {
        match self {
            Leg::Filled { expected, actual } => tax_bps(*expected, *actual as u128),
            Leg::Failed(_) => 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTrip {
    pub probe_amount: u64,
    pub buy: Leg,
    /// `None` when the buy failed and there was nothing to sell
    pub sell: Option<Leg>,
}

/// One round trip per assessment.
///
/// Whichever check asks first runs the dry run; the other waits for and
/// reads the same outcome. A caller that gives up mid-run (per-check
/// timeout) leaves the cell empty for the next caller.
pub struct SharedRoundTrip {
    chain: Arc<dyn ChainClient>,
    probe_cap: u64,
    outcome: OnceCell<std::result::Result<RoundTrip, String>>,
}

impl SharedRoundTrip {
    pub fn new(chain: Arc<dyn ChainClient>, probe_cap: u64) -> Self {
        Self {
            chain,
            probe_cap,
            outcome: OnceCell::new(),
        }
    }

    pub async fn get(&self, pool: &PoolState, token: &Pubkey) -> Result<&RoundTrip> {
        let outcome = self
            .outcome
            .get_or_init(|| async {
                round_trip(&self.chain, pool, token, self.probe_cap)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
        outcome
            .as_ref()
            .map_err(|reason| Error::Internal(format!("dry run failed: {}", reason)))
    }
}

/// Dry-run a small buy of `token` then sell everything it returned.
///
/// The probe is `min(probe_cap, 1% of the spent-side reserve)`. Only RPC
/// failures surface as errors; a rejected simulation is a failed leg.
pub async fn round_trip(
    chain: &Arc<dyn ChainClient>,
    pool: &PoolState,
    token: &Pubkey,
    probe_cap: u64,
) -> Result<RoundTrip> {
    let buy_direction = pool.buy_direction(token).ok_or_else(|| Error::InvalidToken {
        token: token.to_string(),
        reason: format!("not traded in pool {}", pool.address),
    })?;
    let sell_direction = buy_direction.reverse();

    let reserves = pool.reserves();
    let (reserve_in, _) = reserves.oriented(buy_direction);
    let one_pct = u64::try_from(reserve_in / 100).unwrap_or(u64::MAX);
    let probe_amount = probe_cap.min(one_pct).max(1);

    let expected_buy = simulate_swap(&reserves, probe_amount as u128, pool.fee_bps, buy_direction)?;

    let bought = match chain
        .simulate_swap(&SwapProbe {
            pool: pool.clone(),
            direction: buy_direction,
            amount_in: probe_amount,
            preceding: None,
        })
        .await
    {
        Ok(0) => {
            return Ok(RoundTrip {
                probe_amount,
                buy: Leg::Failed("zero output".to_string()),
                sell: None,
            })
        }
        Ok(amount) => amount,
        Err(Error::SimulationFailed(reason)) => {
            return Ok(RoundTrip {
                probe_amount,
                buy: Leg::Failed(reason),
                sell: None,
            })
        }
        Err(e) => return Err(e),
    };

    let after_buy = reserves.after_swap(buy_direction, &expected_buy)?;
    let expected_sell = simulate_swap(&after_buy, bought as u128, pool.fee_bps, sell_direction)?;

    let sell = match chain
        .simulate_swap(&SwapProbe {
            pool: pool.clone(),
            direction: sell_direction,
            amount_in: bought,
            preceding: Some((buy_direction, probe_amount)),
        })
        .await
    {
        Ok(0) => Leg::Failed("zero output".to_string()),
        Ok(received) => Leg::Filled {
            expected: expected_sell.amount_out,
            actual: received,
        },
        Err(Error::SimulationFailed(reason)) => Leg::Failed(reason),
        Err(e) => return Err(e),
    };

    debug!(
        "Round trip for {}: probe={} bought={} sell={:?}",
        token, probe_amount, bought, sell
    );

    Ok(RoundTrip {
        probe_amount,
        buy: Leg::Filled {
            expected: expected_buy.amount_out,
            actual: bought,
        },
        sell: Some(sell),
    })
}
