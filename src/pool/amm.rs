//! Constant-product swap math
//!
//! Shared by risk simulation and real trade sizing. All reserve arithmetic is
//! checked `u128`; floating point never touches amounts.

use serde::Serialize;

use crate::error::{Error, Result};

/// Basis point denominator
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Swap direction relative to the pool's base/quote orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    /// Spend base, receive quote
    BaseToQuote,
    /// Spend quote, receive base
    QuoteToBase,
}

impl SwapDirection {
    pub fn reverse(self) -> Self {
        match self {
            SwapDirection::BaseToQuote => SwapDirection::QuoteToBase,
            SwapDirection::QuoteToBase => SwapDirection::BaseToQuote,
        }
    }
}

/// Pool reserves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserves {
    pub base: u128,
    pub quote: u128,
}

impl Reserves {
    /// (reserve_in, reserve_out) for a direction
    pub fn oriented(&self, direction: SwapDirection) -> (u128, u128) {
        match direction {
            SwapDirection::BaseToQuote => (self.base, self.quote),
            SwapDirection::QuoteToBase => (self.quote, self.base),
        }
    }

    /// Reserves after a swap has been applied
    pub fn after_swap(&self, direction: SwapDirection, quote: &SwapQuote) -> Result<Reserves> {
        let (reserve_in, reserve_out) = self.oriented(direction);
        let new_in = reserve_in
            .checked_add(quote.amount_in)
            .ok_or(Error::MathOverflow("reserve update"))?;
        let new_out = reserve_out
            .checked_sub(quote.amount_out)
            .ok_or(Error::MathOverflow("reserve update"))?;
        Ok(match direction {
            SwapDirection::BaseToQuote => Reserves {
                base: new_in,
                quote: new_out,
            },
            SwapDirection::QuoteToBase => Reserves {
                base: new_out,
                quote: new_in,
            },
        })
    }
}

/// Result of a simulated swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapQuote {
    pub amount_in: u128,
    pub amount_in_after_fee: u128,
    pub amount_out: u128,
    pub fee_paid: u128,
    pub price_impact_bps: u64,
}

/// Simulate a constant-product swap.
///
/// The fee is deducted from the input first, then
/// `amount_out = in_after_fee * reserve_out / (reserve_in + in_after_fee)`.
///
/// Price impact is `(spot - effective) / spot` on the exact (unrounded)
/// effective price, which simplifies to
/// `(fee * r_in + (1 - fee) * x) / (r_in + (1 - fee) * x)`; it therefore
/// includes the fee and never decreases as `amount_in` grows.
pub fn simulate_swap(
    reserves: &Reserves,
    amount_in: u128,
    fee_bps: u16,
    direction: SwapDirection,
) -> Result<SwapQuote> {
    if fee_bps as u128 > BPS_DENOMINATOR {
        return Err(Error::InvalidFee(fee_bps));
    }

    let (reserve_in, reserve_out) = reserves.oriented(direction);
    if reserve_in == 0 || reserve_out == 0 {
        return Err(Error::DivideByZero {
            reserve_in,
            reserve_out,
        });
    }

    let fee_keep = BPS_DENOMINATOR - fee_bps as u128;

    let amount_in_after_fee = amount_in
        .checked_mul(fee_keep)
        .ok_or(Error::MathOverflow("fee deduction"))?
        / BPS_DENOMINATOR;
    let fee_paid = amount_in - amount_in_after_fee;

    let numerator = amount_in_after_fee
        .checked_mul(reserve_out)
        .ok_or(Error::MathOverflow("swap output"))?;
    let denominator = reserve_in
        .checked_add(amount_in_after_fee)
        .ok_or(Error::MathOverflow("swap output"))?;
    let amount_out = numerator / denominator;

    let price_impact_bps = if amount_in == 0 {
        0
    } else {
        price_impact_bps(reserve_in, amount_in, fee_bps as u128)?
    };

    Ok(SwapQuote {
        amount_in,
        amount_in_after_fee,
        amount_out,
        fee_paid,
        price_impact_bps,
    })
}

fn price_impact_bps(reserve_in: u128, amount_in: u128, fee_bps: u128) -> Result<u64> {
    let fee_keep = BPS_DENOMINATOR - fee_bps;
    let overflow = || Error::MathOverflow("price impact");

    let kept_in = fee_keep.checked_mul(amount_in).ok_or_else(overflow)?;
    let lost = fee_bps
        .checked_mul(reserve_in)
        .and_then(|v| v.checked_add(kept_in))
        .ok_or_else(overflow)?;
    let total = BPS_DENOMINATOR
        .checked_mul(reserve_in)
        .and_then(|v| v.checked_add(kept_in))
        .ok_or_else(overflow)?;

    let impact = lost.checked_mul(BPS_DENOMINATOR).ok_or_else(overflow)? / total;
    u64::try_from(impact).map_err(|_| overflow())
}

/// Output at the spot price, ignoring fee and impact
pub fn spot_amount_out(reserves: &Reserves, amount_in: u128, direction: SwapDirection) -> Result<u128> {
    let (reserve_in, reserve_out) = reserves.oriented(direction);
    if reserve_in == 0 || reserve_out == 0 {
        return Err(Error::DivideByZero {
            reserve_in,
            reserve_out,
        });
    }
    Ok(amount_in
        .checked_mul(reserve_out)
        .ok_or(Error::MathOverflow("spot output"))?
        / reserve_in)
}

/// Minimum acceptable output for a slippage tolerance
pub fn min_amount_out(amount_out: u128, slippage_bps: u16) -> u128 {
    let tolerance = (slippage_bps as u128).min(BPS_DENOMINATOR);
    amount_out.saturating_mul(BPS_DENOMINATOR - tolerance) / BPS_DENOMINATOR
}

/// Shortfall of `actual` against `expected`, in basis points (0 when actual >= expected)
pub fn tax_bps(expected: u128, actual: u128) -> u64 {
    if expected == 0 {
        return 0;
    }
    let shortfall = expected.saturating_sub(actual);
    (shortfall.saturating_mul(BPS_DENOMINATOR) / expected) as u64
}
