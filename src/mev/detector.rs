//! Sandwich, front-run and back-run pattern detection
//!
//! Works on a slot-ordered window of swaps touching one pool. Prices are
//! compared as exact ratios of quote to token amounts.

use std::collections::HashSet;

use serde::Serialize;

use crate::chain::{ObservedSwap, TradeSide};
use crate::config::MevConfig;
use crate::pool::amm::BPS_DENOMINATOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Sandwich,
    FrontRun,
    BackRun,
}

/// One matched pattern, identified by the signatures taking part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MevPattern {
    pub kind: PatternKind,
    pub signatures: Vec<String>,
    pub first_slot: u64,
    /// Price move of the victim against the opening trade
    pub impact_bps: u64,
}

/// Detection thresholds
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    pub max_block_distance: u64,
    pub impact_threshold_bps: u64,
    pub value_match_tolerance_bps: u64,
}

impl From<&MevConfig> for DetectorParams {
    fn from(config: &MevConfig) -> Self {
        Self {
            max_block_distance: config.max_block_distance,
            impact_threshold_bps: config.impact_threshold_bps,
            value_match_tolerance_bps: config.value_match_tolerance_bps,
        }
    }
}

/// How far `later` paid above `earlier` per token, in basis points.
///
/// Zero when the price did not rise or either swap moved no tokens.
pub fn price_increase_bps(earlier: &ObservedSwap, later: &ObservedSwap) -> u64 {
    if earlier.token_amount == 0 || later.token_amount == 0 || earlier.quote_amount == 0 {
        return 0;
    }
    // later.q / later.t vs earlier.q / earlier.t, cross-multiplied
    let (Some(later_scaled), Some(earlier_scaled)) = (
        later.quote_amount.checked_mul(earlier.token_amount),
        earlier.quote_amount.checked_mul(later.token_amount),
    ) else {
        return 0;
    };
    if later_scaled <= earlier_scaled {
        return 0;
    }
    let diff = later_scaled - earlier_scaled;
    let bps = match diff.checked_mul(BPS_DENOMINATOR) {
        Some(scaled) => scaled / earlier_scaled,
        None => diff / (earlier_scaled / BPS_DENOMINATOR).max(1),
    };
    u64::try_from(bps).unwrap_or(u64::MAX)
}

/// Token amounts within `tolerance_bps` of each other
fn amounts_match(a: u128, b: u128, tolerance_bps: u64) -> bool {
    let larger = a.max(b);
    if larger == 0 {
        return false;
    }
    let diff = a.abs_diff(b);
    match diff.checked_mul(BPS_DENOMINATOR) {
        Some(scaled) => scaled <= larger.saturating_mul(tolerance_bps as u128),
        None => diff / (tolerance_bps as u128).max(1) <= larger / BPS_DENOMINATOR,
    }
}

fn within(params: &DetectorParams, from: &ObservedSwap, to: &ObservedSwap) -> bool {
    to.slot >= from.slot && to.slot - from.slot <= params.max_block_distance
}

/// Buy, victim buy, closing sell
pub fn find_sandwiches(window: &[ObservedSwap], params: &DetectorParams) -> Vec<MevPattern> {
    let mut found = Vec::new();
    let mut used: HashSet<usize> = HashSet::new();

    for (i, front) in window.iter().enumerate() {
        if front.side != TradeSide::Buy || used.contains(&i) {
            continue;
        }

        'target: for (j, target) in window.iter().enumerate().skip(i + 1) {
            if !within(params, front, target) {
                break;
            }
            if target.side != TradeSide::Buy || target.payer == front.payer || used.contains(&j) {
                continue;
            }
            let impact = price_increase_bps(front, target);
            if impact < params.impact_threshold_bps {
                continue;
            }

            for (k, back) in window.iter().enumerate().skip(j + 1) {
                if !within(params, front, back) {
                    break;
                }
                if back.side != TradeSide::Sell || back.payer == target.payer || used.contains(&k) {
                    continue;
                }
                let linked = back.payer == front.payer
                    || amounts_match(
                        front.token_amount,
                        back.token_amount,
                        params.value_match_tolerance_bps,
                    );
                if linked {
                    used.extend([i, j, k]);
                    found.push(MevPattern {
                        kind: PatternKind::Sandwich,
                        signatures: vec![
                            front.signature.clone(),
                            target.signature.clone(),
                            back.signature.clone(),
                        ],
                        first_slot: front.slot,
                        impact_bps: impact,
                    });
                    break 'target;
                }
            }
        }
    }

    found
}

/// Buy jumped by another payer's larger-impact buy with no closing sell yet
pub fn find_front_runs(
    window: &[ObservedSwap],
    params: &DetectorParams,
    sandwiched: &HashSet<&str>,
) -> Vec<MevPattern> {
    let mut found = Vec::new();

    for (i, front) in window.iter().enumerate() {
        if front.side != TradeSide::Buy || sandwiched.contains(front.signature.as_str()) {
            continue;
        }

        for (j, victim) in window.iter().enumerate().skip(i + 1) {
            if !within(params, front, victim) {
                break;
            }
            if victim.side != TradeSide::Buy
                || victim.payer == front.payer
                || sandwiched.contains(victim.signature.as_str())
            {
                continue;
            }
            let impact = price_increase_bps(front, victim);
            if impact < params.impact_threshold_bps {
                continue;
            }

            let closed = window[j + 1..]
                .iter()
                .take_while(|s| within(params, front, s))
                .any(|s| s.side == TradeSide::Sell && s.payer == front.payer);
            if !closed {
                found.push(MevPattern {
                    kind: PatternKind::FrontRun,
                    signatures: vec![front.signature.clone(), victim.signature.clone()],
                    first_slot: front.slot,
                    impact_bps: impact,
                });
                break;
            }
        }
    }

    found
}

/// Sell placed right behind another payer's buy by a payer that never bought
pub fn find_back_runs(
    window: &[ObservedSwap],
    params: &DetectorParams,
    sandwiched: &HashSet<&str>,
) -> Vec<MevPattern> {
    let mut found = Vec::new();

    for (i, pair) in window.windows(2).enumerate() {
        let (buy, sell) = (&pair[0], &pair[1]);
        if buy.side != TradeSide::Buy
            || sell.side != TradeSide::Sell
            || sell.payer == buy.payer
            || !within(params, buy, sell)
            || sandwiched.contains(sell.signature.as_str())
        {
            continue;
        }

        let bought_before = window[..i]
            .iter()
            .rev()
            .take_while(|s| within(params, s, buy))
            .any(|s| s.side == TradeSide::Buy && s.payer == sell.payer);
        if !bought_before {
            found.push(MevPattern {
                kind: PatternKind::BackRun,
                signatures: vec![buy.signature.clone(), sell.signature.clone()],
                first_slot: buy.slot,
                impact_bps: 0,
            });
        }
    }

    found
}

/// All patterns in the window, sandwiches first
pub fn detect(window: &[ObservedSwap], params: &DetectorParams) -> Vec<MevPattern> {
    let sandwiches = find_sandwiches(window, params);
    let sandwiched: HashSet<&str> = sandwiches
        .iter()
        .flat_map(|p| p.signatures.iter().map(String::as_str))
        .collect();

    let front_runs = find_front_runs(window, params, &sandwiched);
    let back_runs = find_back_runs(window, params, &sandwiched);

    let mut patterns = sandwiches;
    patterns.extend(front_runs);
    patterns.extend(back_runs);
    patterns
}
