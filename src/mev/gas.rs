//! Priority fee estimation from recent pool activity

use serde::Serialize;

/// Network fee level and the fee to bid, in micro-lamports per CU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GasEstimate {
    /// Mean of recent prioritization fees, unclamped
    pub network_mean: u64,
    /// Mean clamped to the caller's floor and ceiling
    pub priority_fee: u64,
    pub ceiling: u64,
}

impl GasEstimate {
    /// Clamp `network_mean` into `[floor, ceiling]`; the ceiling wins a conflict
    pub fn from_mean(network_mean: u64, floor: u64, ceiling: u64) -> Self {
        Self {
            network_mean,
            priority_fee: network_mean.max(floor).min(ceiling),
            ceiling,
        }
    }

    /// Network fees are above what the caller is willing to pay
    pub fn exceeds_ceiling(&self) -> bool {
        self.network_mean > self.ceiling
    }
}

/// Integer mean, zero for no samples
pub fn mean_fee(fees: &[u64]) -> u64 {
    if fees.is_empty() {
        return 0;
    }
    let total: u128 = fees.iter().map(|&f| f as u128).sum();
    (total / fees.len() as u128) as u64
}
