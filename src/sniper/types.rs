//! Snipe attempt types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use crate::config::SniperConfig;
use crate::error::Error;
use crate::mev::MevAssessment;
use crate::monitor::LiquidityEvent;
use crate::risk::RiskAssessment;

/// Immutable parameters of one snipe attempt
#[derive(Debug, Clone, Serialize)]
pub struct SnipeConfig {
    #[serde(with = "crate::serde_util::pubkey")]
    pub token: Pubkey,
    #[serde(with = "crate::serde_util::pubkey")]
    pub pool: Pubkey,
    /// Quote units spent
    pub amount: u64,
    pub max_slippage_bps: u16,
    pub min_liquidity: u128,
    pub max_risk_score: u8,
    /// Network priority fee ceiling, micro-lamports per CU
    pub max_gas_price: u64,
    /// Priority fee floor, micro-lamports per CU
    pub priority_fee: u64,
    pub sandwich_protection: bool,
    /// MEV look-back in slots
    pub max_block_age: u64,
    /// Pre-submission pool read retries
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub max_execution_time_ms: u64,
    pub wait_for_liquidity: bool,
    pub max_wait_time_ms: u64,
    pub min_confirmations: usize,
    pub compute_unit_limit: u32,
    pub simulate_before_send: bool,
    pub confirm_poll_interval_ms: u64,
}

impl SnipeConfig {
    /// Attempt parameters for `token` on `pool` with defaults from `[sniper]`
    pub fn new(token: Pubkey, pool: Pubkey, defaults: &SniperConfig) -> Self {
        Self {
            token,
            pool,
            amount: defaults.amount_lamports,
            max_slippage_bps: defaults.max_slippage_bps,
            min_liquidity: defaults.min_liquidity_lamports as u128,
            max_risk_score: defaults.max_risk_score,
            max_gas_price: defaults.max_gas_price,
            priority_fee: defaults.priority_fee,
            sandwich_protection: defaults.sandwich_protection,
            max_block_age: defaults.max_block_age,
            retry_attempts: defaults.retry_attempts,
            retry_base_delay_ms: defaults.retry_base_delay_ms,
            max_execution_time_ms: defaults.max_execution_time_ms,
            wait_for_liquidity: defaults.wait_for_liquidity,
            max_wait_time_ms: defaults.max_wait_time_ms,
            min_confirmations: defaults.min_confirmations,
            compute_unit_limit: defaults.compute_unit_limit,
            simulate_before_send: defaults.simulate_before_send,
            confirm_poll_interval_ms: defaults.confirm_poll_interval_ms,
        }
    }

    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }
}

/// Snipe state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnipeState {
    Pending,
    WaitingForLiquidity,
    Simulating,
    Executing,
    Confirming,
    Completed,
    Failed,
}

impl SnipeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SnipeState::Completed | SnipeState::Failed)
    }

    /// Nothing has been signed yet, so the attempt can still be called off
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            SnipeState::Pending | SnipeState::WaitingForLiquidity | SnipeState::Simulating
        )
    }

    /// Whether `next` is a legal successor. Any live state may fail.
    pub fn can_transition_to(&self, next: SnipeState) -> bool {
        use SnipeState::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending, WaitingForLiquidity | Simulating) => true,
            (WaitingForLiquidity, Simulating) => true,
            (Simulating, Executing) => true,
            (Executing, Confirming) => true,
            (Confirming, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SnipeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SnipeState::Pending => "pending",
            SnipeState::WaitingForLiquidity => "waiting_for_liquidity",
            SnipeState::Simulating => "simulating",
            SnipeState::Executing => "executing",
            SnipeState::Confirming => "confirming",
            SnipeState::Completed => "completed",
            SnipeState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnipeStatus {
    Completed,
    Failed,
}

/// Failure cause reported in a [`SnipeResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidToken,
    InsufficientLiquidity,
    HighRisk,
    SandwichDetected,
    SimulationFailed,
    ExcessiveSlippage,
    HighGasPrice,
    Timeout,
    TransactionFailed,
    AlreadyMonitored,
    Cancelled,
    Decode,
    Math,
    Rpc,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnipeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&Error> for SnipeFailure {
    fn from(error: &Error) -> Self {
        let kind = match error {
            Error::InvalidToken { .. } => FailureKind::InvalidToken,
            Error::InsufficientLiquidity { .. } => FailureKind::InsufficientLiquidity,
            Error::HighRisk { .. } => FailureKind::HighRisk,
            Error::SandwichDetected { .. } => FailureKind::SandwichDetected,
            Error::SimulationFailed(_) => FailureKind::SimulationFailed,
            Error::ExcessiveSlippage { .. } => FailureKind::ExcessiveSlippage,
            Error::HighGasPrice { .. } => FailureKind::HighGasPrice,
            Error::Timeout { .. } => FailureKind::Timeout,
            Error::TransactionFailed(_) | Error::TransactionBuild(_) => FailureKind::TransactionFailed,
            Error::AlreadyMonitored(_) => FailureKind::AlreadyMonitored,
            Error::Cancelled(_) => FailureKind::Cancelled,
            Error::Decode(_) => FailureKind::Decode,
            Error::DivideByZero { .. } | Error::MathOverflow(_) | Error::InvalidFee(_) => {
                FailureKind::Math
            }
            Error::Rpc(_) | Error::RpcTimeout(_) => FailureKind::Rpc,
            _ => FailureKind::Internal,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Terminal record of a snipe attempt
#[derive(Debug, Clone, Serialize)]
pub struct SnipeResult {
    #[serde(with = "crate::serde_util::pubkey")]
    pub token: Pubkey,
    #[serde(with = "crate::serde_util::pubkey")]
    pub pool: Pubkey,
    pub status: SnipeStatus,
    pub signature: Option<String>,
    pub amount_in: u64,
    /// Expected output from the pool curve at simulation time
    pub amount_out: u128,
    pub min_amount_out: u64,
    pub price_impact_bps: u64,
    pub fee_paid: u128,
    /// Micro-lamports per CU bid on the submitted transaction
    pub priority_fee_paid: u64,
    pub risk_assessment: Option<RiskAssessment>,
    pub mev_assessment: Option<MevAssessment>,
    pub liquidity_event: Option<LiquidityEvent>,
    pub error: Option<SnipeFailure>,
    pub final_state: SnipeState,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl SnipeResult {
    pub fn is_success(&self) -> bool {
        self.status == SnipeStatus::Completed
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SnipeState::*;
        let path = [Pending, WaitingForLiquidity, Simulating, Executing, Confirming, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Pending.can_transition_to(Simulating));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use SnipeState::*;
        for next in [Pending, Simulating, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_no_skipping_ahead() {
        use SnipeState::*;
        assert!(!Pending.can_transition_to(Executing));
        assert!(!WaitingForLiquidity.can_transition_to(Confirming));
        assert!(!Simulating.can_transition_to(Completed));
        assert!(!Confirming.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Failed));
    }

    #[test]
    fn test_cancellable_until_signed() {
        use SnipeState::*;
        for state in [Pending, WaitingForLiquidity, Simulating] {
            assert!(state.is_cancellable(), "{}", state);
        }
        for state in [Executing, Confirming, Completed, Failed] {
            assert!(!state.is_cancellable(), "{}", state);
        }
    }

    #[test]
    fn test_failure_mapping() {
        let err = Error::HighRisk {
            token: "T".to_string(),
            score: 85,
            max_score: 70,
            honeypot: false,
        };
        let failure = SnipeFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::HighRisk);
        assert!(failure.message.contains("85"));

        let failure = SnipeFailure::from(&Error::MathOverflow("amount_out"));
        assert_eq!(failure.kind, FailureKind::Math);
    }
}
