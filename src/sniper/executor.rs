//! Snipe execution state machine
//!
//! `Pending -> [WaitingForLiquidity] -> Simulating -> Executing -> Confirming
//! -> Completed`, with `Failed` reachable from every live state. Every gate
//! (token, liquidity, risk, slippage, MEV, gas) runs before anything is
//! signed. A submitted transaction is never resent.
//!
//! An attempt can be cancelled until it enters `Executing`. Every stage
//! before submission runs under a wall-clock deadline.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transaction::{SwapParams, TransactionBuilder};
use super::types::{SnipeConfig, SnipeFailure, SnipeResult, SnipeState, SnipeStatus};
use crate::chain::{ChainClient, TransactionSigner};
use crate::error::{Error, Result};
use crate::mev::{GasEstimate, IntendedSwap, MevAssessment, MevProtector, MevRiskLevel, PatternKind};
use crate::monitor::{LiquidityEvent, LiquidityMonitor, WatchOutcome, WatchRequest};
use crate::pool::{min_amount_out, simulate_swap, PoolState, PoolStateCodec, SwapQuote};
use crate::risk::ownership::decode_mint;
use crate::risk::{RiskAnalyzer, RiskAssessment};

/// Everything gathered while an attempt moves through its states
struct Attempt {
    token: Pubkey,
    pool: Pubkey,
    amount_in: u64,
    state: SnipeState,
    started: Instant,
    started_at: chrono::DateTime<Utc>,
    quote: Option<SwapQuote>,
    min_amount_out: u64,
    priority_fee: u64,
    signature: Option<Signature>,
    risk: Option<RiskAssessment>,
    mev: Option<MevAssessment>,
    liquidity_event: Option<LiquidityEvent>,
    error: Option<SnipeFailure>,
}

impl Attempt {
    fn new(config: &SnipeConfig) -> Self {
        Self {
            token: config.token,
            pool: config.pool,
            amount_in: config.amount,
            state: SnipeState::Pending,
            started: Instant::now(),
            started_at: Utc::now(),
            quote: None,
            min_amount_out: 0,
            priority_fee: 0,
            signature: None,
            risk: None,
            mev: None,
            liquidity_event: None,
            error: None,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn into_result(self) -> SnipeResult {
        let status = if self.state == SnipeState::Completed {
            SnipeStatus::Completed
        } else {
            SnipeStatus::Failed
        };
        let elapsed_ms = self.elapsed_ms();
        SnipeResult {
            token: self.token,
            pool: self.pool,
            status,
            signature: self.signature.map(|s| s.to_string()),
            amount_in: self.amount_in,
            amount_out: self.quote.as_ref().map_or(0, |q| q.amount_out),
            min_amount_out: self.min_amount_out,
            price_impact_bps: self.quote.as_ref().map_or(0, |q| q.price_impact_bps),
            fee_paid: self.quote.as_ref().map_or(0, |q| q.fee_paid),
            priority_fee_paid: self.priority_fee,
            risk_assessment: self.risk,
            mev_assessment: self.mev,
            liquidity_event: self.liquidity_event,
            error: self.error,
            final_state: self.state,
            started_at: self.started_at,
            elapsed_ms,
        }
    }
}

/// Registry entry for a live attempt
struct AttemptHandle {
    state: SnipeState,
    cancel: CancellationToken,
}

/// Validated inputs for the send
struct Prepared {
    pool: PoolState,
    params: SwapParams,
    delay: Duration,
}

/// Drives snipe attempts, at most one live attempt per token
pub struct SniperExecutor {
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn TransactionSigner>,
    codec: PoolStateCodec,
    builder: TransactionBuilder,
    analyzer: Arc<RiskAnalyzer>,
    mev: Arc<MevProtector>,
    monitor: Arc<LiquidityMonitor>,
    /// Live attempts, their current state and cancellation handle
    attempts: DashMap<Pubkey, AttemptHandle>,
}

impl SniperExecutor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn TransactionSigner>,
        codec: PoolStateCodec,
        builder: TransactionBuilder,
        analyzer: Arc<RiskAnalyzer>,
        mev: Arc<MevProtector>,
        monitor: Arc<LiquidityMonitor>,
    ) -> Self {
        Self {
            chain,
            signer,
            codec,
            builder,
            analyzer,
            mev,
            monitor,
            attempts: DashMap::new(),
        }
    }

    /// State of the live attempt for `token`, if any
    pub fn attempt_state(&self, token: &Pubkey) -> Option<SnipeState> {
        self.attempts.get(token).map(|h| h.state)
    }

    pub fn active_attempts(&self) -> Vec<(Pubkey, SnipeState)> {
        self.attempts.iter().map(|e| (*e.key(), e.value().state)).collect()
    }

    /// Cancel the live attempt for `token` if nothing has been signed yet.
    ///
    /// Returns `true` only when this call cancelled it. Attempts already
    /// executing, already cancelled or unknown report `false`.
    pub fn cancel(&self, token: &Pubkey) -> bool {
        match self.attempts.get(token) {
            Some(handle) if handle.state.is_cancellable() && !handle.cancel.is_cancelled() => {
                handle.cancel.cancel();
                info!("Cancelling snipe for {} in state {}", token, handle.state);
                true
            }
            _ => false,
        }
    }

    /// Run one attempt to a terminal state. Never fails: the outcome,
    /// including any error, is in the returned result.
    pub async fn snipe(&self, config: SnipeConfig) -> SnipeResult {
        self.snipe_with_cancel(config, CancellationToken::new()).await
    }

    /// [`snipe`](Self::snipe) with a caller-owned cancellation token. Tripping
    /// it before the attempt reaches `Executing` fails it as `Cancelled`.
    pub async fn snipe_with_cancel(&self, config: SnipeConfig, cancel: CancellationToken) -> SnipeResult {
        let mut attempt = Attempt::new(&config);

        if cancel.is_cancelled() {
            self.fail(&mut attempt, cancelled(&config.token));
            return attempt.into_result();
        }

        match self.attempts.entry(config.token) {
            Entry::Occupied(existing) => {
                warn!(
                    "Rejecting snipe for {}: attempt already {}",
                    config.token,
                    existing.get().state
                );
                drop(existing);
                self.fail(&mut attempt, Error::AlreadyMonitored(config.token.to_string()));
                return attempt.into_result();
            }
            Entry::Vacant(slot) => {
                slot.insert(AttemptHandle {
                    state: SnipeState::Pending,
                    cancel: cancel.clone(),
                });
            }
        }

        info!(
            "Snipe started for {} on pool {} ({} in)",
            config.token, config.pool, config.amount
        );

        match self.run(&config, &mut attempt, &cancel).await {
            Ok(()) => info!(
                "Snipe completed for {} in {}ms: signature {:?}",
                config.token,
                attempt.elapsed_ms(),
                attempt.signature
            ),
            Err(e) => self.fail(&mut attempt, e),
        }

        self.monitor.remove(&config.token).await;
        self.attempts.remove(&config.token);
        attempt.into_result()
    }

    fn advance(&self, attempt: &mut Attempt, next: SnipeState) -> Result<()> {
        if !attempt.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "invalid snipe transition {} -> {}",
                attempt.state, next
            )));
        }
        if let Some(mut handle) = self.attempts.get_mut(&attempt.token) {
            // Under the entry lock: a concurrent cancel lands before the send or is refused
            if next == SnipeState::Executing && handle.cancel.is_cancelled() {
                return Err(cancelled(&attempt.token));
            }
            handle.state = next;
        }
        info!("Snipe {}: {} -> {}", attempt.token, attempt.state, next);
        attempt.state = next;
        Ok(())
    }

    fn fail(&self, attempt: &mut Attempt, error: Error) {
        warn!(
            "Snipe failed for {} in state {}: {}",
            attempt.token, attempt.state, error
        );
        attempt.error = Some(SnipeFailure::from(&error));
        if !attempt.state.is_terminal() {
            attempt.state = SnipeState::Failed;
        }
    }

    async fn run(&self, config: &SnipeConfig, attempt: &mut Attempt, cancel: &CancellationToken) -> Result<()> {
        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&config.token)),
            prepared = self.prepare(config, attempt) => prepared?,
        };

        // Executing and Confirming share one deadline
        self.advance(attempt, SnipeState::Executing)?;
        let deadline = Instant::now() + config.max_execution_time();
        within(
            deadline,
            "execution",
            self.execute(config, attempt, &prepared.pool, &prepared.params, prepared.delay),
        )
        .await?;

        self.advance(attempt, SnipeState::Completed)
    }

    /// Every gate before anything is signed
    async fn prepare(&self, config: &SnipeConfig, attempt: &mut Attempt) -> Result<Prepared> {
        // Pending
        let deadline = Instant::now() + config.max_execution_time();
        let pool = within(deadline, "validation", self.validate(config)).await?;

        if pool.liquidity() < config.min_liquidity {
            if !config.wait_for_liquidity {
                return Err(Error::InsufficientLiquidity {
                    token: config.token.to_string(),
                    liquidity: pool.liquidity(),
                    required: config.min_liquidity,
                });
            }
            self.advance(attempt, SnipeState::WaitingForLiquidity)?;
            let event = self.wait_for_liquidity(config, &pool).await?;
            attempt.liquidity_event = Some(event);
        }

        let deadline = Instant::now() + config.max_execution_time();
        within(deadline, "simulation", self.simulate(config, attempt)).await
    }

    /// Token mint and pool checks
    async fn validate(&self, config: &SnipeConfig) -> Result<PoolState> {
        self.validate_token(&config.token).await?;
        let pool = self.read_pool(config).await?;
        if pool.side_of(&config.token).is_none() {
            return Err(Error::InvalidToken {
                token: config.token.to_string(),
                reason: format!("not traded in pool {}", config.pool),
            });
        }
        Ok(pool)
    }

    /// Risk gate, then quote, MEV and gas checks on a fresh pool read
    async fn simulate(&self, config: &SnipeConfig, attempt: &mut Attempt) -> Result<Prepared> {
        let risk = self.analyzer.analyze_fresh(&config.token, Some(&config.pool)).await;
        attempt.risk = Some((*risk).clone());
        if risk.is_honeypot || risk.score > config.max_risk_score {
            return Err(Error::HighRisk {
                token: config.token.to_string(),
                score: risk.score,
                max_score: config.max_risk_score,
                honeypot: risk.is_honeypot,
            });
        }

        // Simulating
        self.advance(attempt, SnipeState::Simulating)?;
        let pool = self.read_pool(config).await?;
        if !pool.is_active() {
            return Err(Error::InvalidToken {
                token: config.token.to_string(),
                reason: format!("pool {} is {:?}", pool.address, pool.status),
            });
        }
        let direction = pool.buy_direction(&config.token).ok_or_else(|| Error::InvalidToken {
            token: config.token.to_string(),
            reason: format!("not traded in pool {}", pool.address),
        })?;

        let quote = simulate_swap(&pool.reserves(), config.amount as u128, pool.fee_bps, direction)?;
        attempt.quote = Some(quote);
        if quote.price_impact_bps > config.max_slippage_bps as u64 {
            return Err(Error::ExcessiveSlippage {
                price_impact_bps: quote.price_impact_bps,
                max_slippage_bps: config.max_slippage_bps,
            });
        }

        let gas = self
            .mev
            .optimize_gas(&pool, config.priority_fee, config.max_gas_price)
            .await?;

        let (priority_fee, slippage_bps, delay_ms) = if config.sandwich_protection {
            let intended = IntendedSwap {
                payer: self.signer.pubkey(),
                token: config.token,
                quote,
            };
            let mev = self
                .mev
                .assess_bundle(&pool, &intended, config.max_block_age, &gas, config.max_slippage_bps)
                .await?;
            let level = mev.risk_level;
            let patterns = mev.count(PatternKind::Sandwich);
            let recommended = (
                mev.recommended_priority_fee,
                mev.recommended_slippage_bps,
                mev.recommended_delay_ms,
            );
            attempt.mev = Some(mev);
            if level == MevRiskLevel::High {
                return Err(Error::SandwichDetected {
                    token: config.token.to_string(),
                    patterns,
                });
            }
            recommended
        } else {
            (gas.priority_fee, config.max_slippage_bps, 0)
        };

        check_gas(&gas)?;

        let min_out = min_amount_out(quote.amount_out, slippage_bps);
        attempt.min_amount_out =
            u64::try_from(min_out).map_err(|_| Error::MathOverflow("min_amount_out"))?;
        attempt.priority_fee = priority_fee;

        let params = SwapParams {
            direction,
            amount_in: config.amount,
            min_amount_out: attempt.min_amount_out,
            priority_fee,
            compute_unit_limit: config.compute_unit_limit,
        };
        Ok(Prepared {
            pool,
            params,
            delay: Duration::from_millis(delay_ms),
        })
    }

    async fn execute(
        &self,
        config: &SnipeConfig,
        attempt: &mut Attempt,
        pool: &PoolState,
        params: &SwapParams,
        delay: Duration,
    ) -> Result<()> {
        let payer = self.signer.pubkey();
        let mut transaction = self.builder.build_swap(&payer, pool, params)?;

        if config.simulate_before_send {
            let simulation = self.chain.simulate_transaction(&transaction).await?;
            if !simulation.success {
                return Err(Error::SimulationFailed(
                    simulation.error.unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
            debug!(
                "Preflight ok for {}: {:?} CU",
                config.token, simulation.compute_units
            );
        }

        if !delay.is_zero() {
            debug!("Delaying send by {:?} for MEV protection", delay);
            sleep(delay).await;
        }

        let blockhash = self.chain.get_latest_blockhash().await?;
        self.signer.sign(&mut transaction, blockhash)?;
        let signature = self.chain.submit_transaction(&transaction).await?;
        attempt.signature = Some(signature);
        info!("Submitted swap for {}: {}", config.token, signature);

        self.advance(attempt, SnipeState::Confirming)?;
        self.confirm(config, &signature).await
    }

    /// Poll until confirmed or failed. The caller's deadline bounds this.
    async fn confirm(&self, config: &SnipeConfig, signature: &Signature) -> Result<()> {
        let poll = Duration::from_millis(config.confirm_poll_interval_ms);
        loop {
            match self.chain.get_signature_status(signature).await {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        return Err(Error::TransactionFailed(format!("{}: {}", signature, err)));
                    }
                    if status.is_confirmed(config.min_confirmations) {
                        return Ok(());
                    }
                    debug!("{} at {:?} confirmations", signature, status.confirmations);
                }
                Ok(None) => debug!("{} not yet seen", signature),
                Err(e) => warn!("Status check for {} failed: {}", signature, e),
            }
            sleep(poll).await;
        }
    }

    async fn validate_token(&self, token: &Pubkey) -> Result<()> {
        let data = self
            .chain
            .get_account_bytes(token)
            .await?
            .ok_or_else(|| Error::InvalidToken {
                token: token.to_string(),
                reason: "account does not exist".to_string(),
            })?;
        decode_mint(token, &data)?;
        Ok(())
    }

    /// Read and decode the pool, retrying transient RPC failures
    async fn read_pool(&self, config: &SnipeConfig) -> Result<PoolState> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(config.retry_base_delay_ms),
            max_interval: Duration::from_millis(config.retry_base_delay_ms * 8),
            max_elapsed_time: None,
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let max_attempts = config.retry_attempts.max(1);

        let data = retry(backoff, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.chain.get_account_bytes(&config.pool).await {
                Ok(data) => Ok(data),
                Err(e) if e.is_retryable() && n < max_attempts => {
                    warn!("Pool read {}/{} failed: {}", n, max_attempts, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await?;

        let data = data.ok_or_else(|| Error::InvalidToken {
            token: config.token.to_string(),
            reason: format!("pool {} does not exist", config.pool),
        })?;
        self.codec.decode(config.pool, &data)
    }

    async fn wait_for_liquidity(&self, config: &SnipeConfig, pool: &PoolState) -> Result<LiquidityEvent> {
        let rx = self
            .monitor
            .watch(WatchRequest {
                token: config.token,
                pool: config.pool,
                min_liquidity: config.min_liquidity,
                initial_liquidity: pool.liquidity(),
            })
            .await?;

        let started = Instant::now();
        match timeout_at(started + config.max_wait_time(), rx).await {
            Ok(Ok(WatchOutcome::Triggered(event))) => Ok(event),
            Ok(Ok(WatchOutcome::Cancelled)) | Ok(Err(_)) => Err(cancelled(&config.token)),
            Err(_) => Err(Error::Timeout {
                stage: "waiting_for_liquidity".to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

/// Bound one stage by a wall-clock deadline
async fn within<T>(deadline: Instant, stage: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
    let started = Instant::now();
    match timeout_at(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            stage: stage.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
    }
}

fn cancelled(token: &Pubkey) -> Error {
    Error::Cancelled(format!("monitoring stopped for {}", token))
}

fn check_gas(gas: &GasEstimate) -> Result<()> {
    if gas.exceeds_ceiling() {
        return Err(Error::HighGasPrice {
            observed: gas.network_mean,
            max: gas.ceiling,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::chain::{KeypairSigner, TokenHolder, TradeSide};
    use crate::config::{MevConfig, MonitorConfig, RiskConfig, SniperConfig};
    use crate::mev::detector::tests::swap;
    use crate::risk::RiskCache;
    use crate::sniper::types::FailureKind;
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;

    const SOL: u64 = 1_000_000_000;

    struct Fixture {
        chain: Arc<MockChain>,
        monitor: Arc<LiquidityMonitor>,
        executor: Arc<SniperExecutor>,
        token: Pubkey,
        quote: Pubkey,
        pool: Pubkey,
    }

    fn fixture_with(risk: RiskConfig) -> Fixture {
        let chain = Arc::new(MockChain::new());
        let program_id = Pubkey::new_unique();
        let token = Pubkey::new_unique();
        let quote = Pubkey::new_unique();

        // Pool fixtures use nonce 254; pick an address where that is a valid PDA seed
        let pool = loop {
            let candidate = Pubkey::new_unique();
            if Pubkey::create_program_address(&[candidate.as_ref(), &[254]], &program_id).is_ok() {
                break candidate;
            }
        };

        chain.set_mint(token, None, None);
        chain.set_pool(pool, token, quote, 1_000_000 * SOL, 50 * SOL);
        chain.set_holders(
            token,
            (0..200)
                .map(|_| TokenHolder {
                    address: Pubkey::new_unique(),
                    owner: Keypair::new().pubkey(),
                    amount: 1_000,
                })
                .collect(),
        );

        let codec = PoolStateCodec::new(25);
        let analyzer = Arc::new(RiskAnalyzer::new(
            chain.clone(),
            codec,
            &risk,
            Arc::new(RiskCache::new(Duration::from_secs(300))),
        ));
        let mev = Arc::new(MevProtector::new(chain.clone(), &MevConfig::default()));
        let monitor = Arc::new(LiquidityMonitor::new(
            chain.clone(),
            codec,
            MonitorConfig::default(),
        ));
        let executor = Arc::new(SniperExecutor::new(
            chain.clone(),
            Arc::new(KeypairSigner::new(Keypair::new())),
            codec,
            TransactionBuilder::new(program_id),
            analyzer,
            mev,
            monitor.clone(),
        ));

        Fixture {
            chain,
            monitor,
            executor,
            token,
            quote,
            pool,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RiskConfig::default())
    }

    fn config(f: &Fixture) -> SnipeConfig {
        SnipeConfig::new(f.token, f.pool, &SniperConfig::default())
    }

    fn set_quote_reserve(f: &Fixture, sol: u64) {
        f.chain.set_pool(f.pool, f.token, f.quote, 1_000_000 * SOL, sol * SOL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_snipe() {
        let f = fixture();
        let result = f.executor.snipe(config(&f)).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.final_state, SnipeState::Completed);
        assert!(result.signature.is_some());
        assert_eq!(f.chain.submit_count(), 1);
        assert!(result.amount_out > 0);
        assert!(result.min_amount_out as u128 <= result.amount_out);
        assert_eq!(result.priority_fee_paid, 100_000);
        assert_eq!(result.risk_assessment.as_ref().unwrap().score, 1);
        assert_eq!(
            result.mev_assessment.as_ref().unwrap().risk_level,
            MevRiskLevel::Low
        );
        assert!(f.executor.attempt_state(&f.token).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_risk_never_submits() {
        // Weights that put this token at exactly 85
        let risk = RiskConfig {
            honeypot_weight: 0.1,
            tax_weight: 0.4,
            ownership_weight: 0.2,
            holder_weight: 0.3,
            ..RiskConfig::default()
        };
        let f = fixture_with(risk);
        f.chain.set_taxes(0, 5_000);
        f.chain
            .set_mint(f.token, Some(Pubkey::new_unique()), Some(Pubkey::new_unique()));
        f.chain.set_holders(
            f.token,
            vec![
                TokenHolder {
                    address: Pubkey::new_unique(),
                    owner: Keypair::new().pubkey(),
                    amount: 900,
                },
                TokenHolder {
                    address: Pubkey::new_unique(),
                    owner: Keypair::new().pubkey(),
                    amount: 100,
                },
            ],
        );

        let result = f.executor.snipe(config(&f)).await;

        assert_eq!(result.failure_kind(), Some(FailureKind::HighRisk));
        assert_eq!(result.risk_assessment.as_ref().unwrap().score, 85);
        assert!(!result.risk_assessment.as_ref().unwrap().is_honeypot);
        assert_eq!(result.final_state, SnipeState::Failed);
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_honeypot_rejected() {
        let f = fixture();
        f.chain.set_sell_output_zero();

        let result = f.executor.snipe(config(&f)).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::HighRisk));
        assert!(result.risk_assessment.unwrap().is_honeypot);
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_mint_is_invalid_token() {
        let f = fixture();
        let mut cfg = config(&f);
        cfg.token = Pubkey::new_unique();

        let result = f.executor.snipe(cfg).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidToken));
        assert_eq!(result.final_state, SnipeState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_read_retries_then_fails() {
        let f = fixture();
        f.chain.fail_account(f.pool);

        let result = f.executor.snipe(config(&f)).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Rpc));
        // One mint read plus three pool reads
        assert_eq!(f.chain.account_reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_liquidity_without_waiting() {
        let f = fixture();
        set_quote_reserve(&f, 5);
        let mut cfg = config(&f);
        cfg.wait_for_liquidity = false;

        let result = f.executor.snipe(cfg).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InsufficientLiquidity));
        assert!(!f.monitor.is_watching(&f.token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_once_on_repeated_liquidity() {
        let f = fixture();
        set_quote_reserve(&f, 5);

        let executor = f.executor.clone();
        let cfg = config(&f);
        let first = tokio::spawn(async move { executor.snipe(cfg).await });

        sleep(Duration::from_millis(100)).await;
        assert_eq!(
            f.executor.attempt_state(&f.token),
            Some(SnipeState::WaitingForLiquidity)
        );

        // A second attempt for the same token is rejected outright
        let duplicate = f.executor.snipe(config(&f)).await;
        assert_eq!(duplicate.failure_kind(), Some(FailureKind::AlreadyMonitored));

        set_quote_reserve(&f, 20);
        let result = first.await.unwrap();
        assert!(result.is_success(), "{:?}", result.error);
        assert!(result.liquidity_event.is_some());

        // Further liquidity changes trigger nothing
        set_quote_reserve(&f, 60);
        sleep(Duration::from_secs(5)).await;
        set_quote_reserve(&f, 200);
        sleep(Duration::from_secs(5)).await;

        assert_eq!(f.chain.submit_count(), 1);
        assert!(!f.monitor.is_watching(&f.token).await);
        assert!(f.executor.active_attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let f = fixture();
        set_quote_reserve(&f, 5);
        let mut cfg = config(&f);
        cfg.max_wait_time_ms = 3_000;

        let result = f.executor.snipe(cfg).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert!(result.error.unwrap().message.contains("waiting_for_liquidity"));
        assert_eq!(f.chain.submit_count(), 0);
        assert!(!f.monitor.is_watching(&f.token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let f = fixture();
        set_quote_reserve(&f, 5);

        let executor = f.executor.clone();
        let cfg = config(&f);
        let handle = tokio::spawn(async move { executor.snipe(cfg).await });
        sleep(Duration::from_millis(100)).await;

        assert!(f.executor.cancel(&f.token));
        assert!(!f.executor.cancel(&f.token));

        let result = handle.await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_watch_registers() {
        let f = fixture();
        set_quote_reserve(&f, 5);
        f.chain.set_account_delay(Duration::from_millis(200));

        let executor = f.executor.clone();
        let cfg = config(&f);
        let handle = tokio::spawn(async move { executor.snipe(cfg).await });
        sleep(Duration::from_millis(50)).await;

        // Still reading the mint, no watch yet
        assert_eq!(f.executor.attempt_state(&f.token), Some(SnipeState::Pending));
        assert!(!f.monitor.is_watching(&f.token).await);
        assert!(f.executor.cancel(&f.token));
        assert!(!f.executor.cancel(&f.token));

        set_quote_reserve(&f, 15);
        let result = handle.await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(result.final_state, SnipeState::Failed);
        assert!(result.liquidity_event.is_none());
        assert_eq!(f.chain.submit_count(), 0);
        assert!(!f.monitor.is_watching(&f.token).await);
        assert!(f.executor.active_attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_token_never_starts() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = f.executor.snipe_with_cancel(config(&f), cancel).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(f.chain.account_reads(), 0);
        assert!(f.executor.attempt_state(&f.token).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_refused_once_submitted() {
        let f = fixture();
        f.chain.set_never_confirms();
        let mut cfg = config(&f);
        cfg.max_execution_time_ms = 2_000;

        let executor = f.executor.clone();
        let handle = tokio::spawn(async move { executor.snipe(cfg).await });
        sleep(Duration::from_millis(500)).await;

        assert_eq!(f.executor.attempt_state(&f.token), Some(SnipeState::Confirming));
        assert!(!f.executor.cancel(&f.token));

        let result = handle.await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(f.chain.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_validation_hits_deadline() {
        let f = fixture();
        f.chain.set_account_delay(Duration::from_secs(60));
        let mut cfg = config(&f);
        cfg.max_execution_time_ms = 2_000;

        let started = Instant::now();
        let result = f.executor.snipe(cfg).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert!(result.error.unwrap().message.contains("validation"));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excessive_slippage() {
        let f = fixture();
        let mut cfg = config(&f);
        cfg.amount = 5 * SOL;

        let result = f.executor.snipe(cfg).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::ExcessiveSlippage));
        assert!(result.price_impact_bps > 500);
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_sandwiching_blocks_send() {
        let f = fixture();
        let mut window = Vec::new();
        for n in 1..=3u64 {
            let attacker = Pubkey::new_unique();
            window.push(swap(&format!("f{}", n), n * 10, attacker, TradeSide::Buy, 10_000, 10_000));
            window.push(swap(
                &format!("t{}", n),
                n * 10,
                Pubkey::new_unique(),
                TradeSide::Buy,
                1_000,
                1_100,
            ));
            window.push(swap(&format!("b{}", n), n * 10 + 1, attacker, TradeSide::Sell, 10_000, 10_900));
        }
        f.chain.set_swaps(window);

        let result = f.executor.snipe(config(&f)).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::SandwichDetected));
        assert_eq!(result.mev_assessment.unwrap().risk_level, MevRiskLevel::High);
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_medium_mev_raises_fee() {
        let f = fixture();
        let attacker = Pubkey::new_unique();
        f.chain.set_swaps(vec![
            swap("f", 10, attacker, TradeSide::Buy, 10_000, 10_000),
            swap("t", 10, Pubkey::new_unique(), TradeSide::Buy, 1_000, 1_100),
            swap("b", 11, attacker, TradeSide::Sell, 10_000, 10_900),
        ]);

        let result = f.executor.snipe(config(&f)).await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.priority_fee_paid, 200_000);
        // 500 bps widened by a quarter
        let expected_min = min_amount_out(result.amount_out, 625) as u64;
        assert_eq!(result.min_amount_out, expected_min);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_gas_price() {
        let f = fixture();
        f.chain.set_priority_fees(vec![10_000_000, 12_000_000]);

        let result = f.executor.snipe(config(&f)).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::HighGasPrice));
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_failure_stops_submission() {
        let f = fixture();
        f.chain.set_preflight_error("custom program error: 0x28");

        let result = f.executor.snipe(config(&f)).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::SimulationFailed));
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_deadline() {
        let f = fixture();
        f.chain.set_never_confirms();
        let mut cfg = config(&f);
        cfg.max_execution_time_ms = 2_000;

        let result = f.executor.snipe(cfg).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        // Sent once, never resent
        assert!(result.signature.is_some());
        assert_eq!(f.chain.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_chain_failure() {
        let f = fixture();
        f.chain.set_tx_error("InstructionError(3, Custom(30))");

        let result = f.executor.snipe(config(&f)).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::TransactionFailed));
        assert_eq!(f.chain.submit_count(), 1);
    }
}
