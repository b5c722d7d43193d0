//! Engine facade
//!
//! Owns one instance of every component and exposes the operations the CLI
//! drives: risk analysis, snipes (blocking or fire-and-forget), position
//! sizing and position management.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::{ChainClient, TransactionSigner};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::mev::MevProtector;
use crate::monitor::LiquidityMonitor;
use crate::pool::{PoolState, PoolStateCodec};
use crate::position::{
    ExitSignal, Position, PositionManager, PositionMonitor, PositionSizer, SizingMethod, SizingParams,
};
use crate::risk::{RiskAnalyzer, RiskAssessment, RiskCache};
use crate::sniper::{SnipeConfig, SnipeResult, SniperExecutor, TransactionBuilder};

const RESULT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a sizing request
#[derive(Debug, Clone, Serialize)]
pub struct PositionSize {
    #[serde(with = "crate::serde_util::pubkey")]
    pub token: Pubkey,
    pub method: SizingMethod,
    /// Token units
    pub size: f64,
    /// Quote units per token
    pub price: f64,
    /// Quote units committed
    pub value: f64,
    pub risk_score: u8,
}

pub struct SniperEngine {
    config: Config,
    chain: Arc<dyn ChainClient>,
    codec: PoolStateCodec,
    analyzer: Arc<RiskAnalyzer>,
    liquidity: Arc<LiquidityMonitor>,
    executor: Arc<SniperExecutor>,
    sizer: PositionSizer,
    positions: Arc<PositionManager>,
    position_monitor: Arc<PositionMonitor>,
    /// Tokens with a background snipe in flight and the handle that cancels it
    background: Arc<DashMap<Pubkey, CancellationToken>>,
    results_tx: mpsc::Sender<SnipeResult>,
    results_rx: Mutex<Option<mpsc::Receiver<SnipeResult>>>,
}

impl SniperEngine {
    pub fn new(
        config: Config,
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<Self> {
        let program_id = config
            .pool
            .program_id()
            .map_err(|e| Error::Config(e.to_string()))?;
        let codec = PoolStateCodec::new(config.pool.fee_bps);

        let cache = Arc::new(RiskCache::new(Duration::from_secs(config.risk.cache_ttl_secs)));
        let analyzer = Arc::new(RiskAnalyzer::new(chain.clone(), codec, &config.risk, cache));
        let mev = Arc::new(MevProtector::new(chain.clone(), &config.mev));
        let liquidity = Arc::new(LiquidityMonitor::new(
            chain.clone(),
            codec,
            config.monitor.clone(),
        ));
        let executor = Arc::new(SniperExecutor::new(
            chain.clone(),
            signer,
            codec,
            TransactionBuilder::new(program_id),
            analyzer.clone(),
            mev,
            liquidity.clone(),
        ));

        let positions = Arc::new(PositionManager::new(config.position.clone()));
        let position_monitor = Arc::new(PositionMonitor::new(
            chain.clone(),
            codec,
            positions.clone(),
            Duration::from_millis(config.monitor.read_timeout_ms),
        ));

        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        info!("Engine ready (program {}, fee {}bps)", program_id, config.pool.fee_bps);

        Ok(Self {
            sizer: PositionSizer::new(config.sizing.clone()),
            config,
            chain,
            codec,
            analyzer,
            liquidity,
            executor,
            positions,
            position_monitor,
            background: Arc::new(DashMap::new()),
            results_tx,
            results_rx: Mutex::new(Some(results_rx)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &Arc<SniperExecutor> {
        &self.executor
    }

    pub fn positions(&self) -> &Arc<PositionManager> {
        &self.positions
    }

    /// Attempt parameters for `token` on `pool` with the configured defaults
    pub fn snipe_config(&self, token: Pubkey, pool: Pubkey) -> SnipeConfig {
        SnipeConfig::new(token, pool, &self.config.sniper)
    }

    /// Risk assessment, served from cache while fresh
    pub async fn analyze_token(&self, token: &Pubkey, pool: Option<&Pubkey>) -> Arc<RiskAssessment> {
        self.analyzer.analyze(token, pool).await
    }

    /// Run one snipe to completion
    pub async fn snipe(&self, config: SnipeConfig) -> SnipeResult {
        self.executor.snipe(config).await
    }

    /// Snipe in the background once liquidity arrives. The outcome is
    /// delivered on [`snipe_results`](Self::snipe_results).
    pub fn start_monitoring(&self, mut config: SnipeConfig) -> Result<()> {
        let token = config.token;
        let cancel = CancellationToken::new();
        match self.background.entry(token) {
            Entry::Occupied(_) => return Err(Error::AlreadyMonitored(token.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        if self.executor.attempt_state(&token).is_some() {
            self.background.remove(&token);
            return Err(Error::AlreadyMonitored(token.to_string()));
        }

        config.wait_for_liquidity = true;
        info!("Monitoring {} on pool {}", token, config.pool);

        let executor = self.executor.clone();
        let background = self.background.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = executor.snipe_with_cancel(config, cancel).await;
            background.remove(&token);
            if let Err(e) = results.try_send(result) {
                warn!("Dropping snipe result for {}: {}", token, e);
            }
        });

        Ok(())
    }

    /// Cancel the snipe for `token` if it has not signed anything yet.
    ///
    /// Returns `true` when this call cancelled it. The attempt then ends as
    /// `Failed(Cancelled)` on the result channel. Repeat calls are no-ops.
    pub fn stop_monitoring(&self, token: &Pubkey) -> bool {
        let cancel = match self.background.get(token) {
            Some(cancel) => cancel.clone(),
            None => return self.executor.cancel(token),
        };
        if self.executor.attempt_state(token).is_some() {
            return self.executor.cancel(token);
        }

        // Spawned but not registered with the executor yet
        if cancel.is_cancelled() {
            return false;
        }
        cancel.cancel();
        info!("Cancelling snipe for {} before it started", token);
        true
    }

    pub fn is_monitoring(&self, token: &Pubkey) -> bool {
        self.background.contains_key(token)
    }

    /// Receiver for background snipe outcomes. Can be taken once.
    pub async fn snipe_results(&self) -> Option<mpsc::Receiver<SnipeResult>> {
        self.results_rx.lock().await.take()
    }

    /// Size a position against the pool's current price and the token's
    /// risk score. `params.price` and `params.risk_score` are filled in here.
    pub async fn size_position(
        &self,
        token: &Pubkey,
        pool: &Pubkey,
        method: SizingMethod,
        mut params: SizingParams,
    ) -> Result<PositionSize> {
        let state = self.read_pool(pool).await?;
        params.price = state.ui_price_of(token).ok_or_else(|| Error::InvalidToken {
            token: token.to_string(),
            reason: format!("not traded in pool {}", pool),
        })?;
        params.risk_score = self.analyzer.analyze(token, Some(pool)).await.score;

        let size = self.sizer.size(method, &params)?;
        info!(
            "Sized {} via {}: {} tokens @ {} (risk {})",
            token, method, size, params.price, params.risk_score
        );

        Ok(PositionSize {
            token: *token,
            method,
            size,
            price: params.price,
            value: size * params.price,
            risk_score: params.risk_score,
        })
    }

    pub async fn open_position(
        &self,
        token: Pubkey,
        pool: Pubkey,
        entry_price: f64,
        amount: f64,
    ) -> Result<Position> {
        self.positions.open(token, pool, entry_price, amount).await
    }

    /// Open a position from a completed snipe, pricing the entry from the
    /// amounts spent and expected
    pub async fn open_position_from(&self, result: &SnipeResult) -> Result<Position> {
        if !result.is_success() {
            return Err(Error::Internal(format!(
                "snipe for {} did not complete",
                result.token
            )));
        }

        let state = self.read_pool(&result.pool).await?;
        let (token_decimals, quote_decimals) = if state.base_mint == result.token {
            (state.base_decimals, state.quote_decimals)
        } else {
            (state.quote_decimals, state.base_decimals)
        };

        let amount = result.amount_out as f64 / 10f64.powi(i32::from(token_decimals));
        let cost = result.amount_in as f64 / 10f64.powi(i32::from(quote_decimals));
        if amount <= 0.0 {
            return Err(Error::InvalidPositionSize {
                size: amount,
                min: self.config.sizing.min_position_size,
                max: self.config.sizing.max_position_size,
            });
        }

        self.positions
            .open(result.token, result.pool, cost / amount, amount)
            .await
    }

    pub async fn close_position(&self, id: &str, exit_price: f64) -> Result<Position> {
        self.positions.close(id, exit_price).await
    }

    pub async fn update_stop_loss(&self, id: &str, price: f64) -> Result<Position> {
        self.positions.update_stop_loss(id, price).await
    }

    pub async fn update_take_profit(&self, id: &str, price: f64) -> Result<Position> {
        self.positions.update_take_profit(id, price).await
    }

    /// Start exit-trigger monitoring for open positions
    pub fn start_position_monitor(&self) -> Result<mpsc::Receiver<ExitSignal>> {
        self.position_monitor.start()
    }

    /// Stop every background loop. Waiting snipes fail as cancelled.
    pub async fn shutdown(&self) {
        for entry in self.background.iter() {
            entry.value().cancel();
        }
        self.liquidity.shutdown().await;
        self.position_monitor.shutdown();
        info!("Engine shut down");
    }

    async fn read_pool(&self, pool: &Pubkey) -> Result<PoolState> {
        let read_timeout = Duration::from_millis(self.config.rpc.timeout_ms);
        let data = timeout(read_timeout, self.chain.get_account_bytes(pool))
            .await
            .map_err(|_| Error::RpcTimeout(self.config.rpc.timeout_ms))??
            .ok_or_else(|| Error::Rpc(format!("pool {} not found", pool)))?;
        self.codec.decode(*pool, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::chain::{KeypairSigner, TokenHolder};
    use crate::sniper::{FailureKind, SnipeState};
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;
    use tokio::time::sleep;

    const SOL: u64 = 1_000_000_000;

    struct Fixture {
        chain: Arc<MockChain>,
        engine: SniperEngine,
        token: Pubkey,
        quote: Pubkey,
        pool: Pubkey,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MockChain::new());
        let config = Config::default();
        let program_id = config.pool.program_id().unwrap();
        let token = Pubkey::new_unique();
        let quote = Pubkey::new_unique();

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

        let engine = SniperEngine::new(
            config,
            chain.clone(),
            Arc::new(KeypairSigner::new(Keypair::new())),
        )
        .unwrap();

        Fixture {
            chain,
            engine,
            token,
            quote,
            pool,
        }
    }

    fn set_quote_reserve(f: &Fixture, sol: u64) {
        f.chain.set_pool(f.pool, f.token, f.quote, 1_000_000 * SOL, sol * SOL);
    }

    #[tokio::test]
    async fn test_analyze_token_is_cached() {
        let f = fixture();
        let first = f.engine.analyze_token(&f.token, Some(&f.pool)).await;
        let second = f.engine.analyze_token(&f.token, Some(&f.pool)).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_snipe_then_open_position() {
        let f = fixture();
        let result = f.engine.snipe(f.engine.snipe_config(f.token, f.pool)).await;
        assert!(result.is_success(), "{:?}", result.error);

        let position = f.engine.open_position_from(&result).await.unwrap();
        assert!(position.is_open());
        // 0.05 SOL buys just under 1e6 whole tokens at 5e-8 SOL each
        assert!(position.entry_price > 5e-8);
        assert!(position.entry_amount > 900_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_snipe_reports_result() {
        let f = fixture();
        set_quote_reserve(&f, 5);
        let mut results = f.engine.snipe_results().await.unwrap();
        assert!(f.engine.snipe_results().await.is_none());

        let config = f.engine.snipe_config(f.token, f.pool);
        f.engine.start_monitoring(config.clone()).unwrap();
        assert!(matches!(
            f.engine.start_monitoring(config),
            Err(Error::AlreadyMonitored(_))
        ));

        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(
            f.engine.executor().attempt_state(&f.token),
            Some(SnipeState::WaitingForLiquidity)
        );

        set_quote_reserve(&f, 15);
        let result = timeout(Duration::from_secs(10), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_success(), "{:?}", result.error);
        assert!(result.liquidity_event.is_some());
        assert_eq!(f.chain.submit_count(), 1);
        assert!(!f.engine.is_monitoring(&f.token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_monitoring_cancels() {
        let f = fixture();
        set_quote_reserve(&f, 5);
        let mut results = f.engine.snipe_results().await.unwrap();

        f.engine
            .start_monitoring(f.engine.snipe_config(f.token, f.pool))
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        assert!(f.engine.stop_monitoring(&f.token));
        assert!(!f.engine.stop_monitoring(&f.token));

        let result = results.recv().await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_monitoring_while_pending() {
        let f = fixture();
        set_quote_reserve(&f, 5);
        f.chain.set_account_delay(Duration::from_millis(200));
        let mut results = f.engine.snipe_results().await.unwrap();

        f.engine
            .start_monitoring(f.engine.snipe_config(f.token, f.pool))
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(
            f.engine.executor().attempt_state(&f.token),
            Some(SnipeState::Pending)
        );

        assert!(f.engine.stop_monitoring(&f.token));
        assert!(!f.engine.stop_monitoring(&f.token));

        // Liquidity arriving afterwards must not revive the attempt
        set_quote_reserve(&f, 15);
        let result = timeout(Duration::from_secs(10), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(result.final_state, SnipeState::Failed);
        assert_eq!(f.chain.submit_count(), 0);
        assert!(!f.engine.is_monitoring(&f.token));
        assert!(f.engine.executor().attempt_state(&f.token).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_monitoring_before_task_runs() {
        let f = fixture();
        set_quote_reserve(&f, 5);
        let mut results = f.engine.snipe_results().await.unwrap();

        // No await in between: the spawned snipe has not been polled yet
        f.engine
            .start_monitoring(f.engine.snipe_config(f.token, f.pool))
            .unwrap();
        assert!(f.engine.executor().attempt_state(&f.token).is_none());
        assert!(f.engine.stop_monitoring(&f.token));
        assert!(!f.engine.stop_monitoring(&f.token));

        let result = results.recv().await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(f.chain.account_reads(), 0);
        assert!(!f.engine.is_monitoring(&f.token));
    }

    #[tokio::test]
    async fn test_size_position_uses_pool_price() {
        let f = fixture();
        let params = SizingParams {
            balance: 5.0,
            ..SizingParams::default()
        };
        let sized = f
            .engine
            .size_position(&f.token, &f.pool, SizingMethod::Fixed, params)
            .await
            .unwrap();

        // 50 SOL against 1e9 whole tokens
        assert!((sized.price - 5e-8).abs() < 1e-15);
        assert_eq!(sized.risk_score, 1);
        // 5% of 5 SOL = 0.25 SOL
        assert!((sized.value - 0.25).abs() < 1e-9);

        let stranger = Pubkey::new_unique();
        assert!(matches!(
            f.engine
                .size_position(&stranger, &f.pool, SizingMethod::Fixed, SizingParams::default())
                .await,
            Err(Error::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_position_operations() {
        let f = fixture();
        let position = f.engine.open_position(f.token, f.pool, 0.01, 100.0).await.unwrap();

        assert!(f.engine.update_stop_loss(&position.id, 0.02).await.is_err());
        assert!(f.engine.update_take_profit(&position.id, 0.005).await.is_err());
        f.engine.update_stop_loss(&position.id, 0.008).await.unwrap();
        f.engine.update_take_profit(&position.id, 0.02).await.unwrap();

        let closed = f.engine.close_position(&position.id, 0.011).await.unwrap();
        assert!((closed.realized_pnl.unwrap() - 0.1).abs() < 1e-9);
        assert!(f.engine.positions().list_open().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_monitor_from_engine() {
        let f = fixture();
        // Entry at the current pool price, then the price doubles
        f.engine.open_position(f.token, f.pool, 5e-8, 1_000.0).await.unwrap();
        let mut exits = f.engine.start_position_monitor().unwrap();

        set_quote_reserve(&f, 100);
        let signal = timeout(Duration::from_secs(10), exits.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.reason, crate::position::ExitReason::TakeProfit);

        f.engine.shutdown().await;
    }
}
