//! Liquidity monitor
//!
//! Polls the pools of watched tokens on a fixed tick and raises at most one
//! [`LiquidityEvent`] per watch. One task serves the whole watched set; it is
//! spawned when the first token is added and exits once the set is empty.
//!
//! Ticks never overlap: a tick that runs long causes the next ones to be
//! skipped, not queued, which bounds concurrent RPC load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::pool::{PoolState, PoolStateCodec};

/// Liquidity arrived for a watched token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidityEvent {
    #[serde(with = "crate::serde_util::pubkey")]
    pub token: Pubkey,
    #[serde(with = "crate::serde_util::pubkey")]
    pub pool: Pubkey,
    pub old_liquidity: u128,
    pub new_liquidity: u128,
    pub observed_at: DateTime<Utc>,
}

/// What a waiting attempt receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Triggered(LiquidityEvent),
    /// Watch removed or monitor shut down before liquidity arrived
    Cancelled,
}

/// A token to watch and the liquidity it needs
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub token: Pubkey,
    pub pool: Pubkey,
    pub min_liquidity: u128,
    /// Liquidity seen when the watch was placed
    pub initial_liquidity: u128,
}

struct WatchEntry {
    request: WatchRequest,
    last_liquidity: u128,
    last_observed_at: Instant,
    /// Taken on first fire
    notifier: Option<oneshot::Sender<WatchOutcome>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Pubkey, WatchEntry>,
    loop_running: bool,
}

/// Event rule: inside the window, liquidity must reach the minimum and either
/// grow by at least the minimum or cross it from below.
pub fn evaluate(
    old_liquidity: u128,
    new_liquidity: u128,
    elapsed: Duration,
    min_liquidity: u128,
    window: Duration,
) -> bool {
    if elapsed > window || new_liquidity < min_liquidity {
        return false;
    }
    let increase = new_liquidity.saturating_sub(old_liquidity);
    increase >= min_liquidity || old_liquidity < min_liquidity
}

struct Shared {
    chain: Arc<dyn ChainClient>,
    codec: PoolStateCodec,
    config: MonitorConfig,
    inner: Mutex<Inner>,
}

pub struct LiquidityMonitor {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl LiquidityMonitor {
    pub fn new(chain: Arc<dyn ChainClient>, codec: PoolStateCodec, config: MonitorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                chain,
                codec,
                config,
                inner: Mutex::new(Inner::default()),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start watching a token.
    ///
    /// Fails with `AlreadyMonitored` if the token is watched already; the
    /// existing watch is left untouched.
    pub async fn watch(&self, request: WatchRequest) -> Result<oneshot::Receiver<WatchOutcome>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled("liquidity monitor is shut down".to_string()));
        }

        let mut inner = self.shared.inner.lock().await;
        if inner.entries.contains_key(&request.token) {
            return Err(Error::AlreadyMonitored(request.token.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        info!(
            "Watching {} on pool {} (min liquidity {})",
            request.token, request.pool, request.min_liquidity
        );
        inner.entries.insert(
            request.token,
            WatchEntry {
                last_liquidity: request.initial_liquidity,
                last_observed_at: Instant::now(),
                notifier: Some(tx),
                request,
            },
        );

        if !inner.loop_running {
            inner.loop_running = true;
            tokio::spawn(run(self.shared.clone(), self.shutdown.clone()));
        }

        Ok(rx)
    }

    /// Stop watching a token. Returns whether a still-waiting attempt was
    /// cancelled; a watch that already fired is dropped and reports `false`.
    /// Repeat calls are no-ops.
    pub async fn remove(&self, token: &Pubkey) -> bool {
        let mut inner = self.shared.inner.lock().await;
        match inner.entries.remove(token) {
            Some(entry) => {
                info!("Stopped watching {}", token);
                entry
                    .notifier
                    .map_or(false, |notifier| notifier.send(WatchOutcome::Cancelled).is_ok())
            }
            None => false,
        }
    }

    pub async fn is_watching(&self, token: &Pubkey) -> bool {
        self.shared.inner.lock().await.entries.contains_key(token)
    }

    pub async fn watched(&self) -> Vec<Pubkey> {
        self.shared.inner.lock().await.entries.keys().copied().collect()
    }

    pub async fn is_running(&self) -> bool {
        self.shared.inner.lock().await.loop_running
    }

    /// Run one tick now
    pub async fn poll_once(&self) {
        self.shared.poll_once().await;
    }

    /// Cancel every watch and stop the tick loop
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut inner = self.shared.inner.lock().await;
        for (_, entry) in inner.entries.drain() {
            if let Some(notifier) = entry.notifier {
                let _ = notifier.send(WatchOutcome::Cancelled);
            }
        }
        inner.loop_running = false;
        info!("Liquidity monitor shut down");
    }
}

async fn run(shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut ticker = interval(Duration::from_millis(shared.config.poll_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!("Liquidity monitor loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.poll_once().await;

                let mut inner = shared.inner.lock().await;
                if inner.entries.is_empty() {
                    inner.loop_running = false;
                    break;
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("Liquidity monitor loop stopped");
}

impl Shared {
    async fn read_pool(&self, pool: &Pubkey) -> Result<PoolState> {
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);
        let data = timeout(read_timeout, self.chain.get_account_bytes(pool))
            .await
            .map_err(|_| Error::RpcTimeout(self.config.read_timeout_ms))??
            .ok_or_else(|| Error::Rpc(format!("pool {} not found", pool)))?;
        self.codec.decode(*pool, &data)
    }

    async fn poll_once(&self) {
        // Snapshot so reads happen without the lock
        let targets: Vec<(Pubkey, Pubkey)> = {
            let inner = self.inner.lock().await;
            inner
                .entries
                .values()
                .filter(|e| e.notifier.is_some())
                .map(|e| (e.request.token, e.request.pool))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let reads = join_all(targets.iter().map(|(_, pool)| self.read_pool(pool))).await;

        let window = Duration::from_millis(self.config.liquidity_window_ms);
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        for ((token, pool), read) in targets.into_iter().zip(reads) {
            let state = match read {
                Ok(state) => state,
                Err(e) => {
                    warn!("Skipping {} this tick, pool {} unreadable: {}", token, pool, e);
                    continue;
                }
            };

            // Removed or re-added while we were reading
            let Some(entry) = inner.entries.get_mut(&token) else {
                continue;
            };
            if entry.request.pool != pool || entry.notifier.is_none() {
                continue;
            }

            let old_liquidity = entry.last_liquidity;
            let new_liquidity = state.liquidity();
            let fired = evaluate(
                old_liquidity,
                new_liquidity,
                now.saturating_duration_since(entry.last_observed_at),
                entry.request.min_liquidity,
                window,
            );
            entry.last_liquidity = new_liquidity;
            entry.last_observed_at = now;

            if !fired {
                debug!("{}: liquidity {} -> {}", token, old_liquidity, new_liquidity);
                continue;
            }

            info!(
                "Liquidity added for {}: {} -> {}",
                token, old_liquidity, new_liquidity
            );
            let event = LiquidityEvent {
                token,
                pool,
                old_liquidity,
                new_liquidity,
                observed_at: Utc::now(),
            };
            if let Some(notifier) = entry.notifier.take() {
                if notifier.send(WatchOutcome::Triggered(event)).is_err() {
                    debug!("Waiter for {} is gone, dropping watch", token);
                    inner.entries.remove(&token);
                }
            }
        }
    }
}
