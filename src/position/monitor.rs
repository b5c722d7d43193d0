//! Exit-trigger monitor for open positions
//!
//! One task polls the pool of every open position on a fixed interval,
//! refreshes the position's price and closes it when take-profit, stop-loss
//! or the trailing stop is hit. Each close is reported as an [`ExitSignal`].
//!
//! Triggers are best-effort: a price that gaps through a level between two
//! ticks is only seen on the next tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::error::{Error, Result};
use crate::pool::{PoolState, PoolStateCodec};

use super::manager::{ExitReason, Position, PositionManager};

/// A position was closed by an exit trigger
#[derive(Debug, Clone, Serialize)]
pub struct ExitSignal {
    pub position: Position,
    pub reason: ExitReason,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

pub struct PositionMonitor {
    chain: Arc<dyn ChainClient>,
    codec: PoolStateCodec,
    manager: Arc<PositionManager>,
    read_timeout: Duration,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl PositionMonitor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        codec: PoolStateCodec,
        manager: Arc<PositionManager>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            codec,
            manager,
            read_timeout,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the polling loop. Exit signals arrive on the returned channel.
    pub fn start(self: &Arc<Self>) -> Result<mpsc::Receiver<ExitSignal>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled("position monitor is shut down".to_string()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("position monitor already running".to_string()));
        }

        let config = self.manager.config();
        let (tx, rx) = mpsc::channel(config.exit_channel_capacity.max(1));
        let poll_interval = Duration::from_millis(config.price_poll_interval_ms);

        info!(
            "Starting position monitor with {}ms poll interval",
            config.price_poll_interval_ms
        );

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for signal in monitor.tick().await {
                            if tx.send(signal).await.is_err() {
                                debug!("Exit signal channel closed");
                                monitor.running.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                    _ = monitor.shutdown.cancelled() => {
                        info!("Position monitor shutting down");
                        break;
                    }
                }
            }
            monitor.running.store(false, Ordering::SeqCst);
        });

        Ok(rx)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Evaluate every open position once. Returns the exits that fired.
    pub async fn tick(&self) -> Vec<ExitSignal> {
        let open = self.manager.list_open().await;
        if open.is_empty() {
            return Vec::new();
        }

        // One read per pool even if several positions share it
        let mut pools: Vec<Pubkey> = open.iter().map(|p| p.pool).collect();
        pools.sort();
        pools.dedup();

        let reads = join_all(pools.iter().map(|pool| self.read_pool(pool))).await;
        let states: HashMap<Pubkey, PoolState> = pools
            .into_iter()
            .zip(reads)
            .filter_map(|(pool, read)| match read {
                Ok(state) => Some((pool, state)),
                Err(e) => {
                    warn!("Skipping pool {} this tick: {}", pool, e);
                    None
                }
            })
            .collect();

        let mut signals = Vec::new();
        for position in open {
            let Some(price) = states
                .get(&position.pool)
                .and_then(|state| state.ui_price_of(&position.token))
            else {
                continue;
            };

            debug!("Position {}: price {}", position.id, price);
            if let Some(closed) = self.manager.apply_price(&position.id, price).await {
                let reason = closed.exit_reason.unwrap_or(ExitReason::Manual);
                signals.push(ExitSignal {
                    position: closed,
                    reason,
                    price,
                    observed_at: Utc::now(),
                });
            }
        }
        signals
    }

    async fn read_pool(&self, pool: &Pubkey) -> Result<PoolState> {
        let data = timeout(self.read_timeout, self.chain.get_account_bytes(pool))
            .await
            .map_err(|_| Error::RpcTimeout(self.read_timeout.as_millis() as u64))??
            .ok_or_else(|| Error::Rpc(format!("pool {} not found", pool)))?;
        self.codec.decode(*pool, &data)
    }
}
