//! Position management
//!
//! Tracks positions opened after a snipe, their exit levels and realized P&L.
//! Closed positions stay in the book.

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::PositionConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Manual => "manual",
        };
        write!(f, "{}", name)
    }
}

/// A position in a token
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    /// uuid v4
    pub id: String,
    #[serde(with = "crate::serde_util::pubkey")]
    pub token: Pubkey,
    #[serde(with = "crate::serde_util::pubkey")]
    pub pool: Pubkey,
    /// Quote units per token
    pub entry_price: f64,
    /// Token units
    pub entry_amount: f64,
    pub status: PositionStatus,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    /// Distance below the high-water mark, in percent
    pub trailing_stop_pct: Option<f64>,
    pub highest_price: f64,
    pub current_price: f64,
    pub realized_pnl: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn cost_basis(&self) -> f64 {
        self.entry_price * self.entry_amount
    }

    pub fn current_value(&self) -> f64 {
        self.entry_amount * self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.current_value() - self.cost_basis()
    }

    pub fn unrealized_pnl_pct(&self) -> f64 {
        let cost = self.cost_basis();
        if cost == 0.0 {
            return 0.0;
        }
        (self.unrealized_pnl() / cost) * 100.0
    }

    /// Price at which the trailing stop fires
    pub fn trailing_stop_price(&self) -> Option<f64> {
        self.trailing_stop_pct
            .map(|pct| self.highest_price * (1.0 - pct / 100.0))
    }

    /// Exit trigger at the current price, checked take-profit first, then
    /// stop-loss, then trailing stop
    pub fn exit_trigger(&self) -> Option<ExitReason> {
        let price = self.current_price;
        if self.take_profit.is_some_and(|tp| price >= tp) {
            return Some(ExitReason::TakeProfit);
        }
        if self.stop_loss.is_some_and(|sl| price <= sl) {
            return Some(ExitReason::StopLoss);
        }
        if self.trailing_stop_price().is_some_and(|ts| price <= ts) {
            return Some(ExitReason::TrailingStop);
        }
        None
    }

    fn mark(&mut self, price: f64) {
        self.current_price = price;
        if price > self.highest_price {
            self.highest_price = price;
        }
    }

    fn close(&mut self, exit_price: f64, reason: ExitReason) -> f64 {
        self.mark(exit_price);
        let pnl = (exit_price - self.entry_price) * self.entry_amount;
        self.status = PositionStatus::Closed;
        self.realized_pnl = Some(pnl);
        self.exit_reason = Some(reason);
        self.closed_at = Some(Utc::now());
        pnl
    }
}

/// Position book
pub struct PositionManager {
    positions: Arc<RwLock<HashMap<String, Position>>>,
    config: PositionConfig,
}

impl PositionManager {
    pub fn new(config: PositionConfig) -> Self {
        Self {
            positions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }

    /// Open a position with the configured default exit levels
    pub async fn open(
        &self,
        token: Pubkey,
        pool: Pubkey,
        entry_price: f64,
        entry_amount: f64,
    ) -> Result<Position> {
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(Error::Internal(format!("Invalid entry price {}", entry_price)));
        }
        if !entry_amount.is_finite() || entry_amount <= 0.0 {
            return Err(Error::InvalidPositionSize {
                size: entry_amount,
                min: 0.0,
                max: f64::MAX,
            });
        }

        let stop_loss = (self.config.stop_loss_pct > 0.0 && self.config.stop_loss_pct < 100.0)
            .then(|| entry_price * (1.0 - self.config.stop_loss_pct / 100.0));
        let take_profit = (self.config.take_profit_pct > 0.0)
            .then(|| entry_price * (1.0 + self.config.take_profit_pct / 100.0));

        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            token,
            pool,
            entry_price,
            entry_amount,
            status: PositionStatus::Open,
            take_profit,
            stop_loss,
            trailing_stop_pct: self.config.trailing_stop_pct,
            highest_price: entry_price,
            current_price: entry_price,
            realized_pnl: None,
            exit_reason: None,
            opened_at: Utc::now(),
            closed_at: None,
        };

        let mut positions = self.positions.write().await;
        positions.insert(position.id.clone(), position.clone());
        drop(positions);

        info!(
            "Opened position {} in {}: {} tokens @ {}",
            position.id, token, entry_amount, entry_price
        );

        Ok(position)
    }

    /// Close an open position manually, returning the closed record
    pub async fn close(&self, id: &str, exit_price: f64) -> Result<Position> {
        self.close_with_reason(id, exit_price, ExitReason::Manual).await
    }

    pub async fn close_with_reason(
        &self,
        id: &str,
        exit_price: f64,
        reason: ExitReason,
    ) -> Result<Position> {
        let mut positions = self.positions.write().await;
        let position = positions
            .get_mut(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_string()))?;

        if !position.is_open() {
            return Err(Error::PositionClosed(id.to_string()));
        }

        let pnl = position.close(exit_price, reason);
        info!("Closed position {} ({}) with P&L: {} SOL", id, reason, pnl);
        Ok(position.clone())
    }

    /// Move the stop-loss; it must sit strictly between zero and the current price
    pub async fn update_stop_loss(&self, id: &str, price: f64) -> Result<Position> {
        let mut positions = self.positions.write().await;
        let position = Self::open_mut(&mut positions, id)?;

        if !(price > 0.0 && price < position.current_price) {
            return Err(Error::InvalidStopPrice {
                price,
                current: position.current_price,
            });
        }

        position.stop_loss = Some(price);
        debug!("Position {} stop-loss -> {}", id, price);
        Ok(position.clone())
    }

    /// Move the take-profit; it must sit above the current price
    pub async fn update_take_profit(&self, id: &str, price: f64) -> Result<Position> {
        let mut positions = self.positions.write().await;
        let position = Self::open_mut(&mut positions, id)?;

        if !(price > position.current_price) || !price.is_finite() {
            return Err(Error::InvalidTakeProfit {
                price,
                current: position.current_price,
            });
        }

        position.take_profit = Some(price);
        debug!("Position {} take-profit -> {}", id, price);
        Ok(position.clone())
    }

    /// Refresh the price of an open position and close it if an exit fires.
    /// Returns the closed record when it does.
    pub async fn apply_price(&self, id: &str, price: f64) -> Option<Position> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(id).filter(|p| p.is_open())?;

        position.mark(price);
        let reason = position.exit_trigger()?;
        let pnl = position.close(price, reason);
        info!("Exit {} on position {} @ {}, P&L: {} SOL", reason, id, price, pnl);
        Some(position.clone())
    }

    pub async fn get(&self, id: &str) -> Option<Position> {
        self.positions.read().await.get(id).cloned()
    }

    /// Open positions, oldest first
    pub async fn list_open(&self) -> Vec<Position> {
        let positions = self.positions.read().await;
        let mut open: Vec<Position> = positions.values().filter(|p| p.is_open()).cloned().collect();
        open.sort_by_key(|p| p.opened_at);
        open
    }

    pub async fn list_all(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn open_count(&self) -> usize {
        self.positions.read().await.values().filter(|p| p.is_open()).count()
    }

    /// Total unrealized P&L over open positions
    pub async fn total_unrealized_pnl(&self) -> f64 {
        let positions = self.positions.read().await;
        positions
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl())
            .sum()
    }

    fn open_mut<'a>(
        positions: &'a mut HashMap<String, Position>,
        id: &str,
    ) -> Result<&'a mut Position> {
        let position = positions
            .get_mut(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_string()))?;
        if !position.is_open() {
            return Err(Error::PositionClosed(id.to_string()));
        }
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn manager() -> PositionManager {
        PositionManager::new(PositionConfig {
            take_profit_pct: 50.0,
            stop_loss_pct: 30.0,
            trailing_stop_pct: Some(20.0),
            price_poll_interval_ms: 1000,
            exit_channel_capacity: 16,
        })
    }

    async fn opened(manager: &PositionManager) -> Position {
        manager
            .open(Pubkey::new_unique(), Pubkey::new_unique(), 0.01, 1_000.0)
            .await
            .unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn test_open_applies_defaults() {
        let manager = manager();
        let position = opened(&manager).await;

        assert!(uuid::Uuid::parse_str(&position.id).is_ok());
        assert!(approx(position.take_profit.unwrap(), 0.015));
        assert!(approx(position.stop_loss.unwrap(), 0.007));
        assert_eq!(position.trailing_stop_pct, Some(20.0));
        assert_eq!(position.highest_price, 0.01);
        assert_eq!(manager.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_is_retained() {
        let manager = manager();
        let position = opened(&manager).await;

        let closed = manager.close(&position.id, 0.012).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.exit_reason, Some(ExitReason::Manual));
        assert!(approx(closed.realized_pnl.unwrap(), 2.0));
        assert!(closed.closed_at.is_some());

        assert!(manager.list_open().await.is_empty());
        assert_eq!(manager.get(&position.id).await.unwrap().status, PositionStatus::Closed);

        let err = assert_err!(manager.close(&position.id, 0.012).await);
        assert!(matches!(err, Error::PositionClosed(_)));
        let err = assert_err!(manager.close("missing", 0.012).await);
        assert!(matches!(err, Error::PositionNotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_loss_validation() {
        let manager = manager();
        let position = opened(&manager).await;

        for bad in [0.0, -1.0, 0.01, 0.02] {
            assert!(matches!(
                manager.update_stop_loss(&position.id, bad).await,
                Err(Error::InvalidStopPrice { .. })
            ));
        }
        let updated = assert_ok!(manager.update_stop_loss(&position.id, 0.009).await);
        assert_eq!(updated.stop_loss, Some(0.009));
    }

    #[tokio::test]
    async fn test_take_profit_validation() {
        let manager = manager();
        let position = opened(&manager).await;

        for bad in [0.005, 0.01] {
            assert!(matches!(
                manager.update_take_profit(&position.id, bad).await,
                Err(Error::InvalidTakeProfit { .. })
            ));
        }
        let updated = assert_ok!(manager.update_take_profit(&position.id, 0.03).await);
        assert_eq!(updated.take_profit, Some(0.03));
    }

    #[tokio::test]
    async fn test_take_profit_checked_before_stop_loss() {
        let manager = manager();
        let position = opened(&manager).await;

        // A stop above entry and a take-profit just below it both trigger at 0.0125
        {
            let mut positions = manager.positions.write().await;
            let p = positions.get_mut(&position.id).unwrap();
            p.take_profit = Some(0.012);
            p.stop_loss = Some(0.013);
        }
        let closed = manager.apply_price(&position.id, 0.0125).await.unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
    }

    #[tokio::test]
    async fn test_trailing_stop_follows_high() {
        let manager = manager();
        let position = opened(&manager).await;

        assert!(manager.apply_price(&position.id, 0.014).await.is_none());
        let p = manager.get(&position.id).await.unwrap();
        assert_eq!(p.highest_price, 0.014);
        assert!(approx(p.trailing_stop_price().unwrap(), 0.0112));

        // Falls back below 80% of the high but stays above the fixed stop
        let closed = manager.apply_price(&position.id, 0.011).await.unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::TrailingStop));
        assert!(approx(closed.realized_pnl.unwrap(), 1.0));

        // Closed positions ignore further prices
        assert!(manager.apply_price(&position.id, 0.001).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_loss_fires() {
        let manager = manager();
        let position = opened(&manager).await;
        let closed = manager.apply_price(&position.id, 0.006).await.unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        assert!(closed.realized_pnl.unwrap() < 0.0);
    }

    #[test]
    fn test_position_pnl() {
        let position = Position {
            id: "p".into(),
            token: Pubkey::new_unique(),
            pool: Pubkey::new_unique(),
            entry_price: 0.00000001,
            entry_amount: 1_000_000.0,
            status: PositionStatus::Open,
            take_profit: None,
            stop_loss: None,
            trailing_stop_pct: None,
            highest_price: 0.000000015,
            current_price: 0.000000015,
            realized_pnl: None,
            exit_reason: None,
            opened_at: Utc::now(),
            closed_at: None,
        };

        assert!((position.current_value() - 0.015).abs() < 0.0001);
        assert!((position.unrealized_pnl() - 0.005).abs() < 0.0001);
        assert!((position.unrealized_pnl_pct() - 50.0).abs() < 0.1);
        assert_eq!(position.exit_trigger(), None);
    }
}
