//! Pool watching

pub mod liquidity;

pub use liquidity::{LiquidityEvent, LiquidityMonitor, WatchOutcome, WatchRequest};
