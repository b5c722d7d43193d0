//! AMM Sniper Library
//!
//! Risk-gated liquidity sniping for constant-product AMM pools on Solana:
//! token risk scoring, swap math, liquidity-triggered execution with MEV
//! protection, position sizing and exit triggers.

pub mod chain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod mev;
pub mod monitor;
pub mod pool;
pub mod position;
pub mod risk;
pub mod sniper;

mod serde_util;

// Re-export commonly used types
pub use config::Config;
pub use engine::SniperEngine;
pub use error::{Error, Result};
