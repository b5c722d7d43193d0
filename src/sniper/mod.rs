//! Snipe orchestration and transaction assembly

pub mod executor;
pub mod transaction;
pub mod types;

pub use executor::SniperExecutor;
pub use transaction::{SwapParams, TransactionBuilder};
pub use types::{FailureKind, SnipeConfig, SnipeFailure, SnipeResult, SnipeState, SnipeStatus};
