//! Pool state decoding and constant-product math

pub mod amm;
pub mod state;

pub use amm::{min_amount_out, simulate_swap, Reserves, SwapDirection, SwapQuote};
pub use state::{PoolSide, PoolState, PoolStateCodec, PoolStatus, POOL_ACCOUNT_LEN};
