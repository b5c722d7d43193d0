//! Error types for the sniping engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniping engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // Pool decoding and AMM math
    #[error("Pool decode failed: {0}")]
    Decode(String),

    #[error("Division by zero: reserve_in={reserve_in}, reserve_out={reserve_out}")]
    DivideByZero { reserve_in: u128, reserve_out: u128 },

    #[error("Arithmetic overflow in {0}")]
    MathOverflow(&'static str),

    #[error("Invalid fee: {0}bps exceeds 10000")]
    InvalidFee(u16),

    // Snipe gates
    #[error("Invalid token {token}: {reason}")]
    InvalidToken { token: String, reason: String },

    #[error("Insufficient liquidity for {token}: {liquidity} < required {required}")]
    InsufficientLiquidity {
        token: String,
        liquidity: u128,
        required: u128,
    },

    #[error("Risk too high for {token}: score {score}, max {max_score} (honeypot: {honeypot})")]
    HighRisk {
        token: String,
        score: u8,
        max_score: u8,
        honeypot: bool,
    },

    #[error("Sandwich risk for {token}: {patterns} pattern(s) in recent window")]
    SandwichDetected { token: String, patterns: usize },

    #[error("Simulation failed: {0}")]
    SimulationFailed(String),

    #[error("Price impact {price_impact_bps}bps exceeds max slippage {max_slippage_bps}bps")]
    ExcessiveSlippage {
        price_impact_bps: u64,
        max_slippage_bps: u16,
    },

    #[error("Network priority fee {observed} exceeds max {max} micro-lamports/CU")]
    HighGasPrice { observed: u64, max: u64 },

    #[error("Timed out during {stage} after {elapsed_ms}ms")]
    Timeout { stage: String, elapsed_ms: u64 },

    // Transaction errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    // Monitoring errors
    #[error("Token already monitored: {0}")]
    AlreadyMonitored(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    // Position errors
    #[error("Invalid position size {size}: allowed range [{min}, {max}]")]
    InvalidPositionSize { size: f64, min: f64, max: f64 },

    #[error("Invalid stop price {price} (current price {current})")]
    InvalidStopPrice { price: f64, current: f64 },

    #[error("Invalid take profit {price} (current price {current})")]
    InvalidTakeProfit { price: f64, current: f64 },

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position already closed: {0}")]
    PositionClosed(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Rpc(_) | Error::RpcTimeout(_))
    }

    /// Errors that indicate corrupt input rather than a transient condition
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Decode(_) | Error::DivideByZero { .. } | Error::MathOverflow(_) | Error::InvalidFee(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
