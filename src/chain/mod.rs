//! Chain collaborators
//!
//! Everything the engine reads from or writes to the chain goes through
//! [`ChainClient`]; signing goes through [`TransactionSigner`].

pub mod rpc;
pub mod signer;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::Serialize;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};

use crate::error::Result;
use crate::pool::{PoolState, SwapDirection};

pub use rpc::RpcChainClient;
pub use signer::KeypairSigner;

/// Side of an observed trade, relative to the token being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A confirmed swap touching a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedSwap {
    pub signature: String,
    pub slot: u64,
    pub payer: Pubkey,
    pub side: TradeSide,
    /// Token units bought or sold
    pub token_amount: u128,
    /// Quote units paid or received
    pub quote_amount: u128,
    /// Priority fee in micro-lamports per compute unit
    pub priority_fee: u64,
}

/// One token account holding a mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolder {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

/// Dry-run request for a single swap
#[derive(Debug, Clone)]
pub struct SwapProbe {
    pub pool: PoolState,
    pub direction: SwapDirection,
    pub amount_in: u64,
    /// Swap executed earlier in the same dry-run, so a sell can spend
    /// tokens acquired by a preceding buy
    pub preceding: Option<(SwapDirection, u64)>,
}

/// Simulation result
#[derive(Debug, Clone, Default)]
pub struct SimulationResult {
    /// Whether simulation succeeded
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
    /// Compute units consumed
    pub compute_units: Option<u64>,
    /// Logs from simulation
    pub logs: Vec<String>,
}

/// Status of a submitted signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// `None` once the transaction is rooted
    pub confirmations: Option<usize>,
    pub err: Option<String>,
}

impl SignatureStatus {
    pub fn is_confirmed(&self, min_confirmations: usize) -> bool {
        self.err.is_none()
            && self
                .confirmations
                .map_or(true, |count| count >= min_confirmations)
    }
}

/// Chain read/write service
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Raw account data, `None` when the account does not exist
    async fn get_account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    /// Most recent swaps on `pool` involving `token`, oldest first
    async fn get_recent_swaps(
        &self,
        pool: &PoolState,
        token: &Pubkey,
        limit: usize,
    ) -> Result<Vec<ObservedSwap>>;

    /// Recent prioritization fees (micro-lamports/CU) for transactions
    /// locking any of `addresses`
    async fn get_recent_priority_fees(&self, addresses: &[Pubkey]) -> Result<Vec<u64>>;

    /// All token accounts of `mint`
    async fn get_token_holders(&self, mint: &Pubkey) -> Result<Vec<TokenHolder>>;

    /// Dry-run a swap and return the amount actually received
    async fn simulate_swap(&self, probe: &SwapProbe) -> Result<u64>;

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationResult>;

    /// Send once; the client must not resend on its own
    async fn submit_transaction(&self, transaction: &Transaction) -> Result<Signature>;

    async fn get_latest_blockhash(&self) -> Result<Hash>;

    async fn get_signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>>;
}

/// Transaction signer
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Sign `transaction` in place with `blockhash`
    fn sign(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<()>;
}
