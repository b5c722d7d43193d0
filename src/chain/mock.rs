//! In-memory chain for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::program_option::COption;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

use super::{
    ChainClient, ObservedSwap, SignatureStatus, SimulationResult, SwapProbe, TokenHolder,
};
use crate::error::{Error, Result};
use crate::pool::amm::simulate_swap;
use crate::pool::state::encode_pool_account;

#[derive(Default)]
struct MockState {
    accounts: HashMap<Pubkey, Vec<u8>>,
    failing_accounts: HashSet<Pubkey>,
    swaps: Vec<ObservedSwap>,
    priority_fees: Vec<u64>,
    holders: HashMap<Pubkey, Vec<TokenHolder>>,
    holders_error: bool,
    account_delay: Option<Duration>,
    buy_tax_bps: u64,
    sell_tax_bps: u64,
    sell_output_zero: bool,
    buy_fails: bool,
    preflight_error: Option<String>,
    tx_error: Option<String>,
    never_confirms: bool,
}

/// Scriptable [`ChainClient`]
#[derive(Default)]
pub(crate) struct MockChain {
    state: Mutex<MockState>,
    submits: AtomicUsize,
    account_reads: AtomicUsize,
    swap_probes: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.state.lock().unwrap().accounts.insert(address, data);
    }

    /// Store an active pool account with the given reserves
    pub fn set_pool(&self, address: Pubkey, base_mint: Pubkey, quote_mint: Pubkey, base: u64, quote: u64) {
        self.set_account(address, encode_pool_account(0, base_mint, quote_mint, base, quote));
    }

    /// Store an initialized SPL mint
    pub fn set_mint(&self, mint: Pubkey, mint_authority: Option<Pubkey>, freeze_authority: Option<Pubkey>) {
        self.set_account(mint, mint_account(mint_authority, freeze_authority, 1_000_000_000));
    }

    pub fn fail_account(&self, address: Pubkey) {
        self.state.lock().unwrap().failing_accounts.insert(address);
    }

    pub fn set_account_delay(&self, delay: Duration) {
        self.state.lock().unwrap().account_delay = Some(delay);
    }

    pub fn set_swaps(&self, swaps: Vec<ObservedSwap>) {
        self.state.lock().unwrap().swaps = swaps;
    }

    pub fn set_priority_fees(&self, fees: Vec<u64>) {
        self.state.lock().unwrap().priority_fees = fees;
    }

    pub fn set_holders(&self, mint: Pubkey, holders: Vec<TokenHolder>) {
        self.state.lock().unwrap().holders.insert(mint, holders);
    }

    pub fn fail_holders(&self) {
        self.state.lock().unwrap().holders_error = true;
    }

    pub fn set_taxes(&self, buy_tax_bps: u64, sell_tax_bps: u64) {
        let mut state = self.state.lock().unwrap();
        state.buy_tax_bps = buy_tax_bps;
        state.sell_tax_bps = sell_tax_bps;
    }

    pub fn set_sell_output_zero(&self) {
        self.state.lock().unwrap().sell_output_zero = true;
    }

    pub fn set_buy_fails(&self) {
        self.state.lock().unwrap().buy_fails = true;
    }

    pub fn set_preflight_error(&self, error: &str) {
        self.state.lock().unwrap().preflight_error = Some(error.to_string());
    }

    pub fn set_tx_error(&self, error: &str) {
        self.state.lock().unwrap().tx_error = Some(error.to_string());
    }

    pub fn set_never_confirms(&self) {
        self.state.lock().unwrap().never_confirms = true;
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn account_reads(&self) -> usize {
        self.account_reads.load(Ordering::SeqCst)
    }

    /// Calls to `simulate_swap`
    pub fn swap_probes(&self) -> usize {
        self.swap_probes.load(Ordering::SeqCst)
    }
}

/// Packed SPL mint account
pub(crate) fn mint_account(
    mint_authority: Option<Pubkey>,
    freeze_authority: Option<Pubkey>,
    supply: u64,
) -> Vec<u8> {
    let mint = spl_token::state::Mint {
        mint_authority: mint_authority.map_or(COption::None, COption::Some),
        supply,
        decimals: 6,
        is_initialized: true,
        freeze_authority: freeze_authority.map_or(COption::None, COption::Some),
    };
    let mut data = vec![0u8; spl_token::state::Mint::LEN];
    spl_token::state::Mint::pack(mint, &mut data).unwrap();
    data
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.account_reads.fetch_add(1, Ordering::SeqCst);
        let (delay, failing, data) = {
            let state = self.state.lock().unwrap();
            (
                state.account_delay,
                state.failing_accounts.contains(address),
                state.accounts.get(address).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(Error::Rpc(format!("account {} unavailable", address)));
        }
        Ok(data)
    }

    async fn get_recent_swaps(
        &self,
        _pool: &crate::pool::PoolState,
        _token: &Pubkey,
        limit: usize,
    ) -> Result<Vec<ObservedSwap>> {
        let swaps = self.state.lock().unwrap().swaps.clone();
        let skip = swaps.len().saturating_sub(limit);
        Ok(swaps.into_iter().skip(skip).collect())
    }

    async fn get_recent_priority_fees(&self, _addresses: &[Pubkey]) -> Result<Vec<u64>> {
        Ok(self.state.lock().unwrap().priority_fees.clone())
    }

    async fn get_token_holders(&self, mint: &Pubkey) -> Result<Vec<TokenHolder>> {
        let state = self.state.lock().unwrap();
        if state.holders_error {
            return Err(Error::Rpc("getProgramAccounts disabled".to_string()));
        }
        Ok(state.holders.get(mint).cloned().unwrap_or_default())
    }

    async fn simulate_swap(&self, probe: &SwapProbe) -> Result<u64> {
        self.swap_probes.fetch_add(1, Ordering::SeqCst);
        let (buy_tax, sell_tax, sell_zero, buy_fails) = {
            let state = self.state.lock().unwrap();
            (
                state.buy_tax_bps,
                state.sell_tax_bps,
                state.sell_output_zero,
                state.buy_fails,
            )
        };

        let mut reserves = probe.pool.reserves();
        if let Some((direction, amount_in)) = probe.preceding {
            let quote = simulate_swap(&reserves, amount_in as u128, probe.pool.fee_bps, direction)?;
            reserves = reserves.after_swap(direction, &quote)?;
        }

        let quote = simulate_swap(
            &reserves,
            probe.amount_in as u128,
            probe.pool.fee_bps,
            probe.direction,
        )?;

        let is_sell = probe.preceding.is_some();
        if is_sell && sell_zero {
            return Ok(0);
        }
        if !is_sell && buy_fails {
            return Err(Error::SimulationFailed("custom program error: 0x1".to_string()));
        }

        let tax = if is_sell { sell_tax } else { buy_tax };
        let taxed = quote.amount_out * (10_000 - tax.min(10_000) as u128) / 10_000;
        Ok(taxed as u64)
    }

    async fn simulate_transaction(&self, _transaction: &Transaction) -> Result<SimulationResult> {
        let error = self.state.lock().unwrap().preflight_error.clone();
        Ok(SimulationResult {
            success: error.is_none(),
            error,
            compute_units: Some(42_000),
            logs: vec![],
        })
    }

    async fn submit_transaction(&self, _transaction: &Transaction) -> Result<Signature> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(Signature::new_unique())
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }

    async fn get_signature_status(&self, _signature: &Signature) -> Result<Option<SignatureStatus>> {
        let state = self.state.lock().unwrap();
        if state.never_confirms {
            return Ok(None);
        }
        Ok(Some(SignatureStatus {
            confirmations: Some(32),
            err: state.tx_error.clone(),
        }))
    }
}
