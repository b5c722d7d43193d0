//! RPC-backed chain client

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSendTransactionConfig,
    RpcSimulateTransactionAccountsConfig, RpcSimulateTransactionConfig, RpcTransactionConfig,
};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding, UiTransactionTokenBalance,
};
use tracing::{debug, info, warn};

use super::{
    ChainClient, ObservedSwap, SignatureStatus, SimulationResult, SwapProbe, TokenHolder,
    TradeSide,
};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::pool::{PoolState, SwapDirection};
use crate::sniper::transaction::{derive_ata, TransactionBuilder};

/// Base fee per signature in lamports
const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Chain client over the JSON-RPC API
pub struct RpcChainClient {
    rpc: RpcClient,
    builder: TransactionBuilder,
    /// Fee payer and token owner used for dry-run probes
    probe_owner: Pubkey,
}

impl RpcChainClient {
    pub fn new(config: &RpcConfig, amm_program_id: Pubkey, probe_owner: Pubkey) -> Result<Self> {
        let commitment = CommitmentConfig::from_str(&config.commitment)
            .map_err(|e| Error::Config(format!("Invalid commitment {}: {}", config.commitment, e)))?;

        let rpc = RpcClient::new_with_timeout_and_commitment(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
            commitment,
        );

        info!("RPC chain client initialized (commitment: {})", config.commitment);

        Ok(Self {
            rpc,
            builder: TransactionBuilder::new(amm_program_id),
            probe_owner,
        })
    }

    /// Current token balance of an account, 0 when it does not exist
    async fn token_balance(&self, account: &Pubkey) -> Result<u64> {
        let response = self
            .rpc
            .get_account_with_commitment(account, self.rpc.commitment())
            .await?;
        match response.value {
            Some(account) => Ok(spl_token::state::Account::unpack(&account.data)
                .map(|a| a.amount)
                .unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn fetch_swap(
        &self,
        signature: &str,
        pool: &PoolState,
        token: &Pubkey,
    ) -> Result<Option<ObservedSwap>> {
        let sig = Signature::from_str(signature)
            .map_err(|e| Error::Rpc(format!("Bad signature {}: {}", signature, e)))?;
        let tx = self
            .rpc
            .get_transaction_with_config(
                &sig,
                RpcTransactionConfig {
                    encoding: Some(UiTransactionEncoding::Base64),
                    commitment: Some(self.rpc.commitment()),
                    max_supported_transaction_version: Some(0),
                },
            )
            .await?;
        Ok(parse_swap(signature, &tx, pool, token))
    }
}

/// Reconstruct a swap from a confirmed transaction's token balance deltas
fn parse_swap(
    signature: &str,
    tx: &EncodedConfirmedTransactionWithStatusMeta,
    pool: &PoolState,
    token: &Pubkey,
) -> Option<ObservedSwap> {
    let meta = tx.transaction.meta.as_ref()?;
    if meta.err.is_some() {
        return None;
    }
    let decoded = tx.transaction.transaction.decode()?;
    let payer = *decoded.message.static_account_keys().first()?;

    let quote_mint = if pool.base_mint == *token {
        pool.quote_mint
    } else {
        pool.base_mint
    };

    let (pre, post) = match (&meta.pre_token_balances, &meta.post_token_balances) {
        (OptionSerializer::Some(pre), OptionSerializer::Some(post)) => (pre, post),
        _ => return None,
    };

    let token_delta = owner_delta(pre, post, &payer, token);
    let quote_delta = owner_delta(pre, post, &payer, &quote_mint);

    let side = trade_side(token_delta, quote_delta)?;

    let priority_lamports = meta
        .fee
        .saturating_sub(LAMPORTS_PER_SIGNATURE * decoded.signatures.len() as u64);
    let priority_fee = match meta.compute_units_consumed {
        OptionSerializer::Some(units) if units > 0 => priority_lamports
            .saturating_mul(1_000_000)
            / units,
        _ => 0,
    };

    Some(ObservedSwap {
        signature: signature.to_string(),
        slot: tx.slot,
        payer,
        side,
        token_amount: token_delta.unsigned_abs(),
        quote_amount: quote_delta.unsigned_abs(),
        priority_fee,
    })
}

/// Tokens in for quote out is a buy; the reverse is a sell
fn trade_side(token_delta: i128, quote_delta: i128) -> Option<TradeSide> {
    if token_delta > 0 && quote_delta <= 0 {
        Some(TradeSide::Buy)
    } else if token_delta < 0 && quote_delta >= 0 {
        Some(TradeSide::Sell)
    } else {
        None
    }
}

/// Net balance change of `mint` across accounts owned by `owner`
fn owner_delta(
    pre: &[UiTransactionTokenBalance],
    post: &[UiTransactionTokenBalance],
    owner: &Pubkey,
    mint: &Pubkey,
) -> i128 {
    let owner = owner.to_string();
    let mint = mint.to_string();
    let sum = |balances: &[UiTransactionTokenBalance]| -> i128 {
        balances
            .iter()
            .filter(|b| b.mint == mint)
            .filter(|b| matches!(&b.owner, OptionSerializer::Some(o) if *o == owner))
            .filter_map(|b| b.ui_token_amount.amount.parse::<i128>().ok())
            .sum()
    };
    sum(post) - sum(pre)
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.rpc.commitment())
            .await?;
        Ok(response.value.map(|account| account.data))
    }

    async fn get_recent_swaps(
        &self,
        pool: &PoolState,
        token: &Pubkey,
        limit: usize,
    ) -> Result<Vec<ObservedSwap>> {
        let signatures = self
            .rpc
            .get_signatures_for_address_with_config(
                &pool.address,
                GetConfirmedSignaturesForAddress2Config {
                    limit: Some(limit),
                    commitment: Some(self.rpc.commitment()),
                    ..Default::default()
                },
            )
            .await?;

        let fetches = signatures
            .iter()
            .filter(|s| s.err.is_none())
            .map(|s| self.fetch_swap(&s.signature, pool, token));

        let mut swaps = Vec::with_capacity(signatures.len());
        for result in join_all(fetches).await {
            match result {
                Ok(Some(swap)) => swaps.push(swap),
                Ok(None) => {}
                Err(e) => debug!("Skipping transaction: {}", e),
            }
        }

        // Signatures arrive newest first
        swaps.sort_by_key(|s| s.slot);
        Ok(swaps)
    }

    async fn get_recent_priority_fees(&self, addresses: &[Pubkey]) -> Result<Vec<u64>> {
        let fees = self.rpc.get_recent_prioritization_fees(addresses).await?;
        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }

    async fn get_token_holders(&self, mint: &Pubkey) -> Result<Vec<TokenHolder>> {
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::DataSize(spl_token::state::Account::LEN as u64),
                RpcFilterType::Memcmp(Memcmp::new_base58_encoded(0, mint.as_ref())),
            ]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.rpc.commitment()),
                ..Default::default()
            },
            ..Default::default()
        };

        let accounts = self
            .rpc
            .get_program_accounts_with_config(&spl_token::ID, config)
            .await?;

        let holders = accounts
            .into_iter()
            .filter_map(|(address, account)| {
                let token_account = spl_token::state::Account::unpack(&account.data).ok()?;
                Some(TokenHolder {
                    address,
                    owner: token_account.owner,
                    amount: token_account.amount,
                })
            })
            .collect();

        Ok(holders)
    }

    async fn simulate_swap(&self, probe: &SwapProbe) -> Result<u64> {
        let output_mint = match probe.direction {
            SwapDirection::BaseToQuote => probe.pool.quote_mint,
            SwapDirection::QuoteToBase => probe.pool.base_mint,
        };
        let output_account = derive_ata(&self.probe_owner, &output_mint);

        // A preceding swap that spends the output mint lowers the baseline
        let mut baseline = self.token_balance(&output_account).await?;
        if let Some((direction, amount_in)) = probe.preceding {
            if direction == probe.direction {
                return Err(Error::SimulationFailed(
                    "preceding swap must run in the opposite direction".to_string(),
                ));
            }
            baseline = baseline.saturating_sub(amount_in);
        }

        let transaction = self.builder.build_probe(&self.probe_owner, probe)?;
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(self.rpc.commitment()),
            encoding: Some(UiTransactionEncoding::Base64),
            accounts: Some(RpcSimulateTransactionAccountsConfig {
                encoding: Some(UiAccountEncoding::Base64),
                addresses: vec![output_account.to_string()],
            }),
            ..Default::default()
        };

        let response = self
            .rpc
            .simulate_transaction_with_config(&transaction, config)
            .await?;
        let value = response.value;

        if let Some(err) = value.err {
            for log in value.logs.unwrap_or_default() {
                debug!("  Log: {}", log);
            }
            return Err(Error::SimulationFailed(err.to_string()));
        }

        let post_balance = value
            .accounts
            .and_then(|accounts| accounts.into_iter().next().flatten())
            .and_then(|account| account.data.decode())
            .and_then(|data| spl_token::state::Account::unpack(&data).ok())
            .map(|account| account.amount)
            .ok_or_else(|| Error::SimulationFailed("no post-state for output account".to_string()))?;

        Ok(post_balance.saturating_sub(baseline))
    }

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationResult> {
        let response = self
            .rpc
            .simulate_transaction_with_config(
                transaction,
                RpcSimulateTransactionConfig {
                    sig_verify: false,
                    replace_recent_blockhash: true,
                    commitment: Some(self.rpc.commitment()),
                    ..Default::default()
                },
            )
            .await?;
        let value = response.value;

        let success = value.err.is_none();
        let error = value.err.map(|e| e.to_string());
        let logs = value.logs.unwrap_or_default();

        if success {
            debug!("Simulation succeeded, compute units: {:?}", value.units_consumed);
        } else {
            warn!("Simulation failed: {:?}", error);
            for log in &logs {
                debug!("  Log: {}", log);
            }
        }

        Ok(SimulationResult {
            success,
            error,
            compute_units: value.units_consumed,
            logs,
        })
    }

    async fn submit_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let signature = self
            .rpc
            .send_transaction_with_config(
                transaction,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    max_retries: Some(0),
                    ..Default::default()
                },
            )
            .await?;
        Ok(signature)
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(self.rpc.get_latest_blockhash().await?)
    }

    async fn get_signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let response = self.rpc.get_signature_statuses(&[*signature]).await?;
        Ok(response
            .value
            .into_iter()
            .next()
            .flatten()
            .map(|status| SignatureStatus {
                confirmations: status.confirmations,
                err: status.err.map(|e| e.to_string()),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use solana_account_decoder::parse_token::UiTokenAmount;
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;
    use solana_sdk::system_instruction;
    use solana_transaction_status::{
        EncodedTransaction, EncodedTransactionWithStatusMeta, TransactionBinaryEncoding,
        TransactionStatusMeta, TransactionTokenBalance,
    };

    use crate::pool::state::encode_pool_account;
    use crate::pool::PoolStateCodec;

    fn balance(index: u8, mint: &Pubkey, owner: &Pubkey, amount: u64) -> TransactionTokenBalance {
        TransactionTokenBalance {
            account_index: index,
            mint: mint.to_string(),
            ui_token_amount: UiTokenAmount {
                ui_amount: None,
                decimals: 6,
                amount: amount.to_string(),
                ui_amount_string: String::new(),
            },
            owner: owner.to_string(),
            program_id: spl_token::id().to_string(),
        }
    }

    fn ui(balances: &[TransactionTokenBalance]) -> Vec<UiTransactionTokenBalance> {
        balances.iter().cloned().map(Into::into).collect()
    }

    struct Setup {
        payer: Keypair,
        token: Pubkey,
        quote: Pubkey,
        pool: PoolState,
    }

    fn setup() -> Setup {
        let token = Pubkey::new_unique();
        let quote = Pubkey::new_unique();
        let address = Pubkey::new_unique();
        let data = encode_pool_account(0, token, quote, 1_000_000, 500_000);
        let pool = PoolStateCodec::new(25).decode(address, &data).unwrap();
        Setup {
            payer: Keypair::new(),
            token,
            quote,
            pool,
        }
    }

    fn confirmed(
        s: &Setup,
        pre: Vec<TransactionTokenBalance>,
        post: Vec<TransactionTokenBalance>,
    ) -> EncodedConfirmedTransactionWithStatusMeta {
        let ix = system_instruction::transfer(&s.payer.pubkey(), &Pubkey::new_unique(), 1);
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&s.payer.pubkey()),
            &[&s.payer],
            Hash::new_unique(),
        );
        let blob = base64::engine::general_purpose::STANDARD.encode(bincode::serialize(&tx).unwrap());

        let meta = TransactionStatusMeta {
            // base fee plus 10_000 lamports of priority
            fee: 15_000,
            pre_token_balances: Some(pre),
            post_token_balances: Some(post),
            compute_units_consumed: Some(100_000),
            ..TransactionStatusMeta::default()
        };

        EncodedConfirmedTransactionWithStatusMeta {
            slot: 42,
            transaction: EncodedTransactionWithStatusMeta {
                transaction: EncodedTransaction::Binary(blob, TransactionBinaryEncoding::Base64),
                meta: Some(meta.into()),
                version: None,
            },
            block_time: None,
        }
    }

    #[test]
    fn test_owner_delta_sums_only_owner_and_mint() {
        let owner = Pubkey::new_unique();
        let other = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let pre = ui(&[balance(1, &mint, &owner, 100), balance(2, &mint, &other, 5_000)]);
        let post = ui(&[
            balance(1, &mint, &owner, 400),
            balance(2, &mint, &other, 4_700),
            balance(3, &Pubkey::new_unique(), &owner, 999),
        ]);

        assert_eq!(owner_delta(&pre, &post, &owner, &mint), 300);
        assert_eq!(owner_delta(&pre, &post, &other, &mint), -300);
        // A fresh account only in post counts from zero
        let opened = ui(&[balance(4, &mint, &owner, 50)]);
        assert_eq!(owner_delta(&[], &opened, &owner, &mint), 50);
    }

    #[test]
    fn test_trade_side() {
        assert_eq!(trade_side(10, -5), Some(TradeSide::Buy));
        assert_eq!(trade_side(-10, 5), Some(TradeSide::Sell));
        assert_eq!(trade_side(10, 5), None);
        assert_eq!(trade_side(0, 0), None);
    }

    #[test]
    fn test_parse_buy() {
        let s = setup();
        let payer = s.payer.pubkey();
        let tx = confirmed(
            &s,
            vec![balance(1, &s.quote, &payer, 2_000)],
            vec![balance(1, &s.quote, &payer, 1_000), balance(2, &s.token, &payer, 1_900)],
        );

        let swap = parse_swap("sig-buy", &tx, &s.pool, &s.token).unwrap();
        assert_eq!(swap.side, TradeSide::Buy);
        assert_eq!(swap.payer, payer);
        assert_eq!(swap.slot, 42);
        assert_eq!(swap.token_amount, 1_900);
        assert_eq!(swap.quote_amount, 1_000);
        // 10_000 lamports over 100_000 CU
        assert_eq!(swap.priority_fee, 100_000);
    }

    #[test]
    fn test_parse_sell() {
        let s = setup();
        let payer = s.payer.pubkey();
        let tx = confirmed(
            &s,
            vec![balance(1, &s.quote, &payer, 0), balance(2, &s.token, &payer, 1_900)],
            vec![balance(1, &s.quote, &payer, 950), balance(2, &s.token, &payer, 0)],
        );

        let swap = parse_swap("sig-sell", &tx, &s.pool, &s.token).unwrap();
        assert_eq!(swap.side, TradeSide::Sell);
        assert_eq!(swap.token_amount, 1_900);
        assert_eq!(swap.quote_amount, 950);
    }

    #[test]
    fn test_parse_skips_unrelated_and_failed() {
        let s = setup();
        let payer = s.payer.pubkey();

        // Balances of someone else's accounts only
        let other = Pubkey::new_unique();
        let tx = confirmed(
            &s,
            vec![balance(1, &s.token, &other, 10)],
            vec![balance(1, &s.token, &other, 20)],
        );
        assert!(parse_swap("sig", &tx, &s.pool, &s.token).is_none());

        let mut failed = confirmed(
            &s,
            vec![balance(1, &s.quote, &payer, 2_000)],
            vec![balance(2, &s.token, &payer, 1_900)],
        );
        if let Some(meta) = failed.transaction.meta.as_mut() {
            meta.err = Some(solana_sdk::transaction::TransactionError::AccountNotFound);
        }
        assert!(parse_swap("sig", &failed, &s.pool, &s.token).is_none());
    }
}
