//! Transaction building for AMM swaps

use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    transaction::Transaction,
};
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;

use crate::chain::SwapProbe;
use crate::error::{Error, Result};
use crate::pool::{PoolState, SwapDirection};

/// Swap instruction tag of the AMM program
pub const SWAP_INSTRUCTION_TAG: u8 = 9;

/// Compute units reserved for dry-run probes
const PROBE_COMPUTE_UNIT_LIMIT: u32 = 400_000;

/// Parameters of a single swap transaction
#[derive(Debug, Clone, Copy)]
pub struct SwapParams {
    pub direction: SwapDirection,
    pub amount_in: u64,
    pub min_amount_out: u64,
    /// Micro-lamports per compute unit
    pub priority_fee: u64,
    pub compute_unit_limit: u32,
}

/// Transaction builder for constant-product pool swaps
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    program_id: Pubkey,
}

impl TransactionBuilder {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Build an unsigned swap transaction paid by `payer`
    pub fn build_swap(&self, payer: &Pubkey, pool: &PoolState, params: &SwapParams) -> Result<Transaction> {
        let mut instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(params.compute_unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(params.priority_fee),
        ];
        instructions.extend(self.ata_instructions(payer, pool));
        instructions.push(self.swap_instruction(
            payer,
            pool,
            params.direction,
            params.amount_in,
            params.min_amount_out,
        )?);

        let transaction = Transaction::new_with_payer(&instructions, Some(payer));
        check_size(&transaction)?;
        Ok(transaction)
    }

    /// Build an unsigned dry-run transaction for a probe. Slippage is left
    /// open so the simulation reports what the pool actually pays out.
    pub fn build_probe(&self, payer: &Pubkey, probe: &SwapProbe) -> Result<Transaction> {
        let mut instructions = vec![ComputeBudgetInstruction::set_compute_unit_limit(
            PROBE_COMPUTE_UNIT_LIMIT,
        )];
        instructions.extend(self.ata_instructions(payer, &probe.pool));

        if let Some((direction, amount_in)) = probe.preceding {
            instructions.push(self.swap_instruction(payer, &probe.pool, direction, amount_in, 0)?);
        }
        instructions.push(self.swap_instruction(
            payer,
            &probe.pool,
            probe.direction,
            probe.amount_in,
            0,
        )?);

        Ok(Transaction::new_with_payer(&instructions, Some(payer)))
    }

    /// Idempotent creation of the payer's token accounts for both pool mints
    pub fn ata_instructions(&self, payer: &Pubkey, pool: &PoolState) -> Vec<Instruction> {
        [pool.base_mint, pool.quote_mint]
            .iter()
            .map(|mint| create_associated_token_account_idempotent(payer, payer, mint, &spl_token::ID))
            .collect()
    }

    /// Build the swap instruction
    pub fn swap_instruction(
        &self,
        owner: &Pubkey,
        pool: &PoolState,
        direction: SwapDirection,
        amount_in: u64,
        min_amount_out: u64,
    ) -> Result<Instruction> {
        let authority = pool_authority(pool, &self.program_id)?;
        let base_vault = derive_ata(&authority, &pool.base_mint);
        let quote_vault = derive_ata(&authority, &pool.quote_mint);

        let (source_mint, destination_mint) = match direction {
            SwapDirection::BaseToQuote => (pool.base_mint, pool.quote_mint),
            SwapDirection::QuoteToBase => (pool.quote_mint, pool.base_mint),
        };

        let mut data = Vec::with_capacity(17);
        data.push(SWAP_INSTRUCTION_TAG);
        data.extend_from_slice(&amount_in.to_le_bytes());
        data.extend_from_slice(&min_amount_out.to_le_bytes());

        // Order matters! Must match the AMM program's account list
        let accounts = vec![
            AccountMeta::new(pool.address, false),                      // pool
            AccountMeta::new_readonly(authority, false),                // pool authority
            AccountMeta::new(*owner, true),                             // user (signer)
            AccountMeta::new(derive_ata(owner, &source_mint), false),   // user source
            AccountMeta::new(derive_ata(owner, &destination_mint), false), // user destination
            AccountMeta::new(base_vault, false),                        // base vault
            AccountMeta::new(quote_vault, false),                       // quote vault
            AccountMeta::new_readonly(spl_token::ID, false),            // token program
        ];

        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data,
        })
    }
}

/// Pool authority PDA, seeded by the pool address and its stored nonce
pub fn pool_authority(pool: &PoolState, program_id: &Pubkey) -> Result<Pubkey> {
    Pubkey::create_program_address(&[pool.address.as_ref(), &[pool.nonce]], program_id)
        .map_err(|e| Error::TransactionBuild(format!("Invalid pool authority seeds for {}: {}", pool.address, e)))
}

/// Derive associated token account address
pub fn derive_ata(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address(wallet, mint)
}

/// Serialized size of a transaction, failing when it does not fit in a packet
pub fn check_size(transaction: &Transaction) -> Result<usize> {
    let size = bincode::serialized_size(transaction)
        .map_err(|e| Error::TransactionBuild(format!("Failed to size transaction: {}", e)))?
        as usize;
    if size > PACKET_DATA_SIZE {
        return Err(Error::TransactionBuild(format!(
            "Transaction is {} bytes, packet limit is {}",
            size, PACKET_DATA_SIZE
        )));
    }
    Ok(size)
}
