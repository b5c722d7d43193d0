//! Pool account decoding
//!
//! The pool account is a fixed little-endian layout with no discriminator:
//!
//! | field          | type     |
//! |----------------|----------|
//! | status         | u8       |
//! | nonce          | u8       |
//! | base_mint      | [u8; 32] |
//! | quote_mint     | [u8; 32] |
//! | lp_mint        | [u8; 32] |
//! | base_decimals  | u8       |
//! | quote_decimals | u8       |
//! | base_reserve   | u64      |
//! | quote_reserve  | u64      |
//! | lp_supply      | u64      |
//! | open_time      | i64      |
//!
//! Field order and widths must match the exchange's on-chain schema exactly.

use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use super::amm::{Reserves, SwapDirection};
use crate::error::{Error, Result};

/// Size of the pool account layout in bytes
pub const POOL_ACCOUNT_LEN: usize = 1 + 1 + 32 * 3 + 1 + 1 + 8 * 3 + 8;

/// Pool trading status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Active,
    Disabled,
    Paused,
}

impl TryFrom<u8> for PoolStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PoolStatus::Active),
            1 => Ok(PoolStatus::Disabled),
            2 => Ok(PoolStatus::Paused),
            other => Err(Error::Decode(format!("unknown pool status byte {}", other))),
        }
    }
}

/// Raw on-chain layout
#[derive(Debug, Clone, BorshDeserialize, BorshSerialize)]
pub(crate) struct RawPoolAccount {
    pub status: u8,
    pub nonce: u8,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub base_reserve: u64,
    pub quote_reserve: u64,
    pub lp_supply: u64,
    pub open_time: i64,
}

/// Which side of the pool a mint sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSide {
    Base,
    Quote,
}

/// Decoded snapshot of a pool. Superseded, never mutated, by each new read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolState {
    #[serde(with = "crate::serde_util::pubkey")]
    pub address: Pubkey,
    #[serde(with = "crate::serde_util::pubkey")]
    pub base_mint: Pubkey,
    #[serde(with = "crate::serde_util::pubkey")]
    pub quote_mint: Pubkey,
    #[serde(with = "crate::serde_util::pubkey")]
    pub lp_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub base_reserve: u128,
    pub quote_reserve: u128,
    pub lp_supply: u128,
    pub fee_bps: u16,
    pub status: PoolStatus,
    pub nonce: u8,
    pub open_time: i64,
    pub observed_at: DateTime<Utc>,
}

impl PoolState {
    /// Spot price in quote units per base unit (display only)
    pub fn spot_price(&self) -> Option<f64> {
        if self.base_reserve == 0 {
            return None;
        }
        Some(self.quote_reserve as f64 / self.base_reserve as f64)
    }

    /// Naive liquidity: the quote-asset reserve backing the pool
    pub fn liquidity(&self) -> u128 {
        self.quote_reserve
    }

    pub fn reserves(&self) -> Reserves {
        Reserves {
            base: self.base_reserve,
            quote: self.quote_reserve,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PoolStatus::Active
    }

    /// Locate a mint in this pool
    pub fn side_of(&self, mint: &Pubkey) -> Option<PoolSide> {
        if *mint == self.base_mint {
            Some(PoolSide::Base)
        } else if *mint == self.quote_mint {
            Some(PoolSide::Quote)
        } else {
            None
        }
    }

    /// Direction that spends the counter asset to acquire `mint`
    pub fn buy_direction(&self, mint: &Pubkey) -> Option<SwapDirection> {
        self.side_of(mint).map(|side| match side {
            PoolSide::Base => SwapDirection::QuoteToBase,
            PoolSide::Quote => SwapDirection::BaseToQuote,
        })
    }

    /// Direction that disposes of `mint` for the counter asset
    pub fn sell_direction(&self, mint: &Pubkey) -> Option<SwapDirection> {
        self.buy_direction(mint).map(SwapDirection::reverse)
    }

    /// Price of `mint` denominated in the other pool asset (display only)
    pub fn price_of(&self, mint: &Pubkey) -> Option<f64> {
        match self.side_of(mint)? {
            PoolSide::Base => self.spot_price(),
            PoolSide::Quote => {
                if self.quote_reserve == 0 {
                    None
                } else {
                    Some(self.base_reserve as f64 / self.quote_reserve as f64)
                }
            }
        }
    }

    /// Price of one whole `mint` token in whole counter-asset units,
    /// adjusted for both mints' decimals (display only)
    pub fn ui_price_of(&self, mint: &Pubkey) -> Option<f64> {
        let raw = self.price_of(mint)?;
        let (own, other) = match self.side_of(mint)? {
            PoolSide::Base => (self.base_decimals, self.quote_decimals),
            PoolSide::Quote => (self.quote_decimals, self.base_decimals),
        };
        Some(raw * 10f64.powi(i32::from(own) - i32::from(other)))
    }
}

/// Decoder for pool accounts. Stamps the venue fee on every decoded state.
#[derive(Debug, Clone, Copy)]
pub struct PoolStateCodec {
    fee_bps: u16,
}

impl PoolStateCodec {
    pub fn new(fee_bps: u16) -> Self {
        Self { fee_bps }
    }

    pub fn fee_bps(&self) -> u16 {
        self.fee_bps
    }

    /// Decode a pool account. Trailing bytes beyond the layout are ignored.
    pub fn decode(&self, address: Pubkey, data: &[u8]) -> Result<PoolState> {
        if data.len() < POOL_ACCOUNT_LEN {
            return Err(Error::Decode(format!(
                "account data too short: {} bytes, layout needs {}",
                data.len(),
                POOL_ACCOUNT_LEN
            )));
        }

        let mut slice = &data[..POOL_ACCOUNT_LEN];
        let raw = RawPoolAccount::deserialize(&mut slice)
            .map_err(|e| Error::Decode(format!("borsh decode failed: {}", e)))?;

        let status = PoolStatus::try_from(raw.status)?;

        Ok(PoolState {
            address,
            base_mint: raw.base_mint,
            quote_mint: raw.quote_mint,
            lp_mint: raw.lp_mint,
            base_decimals: raw.base_decimals,
            quote_decimals: raw.quote_decimals,
            base_reserve: raw.base_reserve as u128,
            quote_reserve: raw.quote_reserve as u128,
            lp_supply: raw.lp_supply as u128,
            fee_bps: self.fee_bps,
            status,
            nonce: raw.nonce,
            open_time: raw.open_time,
            observed_at: Utc::now(),
        })
    }
}

/// Encode a pool account in the on-chain layout (test fixtures)
#[cfg(test)]
pub(crate) fn encode_pool_account(
    status: u8,
    base_mint: Pubkey,
    quote_mint: Pubkey,
    base_reserve: u64,
    quote_reserve: u64,
) -> Vec<u8> {
    let raw = RawPoolAccount {
        status,
        nonce: 254,
        base_mint,
        quote_mint,
        lp_mint: Pubkey::new_unique(),
        base_decimals: 6,
        quote_decimals: 9,
        base_reserve,
        quote_reserve,
        lp_supply: 1_000_000,
        open_time: 1_700_000_000,
    };
    borsh::to_vec(&raw).expect("pool fixture encodes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_len() {
        assert_eq!(POOL_ACCOUNT_LEN, 132);
        let data = encode_pool_account(0, Pubkey::new_unique(), Pubkey::new_unique(), 1, 1);
        assert_eq!(data.len(), POOL_ACCOUNT_LEN);
    }

    #[test]
    fn test_decode_fields() {
        let base = Pubkey::new_unique();
        let quote = Pubkey::new_unique();
        let data = encode_pool_account(0, base, quote, 1_000_000, 500_000);

        let pool = PoolStateCodec::new(30)
            .decode(Pubkey::new_unique(), &data)
            .unwrap();

        assert_eq!(pool.base_mint, base);
        assert_eq!(pool.quote_mint, quote);
        assert_eq!(pool.base_reserve, 1_000_000);
        assert_eq!(pool.quote_reserve, 500_000);
        assert_eq!(pool.fee_bps, 30);
        assert_eq!(pool.status, PoolStatus::Active);
        assert_eq!(pool.base_decimals, 6);
        assert_eq!(pool.quote_decimals, 9);
        assert_eq!(pool.open_time, 1_700_000_000);
        assert_eq!(pool.liquidity(), 500_000);
        assert!((pool.spot_price().unwrap() - 0.5).abs() < f64::EPSILON);
        // 6-decimal base against 9-decimal quote
        assert!((pool.ui_price_of(&base).unwrap() - 0.0005).abs() < 1e-12);
        assert!((pool.ui_price_of(&quote).unwrap() - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_reads_little_endian_offsets() {
        let mut data = vec![0u8; POOL_ACCOUNT_LEN];
        data[0] = 2; // paused
        // base_reserve starts after status, nonce, 3 mints and 2 decimals
        let offset = 1 + 1 + 96 + 2;
        data[offset..offset + 8].copy_from_slice(&7u64.to_le_bytes());
        data[offset + 8..offset + 16].copy_from_slice(&9u64.to_le_bytes());

        let pool = PoolStateCodec::new(25).decode(Pubkey::default(), &data).unwrap();
        assert_eq!(pool.status, PoolStatus::Paused);
        assert_eq!(pool.base_reserve, 7);
        assert_eq!(pool.quote_reserve, 9);
    }

    #[test]
    fn test_decode_short_buffer() {
        let data = vec![0u8; POOL_ACCOUNT_LEN - 1];
        let err = PoolStateCodec::new(25)
            .decode(Pubkey::default(), &data)
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_decode_bad_status() {
        let data = encode_pool_account(7, Pubkey::new_unique(), Pubkey::new_unique(), 1, 1);
        let err = PoolStateCodec::new(25)
            .decode(Pubkey::default(), &data)
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut data = encode_pool_account(1, Pubkey::new_unique(), Pubkey::new_unique(), 5, 6);
        data.extend_from_slice(&[0xff; 64]);
        let pool = PoolStateCodec::new(25).decode(Pubkey::default(), &data).unwrap();
        assert_eq!(pool.status, PoolStatus::Disabled);
        assert!(!pool.is_active());
    }

    #[test]
    fn test_spot_price_undefined_without_base() {
        let data = encode_pool_account(0, Pubkey::new_unique(), Pubkey::new_unique(), 0, 10);
        let pool = PoolStateCodec::new(25).decode(Pubkey::default(), &data).unwrap();
        assert!(pool.spot_price().is_none());
    }

    #[test]
    fn test_directions() {
        let base = Pubkey::new_unique();
        let quote = Pubkey::new_unique();
        let data = encode_pool_account(0, base, quote, 10, 10);
        let pool = PoolStateCodec::new(25).decode(Pubkey::default(), &data).unwrap();

        assert_eq!(pool.buy_direction(&base), Some(SwapDirection::QuoteToBase));
        assert_eq!(pool.sell_direction(&base), Some(SwapDirection::BaseToQuote));
        assert_eq!(pool.buy_direction(&quote), Some(SwapDirection::BaseToQuote));
        assert_eq!(pool.buy_direction(&Pubkey::new_unique()), None);
    }
}
