//! Mint and freeze authority check

use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::program_option::COption;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use spl_token::state::Mint;

use super::types::{CheckKind, Findings, PartialRisk, RiskWarning, Severity, WarningKind};
use super::{RiskCheck, RiskContext};
use crate::chain::ChainClient;
use crate::config::RiskConfig;
use crate::error::{Error, Result};

pub struct OwnershipCheck {
    chain: Arc<dyn ChainClient>,
    ownership_penalty: u8,
    freeze_penalty: u8,
}

/// Decode the base SPL mint layout. Token-2022 extensions past it are ignored.
pub fn decode_mint(token: &Pubkey, data: &[u8]) -> Result<Mint> {
    if data.len() < Mint::LEN {
        return Err(Error::InvalidToken {
            token: token.to_string(),
            reason: format!("account is {} bytes, not an SPL mint", data.len()),
        });
    }
    Mint::unpack(&data[..Mint::LEN]).map_err(|e| Error::InvalidToken {
        token: token.to_string(),
        reason: format!("not an initialized SPL mint: {}", e),
    })
}

/// An authority is live unless it is absent or the null (system) key
fn live_authority(authority: &COption<Pubkey>) -> Option<Pubkey> {
    match authority {
        COption::Some(key) if *key != Pubkey::default() && *key != solana_sdk::system_program::ID => {
            Some(*key)
        }
        _ => None,
    }
}

impl OwnershipCheck {
    pub fn new(chain: Arc<dyn ChainClient>, config: &RiskConfig) -> Self {
        Self {
            chain,
            ownership_penalty: config.ownership_penalty,
            freeze_penalty: config.freeze_authority_penalty,
        }
    }

    /// Score a decoded mint
    pub fn evaluate(&self, mint: &Mint) -> PartialRisk {
        let mut risk: u32 = 0;
        let mut warnings = Vec::new();

        let mint_authority = live_authority(&mint.mint_authority);
        if let Some(authority) = mint_authority {
            risk += self.ownership_penalty as u32;
            warnings.push(RiskWarning::new(
                WarningKind::MintAuthority,
                Severity::High,
                format!("mint authority not renounced ({}), supply can be inflated", authority),
            ));
        }

        let freeze_authority = live_authority(&mint.freeze_authority);
        if let Some(authority) = freeze_authority {
            risk += self.freeze_penalty as u32;
            warnings.push(RiskWarning::new(
                WarningKind::FreezeAuthority,
                Severity::Medium,
                format!("freeze authority active ({}), holder accounts can be frozen", authority),
            ));
        }

        PartialRisk {
            check: CheckKind::Ownership,
            risk: risk.min(100) as u8,
            warnings,
            findings: Findings::Ownership {
                is_renounced: mint_authority.is_none(),
                freeze_authority: freeze_authority.is_some(),
            },
        }
    }
}

#[async_trait]
impl RiskCheck for OwnershipCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Ownership
    }

    async fn assess(&self, ctx: &RiskContext) -> Result<PartialRisk> {
        let data = self
            .chain
            .get_account_bytes(&ctx.token)
            .await?
            .ok_or_else(|| Error::InvalidToken {
                token: ctx.token.to_string(),
                reason: "mint account does not exist".to_string(),
            })?;

        let mint = decode_mint(&ctx.token, &data)?;
        Ok(self.evaluate(&mint))
    }
}
