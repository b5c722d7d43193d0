//! Local keypair signer

use std::path::Path;

use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use tracing::{debug, info};

use super::TransactionSigner;
use crate::error::{Error, Result};

/// Signs with a keypair loaded from a JSON byte-array file
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Load from a keypair file, refusing group/world-readable files on Unix
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading keypair from: {:?}", path);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(Error::InvalidKeypair(format!(
                        "{} has insecure permissions {:o}. Run 'chmod 600 {}'",
                        path.display(),
                        mode & 0o777,
                        path.display()
                    )));
                }
            }
        }

        let keypair_bytes = std::fs::read(path)
            .map_err(|e| Error::InvalidKeypair(format!("Failed to read {}: {}", path.display(), e)))?;

        let keypair_json: Vec<u8> = serde_json::from_slice(&keypair_bytes)
            .map_err(|e| Error::InvalidKeypair(format!("Failed to parse keypair JSON: {}", e)))?;

        let keypair = Keypair::from_bytes(&keypair_json)
            .map_err(|e| Error::InvalidKeypair(format!("Invalid keypair bytes: {}", e)))?;

        info!("Loaded keypair: {}", keypair.pubkey());
        Ok(Self { keypair })
    }

    /// Load from the path in `KEYPAIR_PATH`
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("KEYPAIR_PATH")
            .map_err(|_| Error::MissingEnvVar("KEYPAIR_PATH".to_string()))?;
        Self::from_file(Path::new(&path))
    }
}

impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<()> {
        transaction
            .try_sign(&[&self.keypair], blockhash)
            .map_err(|e| Error::TransactionBuild(format!("Signing failed: {}", e)))
    }
}
