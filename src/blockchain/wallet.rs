//! Relay wallet loaded from an encrypted key file.
//!
//! # Security
//! - Keys are decrypted once at startup and never logged or serialized
//! - The password comes from configuration only

use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;
use std::path::Path;

use crate::blockchain::types::{BlockchainError, BlockchainResult};

#[derive(Deserialize)]
struct KeyFileHeader {
    #[serde(default)]
    address: Option<String>,
}

/// Signing material of the relay's own account.
#[derive(Clone)]
pub struct Wallet {
    /// The underlying signer (private key).
    signer: PrivateKeySigner,
    /// Address the relay signs for, compared verbatim against signature keys.
    address: String,
}

impl Wallet {
    /// Create a wallet from a hex-encoded private key string.
    ///
    /// `address` overrides the derived address when provided.
    pub fn from_private_key(private_key_hex: &str, address: Option<&str>) -> BlockchainResult<Self> {
        let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| BlockchainError::Wallet(format!("Invalid private key format: {}", e)))?;

        Ok(Self::with_signer(signer, address))
    }

    /// Decrypt a keystore file.
    ///
    /// The wallet address is taken from `address_override` when non-empty,
    /// then from the key file's `address` field, then derived from the key.
    pub fn from_keystore(
        path: &Path,
        password: &str,
        address_override: Option<&str>,
    ) -> BlockchainResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BlockchainError::Wallet(format!("Cannot read key file {}: {}", path.display(), e))
        })?;
        let header: KeyFileHeader = serde_json::from_str(&raw).map_err(|e| {
            BlockchainError::Wallet(format!("Malformed key file {}: {}", path.display(), e))
        })?;

        let signer = PrivateKeySigner::decrypt_keystore(path, password).map_err(|e| {
            BlockchainError::Wallet(format!("Cannot decrypt key file {}: {}", path.display(), e))
        })?;

        let address = address_override
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .or(header.address.filter(|a| !a.is_empty()));
        let wallet = Self::with_signer(signer, address.as_deref());

        tracing::info!(address = %wallet.address, "Wallet loaded");
        Ok(wallet)
    }

    fn with_signer(signer: PrivateKeySigner, address: Option<&str>) -> Self {
        let address = match address.filter(|a| !a.is_empty()) {
            Some(a) => a.to_string(),
            None => signer.address().to_string(),
        };
        Self { signer, address }
    }

    /// Get the wallet's address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw secp256k1 private key bytes.
    pub fn private_key_bytes(&self) -> Vec<u8> {
        self.signer.to_bytes().to_vec()
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
