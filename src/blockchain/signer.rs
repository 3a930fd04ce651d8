//! Transaction signers.
//!
//! A signer is either an in-process key (secp256k1 or ed25519) or a
//! delegate implementing [`ExternalSigner`] for keys held elsewhere.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const SECP256K1_PUBKEY_TYPE: &str = "/stratos.crypto.v1.ethsecp256k1.PubKey";
pub const ED25519_PUBKEY_TYPE: &str = "/cosmos.crypto.ed25519.PubKey";

/// Signature scheme tag as carried on the wire (`0` secp256k1, `1` ed25519).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SignatureAlgorithm {
    #[default]
    Secp256k1,
    Ed25519,
}

impl TryFrom<u8> for SignatureAlgorithm {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Secp256k1),
            1 => Ok(Self::Ed25519),
            other => Err(format!("unknown signature algorithm {}", other)),
        }
    }
}

impl From<SignatureAlgorithm> for u8 {
    fn from(value: SignatureAlgorithm) -> Self {
        match value {
            SignatureAlgorithm::Secp256k1 => 0,
            SignatureAlgorithm::Ed25519 => 1,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secp256k1 => f.write_str("secp256k1"),
            Self::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Errors produced while resolving or using a signer.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid {algorithm} private key: {reason}")]
    InvalidKey {
        algorithm: SignatureAlgorithm,
        reason: String,
    },

    #[error("no private key and no external signer for {0}")]
    Unsignable(String),

    #[error("external signer failed for {address}: {reason}")]
    External { address: String, reason: String },
}

/// Public key in the `{"@type", "key"}` form embedded in signer infos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Base64 encoded key bytes.
    pub key: String,
}

impl PublicKey {
    pub fn new(algorithm: SignatureAlgorithm, bytes: &[u8]) -> Self {
        let type_url = match algorithm {
            SignatureAlgorithm::Secp256k1 => SECP256K1_PUBKEY_TYPE,
            SignatureAlgorithm::Ed25519 => ED25519_PUBKEY_TYPE,
        };
        Self {
            type_url: type_url.to_string(),
            key: BASE64.encode(bytes),
        }
    }
}

/// Signing delegate for keys that never enter this process.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    async fn public_key(
        &self,
        address: &str,
        algorithm: SignatureAlgorithm,
    ) -> Result<PublicKey, SignerError>;

    async fn sign(&self, address: &str, sign_bytes: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// Private key held in memory.
#[derive(Clone)]
pub enum InProcessKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl InProcessKey {
    /// Parse raw key bytes. Ed25519 accepts a 32-byte seed or a 64-byte seed||public key.
    pub fn from_bytes(algorithm: SignatureAlgorithm, bytes: &[u8]) -> Result<Self, SignerError> {
        let invalid = |reason: String| SignerError::InvalidKey { algorithm, reason };
        match algorithm {
            SignatureAlgorithm::Secp256k1 => k256::ecdsa::SigningKey::from_slice(bytes)
                .map(Self::Secp256k1)
                .map_err(|e| invalid(e.to_string())),
            SignatureAlgorithm::Ed25519 => {
                let seed: [u8; 32] = match bytes.len() {
                    32 | 64 => bytes[..32]
                        .try_into()
                        .map_err(|_| invalid("bad seed".to_string()))?,
                    n => return Err(invalid(format!("expected 32 or 64 bytes, got {}", n))),
                };
                Ok(Self::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed)))
            }
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Secp256k1(_) => SignatureAlgorithm::Secp256k1,
            Self::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Secp256k1(key) => PublicKey::new(self.algorithm(), &key.verifying_key().to_sec1_bytes()),
            Self::Ed25519(key) => PublicKey::new(self.algorithm(), key.verifying_key().as_bytes()),
        }
    }

    /// secp256k1: 64-byte r||s over SHA-256, low-s normalized. ed25519: 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Secp256k1(key) => {
                use k256::ecdsa::signature::Signer as _;
                let signature: k256::ecdsa::Signature = key.sign(message);
                let signature = signature.normalize_s().unwrap_or(signature);
                signature.to_bytes().to_vec()
            }
            Self::Ed25519(key) => {
                use ed25519_dalek::Signer as _;
                key.sign(message).to_bytes().to_vec()
            }
        }
    }
}

impl fmt::Debug for InProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InProcessKey({})", self.algorithm())
    }
}

/// A resolved signer for one address.
#[derive(Clone)]
pub enum TxSigner {
    InProcess(InProcessKey),
    External {
        algorithm: SignatureAlgorithm,
        delegate: Arc<dyn ExternalSigner>,
    },
}

impl TxSigner {
    /// Pick a signer for a signature key: in-process when key bytes are present,
    /// otherwise the external delegate if one is configured.
    pub fn resolve(
        address: &str,
        algorithm: SignatureAlgorithm,
        private_key: Option<&[u8]>,
        external: Option<&Arc<dyn ExternalSigner>>,
    ) -> Result<Self, SignerError> {
        match (private_key.filter(|k| !k.is_empty()), external) {
            (Some(bytes), _) => InProcessKey::from_bytes(algorithm, bytes).map(Self::InProcess),
            (None, Some(delegate)) => Ok(Self::External {
                algorithm,
                delegate: delegate.clone(),
            }),
            (None, None) => Err(SignerError::Unsignable(address.to_string())),
        }
    }

    pub async fn public_key(&self, address: &str) -> Result<PublicKey, SignerError> {
        match self {
            Self::InProcess(key) => Ok(key.public_key()),
            Self::External { algorithm, delegate } => delegate.public_key(address, *algorithm).await,
        }
    }

    pub async fn sign(&self, address: &str, sign_bytes: &[u8]) -> Result<Vec<u8>, SignerError> {
        match self {
            Self::InProcess(key) => Ok(key.sign(sign_bytes)),
            Self::External { delegate, .. } => delegate.sign(address, sign_bytes).await,
        }
    }
}

impl fmt::Debug for TxSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess(key) => key.fmt(f),
            Self::External { algorithm, .. } => write!(f, "External({})", algorithm),
        }
    }
}
