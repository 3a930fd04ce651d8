//! Storage-network frames carrying unsigned chain messages.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockchain::signer::SignatureAlgorithm;

/// Frame type carrying unsigned transactions.
pub const BROADCAST_FRAME: &str = "broadcast";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed relay frame: {0}")]
    Frame(serde_json::Error),

    #[error("malformed broadcast payload: {0}")]
    Payload(serde_json::Error),

    #[error("invalid message: {0}")]
    Message(String),
}

/// Envelope pushed by the SP over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Signer of an unsigned message. Account fields are refreshed before signing.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureKey {
    pub address: String,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<Vec<u8>>,
    #[serde(default, rename = "account_num")]
    pub account_number: u64,
    #[serde(default)]
    pub account_sequence: u64,
    #[serde(default, rename = "type")]
    pub algorithm: SignatureAlgorithm,
}

impl SignatureKey {
    pub fn has_private_key(&self) -> bool {
        self.private_key.as_ref().is_some_and(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureKey")
            .field("address", &self.address)
            .field("has_private_key", &self.has_private_key())
            .field("account_number", &self.account_number)
            .field("account_sequence", &self.account_sequence)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// A chain instruction and the keys required to authorize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedMessage {
    /// Opaque instruction payload.
    pub msg: serde_json::Value,
    pub signature_keys: Vec<SignatureKey>,
    #[serde(rename = "type")]
    pub msg_type: String,
}

impl UnsignedMessage {
    /// Every message needs at least one signer, and every signer an address.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.signature_keys.is_empty() {
            return Err(DecodeError::Message(format!("{} has no signature keys", self.msg_type)));
        }
        if self.signature_keys.iter().any(|k| k.address.is_empty()) {
            return Err(DecodeError::Message(format!("{} has a signer without address", self.msg_type)));
        }
        Ok(())
    }

    /// Give the session key to signers that match `address` and carry no key of their own.
    pub fn inject_private_key(&mut self, address: &str, private_key: &[u8]) -> usize {
        let mut injected = 0;
        for key in &mut self.signature_keys {
            if !key.has_private_key() && key.address == address {
                key.private_key = Some(private_key.to_vec());
                injected += 1;
            }
        }
        injected
    }
}

#[derive(Debug, Deserialize)]
struct UnsignedMsgs {
    #[serde(default)]
    msgs: Vec<serde_json::Value>,
}

/// Decode a websocket frame into unsigned messages.
///
/// Frames of other types decode to an empty list. Messages that fail to
/// decode are logged and skipped; the rest of the frame is still returned.
pub fn decode_frame(raw: &[u8]) -> Result<Vec<UnsignedMessage>, DecodeError> {
    let frame: RelayFrame = serde_json::from_slice(raw).map_err(DecodeError::Frame)?;
    if frame.frame_type != BROADCAST_FRAME {
        tracing::debug!(frame_type = %frame.frame_type, "Ignoring relay frame");
        return Ok(Vec::new());
    }

    let batch: UnsignedMsgs = serde_json::from_slice(&frame.data).map_err(DecodeError::Payload)?;
    let mut messages = Vec::with_capacity(batch.msgs.len());
    for (index, raw) in batch.msgs.into_iter().enumerate() {
        let message = serde_json::from_value::<UnsignedMessage>(raw)
            .map_err(|e| DecodeError::Message(e.to_string()))
            .and_then(|m| m.validate().map(|_| m));
        match message {
            Ok(m) => messages.push(m),
            Err(e) => tracing::error!(index, error = %e, "Dropping undecodable unsigned message"),
        }
    }
    Ok(messages)
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_str(&BASE64.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if !s.is_empty() => BASE64.decode(s).map(Some).map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
