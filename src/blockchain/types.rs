//! Chain-specific types and error definitions.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Event subscription failed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Transaction was rejected by the chain.
    #[error("Transaction {txhash} rejected with code {code}: {raw_log}")]
    Rejected {
        code: u32,
        txhash: String,
        raw_log: String,
    },

    /// Key file, private key or signing failure.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Account lookup failed.
    #[error("Account {address} unavailable: {reason}")]
    Account { address: String, reason: String },

    /// Fee computation failed.
    #[error("Fee error: {0}")]
    Fee(String),

    /// Nothing left to broadcast after filtering.
    #[error("Empty transaction: {0}")]
    EmptyTransaction(String),

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: String, actual: String },

    /// Malformed response payload.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// An integer amount in a named denomination, e.g. `1000000000wei`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(with = "u128_string")]
    pub amount: u128,
}

impl Coin {
    pub fn new(amount: u128, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Coin string parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid coin '{input}': {reason}")]
pub struct ParseCoinError {
    input: String,
    reason: &'static str,
}

impl FromStr for Coin {
    type Err = ParseCoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = |reason| ParseCoinError {
            input: s.to_string(),
            reason,
        };
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| err("missing denomination"))?;
        let (amount, denom) = trimmed.split_at(split);
        if amount.is_empty() {
            return Err(err("missing amount"));
        }
        if !denom.starts_with(|c: char| c.is_ascii_alphabetic())
            || !denom
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'))
        {
            return Err(err("invalid denomination"));
        }
        let amount = amount.parse::<u128>().map_err(|_| err("amount out of range"))?;
        Ok(Coin::new(amount, denom))
    }
}

/// Account number and sequence as reported by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

/// Result of a transaction simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct GasInfo {
    #[serde(default, deserialize_with = "u64_from_string_or_number")]
    pub gas_wanted: u64,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub gas_used: u64,
}

/// Outcome of a block-mode broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct TxResponse {
    #[serde(default, deserialize_with = "u64_from_string_or_number")]
    pub height: u64,
    #[serde(default)]
    pub txhash: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
}

impl TxResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Cosmos REST encodes 64-bit integers as strings.
pub(crate) fn u64_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Base-10 integer of any size, serialized as a bare JSON number.
///
/// Token amounts on chain are big integers and routinely exceed `u128`, so
/// they are validated and kept in canonical decimal form rather than parsed.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct Amount(Box<RawValue>);

impl Amount {
    /// Parse an optionally signed run of ASCII digits.
    ///
    /// Leading zeros are stripped and `-0` becomes `0`.
    pub fn parse(value: &str) -> Option<Self> {
        let (negative, digits) = match value.as_bytes().first()? {
            b'-' => (true, &value[1..]),
            b'+' => (false, &value[1..]),
            _ => (false, value),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits = digits.trim_start_matches('0');
        let canonical = match (digits.is_empty(), negative) {
            (true, _) => "0".to_string(),
            (false, true) => format!("-{}", digits),
            (false, false) => digits.to_string(),
        };
        RawValue::from_string(canonical).ok().map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
