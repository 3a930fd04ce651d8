//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! key file → wallet.rs (session key)
//! unsigned messages → transaction.rs (filter, account lookup, simulate, sign)
//!     → client.rs (REST broadcast with failover)
//! chain websocket → subscription.rs → RawEvent channel
//! ```
//!
//! # Security Constraints
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod signer;
pub mod subscription;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::{ChainRpc, RestChainClient};
pub use signer::{ExternalSigner, SignatureAlgorithm, TxSigner};
pub use subscription::SubscriptionClient;
pub use transaction::{BroadcastOutcome, TxBuilder};
pub use types::{Amount, BlockchainError, BlockchainResult, Coin};
pub use wallet::Wallet;
