//! SDS relay daemon library.
//!
//! Bridges a Stratos storage-network SP node and the Stratos chain: unsigned
//! transactions pushed by the SP are batched, signed and broadcast; chain
//! events are deduplicated and forwarded to the SP's indexing API. A small
//! JSON-RPC surface answers chain queries and replays missed transactions.

pub mod blockchain;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod observability;
pub mod relay;
pub mod resilience;
pub mod rpc;
pub mod sds;

pub use config::schema::RelayConfig;
pub use lifecycle::Shutdown;
pub use relay::Supervisor;
