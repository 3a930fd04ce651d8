//! Local JSON-RPC endpoints of the relay.
//!
//! ```text
//! HTTP  POST /        ─▶ QueryApi  (query_*: read-only chain lookups)
//! IPC   unix socket   ─▶ RelayApi  (relayer_sync: replay a committed tx)
//!                              └──▶ events::HandlerRegistry
//! ```

pub mod api;
pub mod protocol;
pub mod server;

pub use api::{QueryApi, RelayApi, ResourceNodeState};
pub use protocol::{RpcError, RpcService};
pub use server::RpcServer;
