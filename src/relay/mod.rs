//! The relay proper: two supervised connections sharing one session.
//!
//! # Data Flow
//! ```text
//! SP websocket ─▶ network.rs reader ─▶ broadcaster.rs ─▶ chain REST
//! chain websocket ─▶ chain.rs readers ─▶ events::HandlerRegistry ─▶ SP HTTP API
//! ```
//!
//! # Concurrency
//! - One refresh guard per connection; concurrent refreshes collapse into one
//! - Each connection instance has its own cancellation token and task tracker
//! - Exhausting reconnection on either side cancels the root lifetime

pub mod broadcaster;
pub mod chain;
pub mod instance;
pub mod network;
pub mod session;
pub mod supervisor;

pub use chain::ChainConnection;
pub use instance::Connection;
pub use network::NetworkConnection;
pub use session::Session;
pub use supervisor::{RelayError, Supervisor, SupervisorState};
