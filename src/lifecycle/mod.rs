//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     root CancellationToken → per-connection child tokens
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGQUIT/SIGHUP → Supervisor::stop
//! ```
//!
//! # Design Decisions
//! - Exhausted reconnection on either connection cancels the root
//! - Cancelling the root stops everything; there is no partial restart

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
