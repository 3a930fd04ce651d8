//! Chain event handling.
//!
//! # Data Flow
//! ```text
//! SubscriptionClient → RawEvent
//!     → registry.rs (align tuples, dedup via cache.rs)
//!     → handlers.rs (transform to notification body)
//!     → notifier.rs (POST to the indexing service)
//! ```

pub mod cache;
pub mod handlers;
pub mod notifier;
pub mod registry;
pub mod types;

pub use cache::DedupCache;
pub use notifier::{HttpNotifier, Notifier, NotifyError};
pub use registry::{Handled, HandlerRegistry};
pub use types::RawEvent;
