//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection refresh:
//!     → retries.rs (fixed-delay dial attempts)
//!     → Exhausted → connection cancels the root lifetime
//! ```

pub mod retries;

pub use retries::{retry_fixed, RetryOutcome, RetryPolicy};
