//! Logs and metrics for a headless daemon.
//!
//! ```text
//! connections, broadcaster, handlers
//!     → logging.rs (tracing subscriber, RUST_LOG aware)
//!     → metrics.rs (relay_* counters, batch size histogram, cache gauge)
//!         → optional Prometheus listener
//! ```
//!
//! Metric calls are no-ops until an exporter is installed.

pub mod logging;
pub mod metrics;
