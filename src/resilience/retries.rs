//! Fixed-delay reconnection.
//!
//! # Design Decisions
//! - Fixed delay between attempts, no jitter
//! - Cancellation is checked before every attempt and during every sleep
//! - The caller decides what exhaustion means; connections escalate it

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::schema::ConnectionRetries;
use crate::observability::metrics;

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<&ConnectionRetries> for RetryPolicy {
    fn from(retries: &ConnectionRetries) -> Self {
        Self {
            max_attempts: retries.max,
            delay: retries.sleep_duration(),
        }
    }
}

/// Result of a retry sequence.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Connected(T),
    Cancelled,
    Exhausted { attempts: u32 },
}

/// Run `attempt` until it succeeds, the policy is exhausted, or `cancel` fires.
pub async fn retry_fixed<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    connection: &str,
    mut attempt: F,
) -> RetryOutcome<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    for n in 1..=policy.max_attempts {
        if n > 1 {
            tokio::select! {
                _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return RetryOutcome::Cancelled,
            result = attempt() => result,
        };
        match result {
            Ok(value) => {
                metrics::record_reconnect_attempt(connection, true);
                tracing::info!(connection, attempt = n, "Connected");
                return RetryOutcome::Connected(value);
            }
            Err(e) => {
                metrics::record_reconnect_attempt(connection, false);
                tracing::warn!(
                    connection,
                    attempt = n,
                    max_attempts = policy.max_attempts,
                    retry_in_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed"
                );
            }
        }
    }
    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}
