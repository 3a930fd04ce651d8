//! Dispatch of chain events to their handlers.

use alloy::primitives::{keccak256, B256};
use std::sync::Arc;
use std::time::Duration;

use crate::events::cache::DedupCache;
use crate::events::handlers::{self, HANDLERS};
use crate::events::notifier::Notifier;
use crate::events::types::{RawEvent, Tuple};
use crate::observability::metrics;

/// What happened to one delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Unknown,
    Duplicate,
    Empty,
    Posted,
    Failed,
}

/// Content hash identifying an event for deduplication.
///
/// Covers the transaction hash and, per required attribute, its name
/// followed by the attribute's value in every tuple.
pub fn dedup_key(tx_hash: &str, required: &[&str], tuples: &[Tuple]) -> B256 {
    let mut raw = String::from(tx_hash);
    for attribute in required {
        raw.push_str(attribute);
        for tuple in tuples {
            if let Some(value) = tuple.get(*attribute) {
                raw.push_str(value);
            }
        }
    }
    keccak256(raw.as_bytes())
}

pub struct HandlerRegistry {
    cache: DedupCache<B256>,
    notifier: Arc<dyn Notifier>,
}

impl HandlerRegistry {
    pub fn new(notifier: Arc<dyn Notifier>, ttl: Duration) -> Self {
        Self {
            cache: DedupCache::new(ttl),
            notifier,
        }
    }

    /// Event types with a registered handler, in table order.
    pub fn event_types(&self) -> Vec<&'static str> {
        HANDLERS.iter().map(|h| h.event_type).collect()
    }

    pub fn cache(&self) -> &DedupCache<B256> {
        &self.cache
    }

    /// Run the handler of every distinct message action carried by `event`.
    ///
    /// Used for transactions fetched after the fact rather than delivered by
    /// a subscription. Actions without a handler are skipped.
    pub async fn handle_actions(&self, event: &RawEvent) -> Vec<(&'static str, Handled)> {
        let mut outcomes: Vec<(&'static str, Handled)> = Vec::new();
        for action in event.values("message", "action") {
            let Some(handler) = handlers::find(action) else {
                tracing::debug!(action = %action, tx_hash = %event.tx_hash, "No handler for message action");
                continue;
            };
            if outcomes.iter().any(|(t, _)| *t == handler.event_type) {
                continue;
            }
            let handled = self.handle(handler.event_type, event).await;
            outcomes.push((handler.event_type, handled));
        }
        outcomes
    }

    pub async fn handle(&self, event_type: &str, event: &RawEvent) -> Handled {
        let Some(handler) = handlers::find(event_type) else {
            tracing::warn!(event_type, "No handler registered");
            return Handled::Unknown;
        };
        metrics::record_chain_event(event_type);

        let tx_hash = event.tx_hash.as_str();
        let (tuples, total) = event.aligned_tuples(handler.event, handler.required);

        let key = dedup_key(tx_hash, handler.required, &tuples);
        if self.cache.load(&key) {
            tracing::debug!(event_type, tx_hash, "Event already handled, ignoring");
            metrics::record_duplicate_event(event_type);
            return Handled::Duplicate;
        }
        self.cache.store(key);

        let notification = match (handler.transform)(tx_hash, &tuples) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(event_type, tx_hash, error = %e, "Failed to encode notification");
                return Handled::Failed;
            }
        };

        if notification.accepted != total && !handler.selective {
            tracing::error!(
                event_type,
                tx_hash,
                success = notification.accepted,
                missing_attribute = total - tuples.len(),
                invalid_attribute = tuples.len() - notification.accepted,
                "Handler couldn't process all events"
            );
        } else if handler.selective && notification.accepted > 0 {
            tracing::debug!(
                event_type,
                tx_hash,
                forwarded = notification.accepted,
                skipped = total - notification.accepted,
                "Forwarding selected events"
            );
        }
        if notification.accepted == 0 {
            return Handled::Empty;
        }

        match self.notifier.post(handler.endpoint, notification.body).await {
            Ok(()) => {
                metrics::record_notification(handler.endpoint, true);
                Handled::Posted
            }
            Err(e) => {
                tracing::error!(event_type, tx_hash, endpoint = handler.endpoint, error = %e, "Notification failed");
                metrics::record_notification(handler.endpoint, false);
                Handled::Failed
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &HANDLERS.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
