//! Chain connection: one event subscription per registered handler.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::blockchain::subscription::{action_query, SubscriptionClient};
use crate::blockchain::BlockchainResult;
use crate::config::schema::StratosChainConfig;
use crate::events::{HandlerRegistry, RawEvent};
use crate::relay::instance::{guarded, Connection, ConnectionSlot, Instance};
use crate::relay::session::Session;
use crate::resilience::{retry_fixed, RetryOutcome, RetryPolicy};

const NAME: &str = "chain";

/// Buffered events per subscription.
const EVENT_CAPACITY: usize = 100;

struct ChainInner {
    session: Session,
    config: StratosChainConfig,
    registry: Arc<HandlerRegistry>,
    slot: ConnectionSlot,
    subscriptions: DashMap<&'static str, SubscriptionClient>,
}

/// Subscriptions to chain events, dispatched to the handler registry.
#[derive(Clone)]
pub struct ChainConnection {
    inner: Arc<ChainInner>,
}

impl ChainConnection {
    pub fn new(session: Session, config: StratosChainConfig, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                session,
                config,
                registry,
                slot: ConnectionSlot::new(),
                subscriptions: DashMap::new(),
            }),
        }
    }

    pub fn trigger_refresh(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.refresh().await });
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    fn schedule_refresh(&self, instance: &Instance) {
        let Some(interval) = self.inner.config.connection_retries.refresh_interval() else {
            return;
        };
        let this = self.clone();
        let cancel = instance.token().clone();
        instance.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    tracing::info!(connection = NAME, "Scheduled refresh");
                    this.trigger_refresh();
                }
            }
        });
    }

    /// Subscribe every event type that has no live subscription yet.
    ///
    /// Subscriptions made before a failure are kept, so a retry only
    /// covers the remainder.
    async fn subscribe_all(&self, instance: &Instance) -> BlockchainResult<()> {
        let url = self.inner.config.websocket_url();
        for event_type in self.inner.registry.event_types() {
            if self.inner.subscriptions.contains_key(event_type) {
                continue;
            }
            let query = action_query(event_type);
            let (client, events) = SubscriptionClient::subscribe(
                &url,
                &query,
                EVENT_CAPACITY,
                instance.token(),
                self.inner.config.rpc_timeout(),
            )
            .await?;
            tracing::info!(connection = NAME, query = %query, "Subscribed");
            self.inner.subscriptions.insert(event_type, client);
            self.spawn_reader(instance, event_type, events);
        }
        Ok(())
    }

    fn spawn_reader(&self, instance: &Instance, event_type: &'static str, events: mpsc::Receiver<RawEvent>) {
        let this = self.clone();
        let owner = instance.clone();
        instance.spawn(async move {
            guarded(NAME, event_type, this.read_loop(event_type, events, owner.token().clone())).await;
            if owner.is_cancelled() {
                return;
            }
            // Drop the dead client so the next pass subscribes again. A
            // cancelled owner means a refresh already took the map over.
            let dead = this
                .inner
                .subscriptions
                .remove_if(event_type, |_, _| !owner.is_cancelled());
            if let Some((_, mut client)) = dead {
                client.stop().await;
            }
            this.trigger_refresh();
        });
    }

    async fn read_loop(&self, event_type: &'static str, mut events: mpsc::Receiver<RawEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                tracing::warn!(connection = NAME, event_type, "Subscription closed");
                return;
            };
            tracing::debug!(connection = NAME, event_type, tx_hash = %event.tx_hash, "Chain event");
            self.inner.registry.handle(event_type, &event).await;
        }
    }

    async fn refresh_once(&self) {
        let lifetime = self.inner.session.lifetime();
        if lifetime.is_triggered() {
            return;
        }

        self.stop_current().await;
        let instance = self.inner.slot.install(lifetime);
        self.schedule_refresh(&instance);

        let this = self;
        let current = &instance;
        let policy = RetryPolicy::from(&self.inner.config.connection_retries);
        match retry_fixed(policy, instance.token(), NAME, move || this.subscribe_all(current)).await {
            RetryOutcome::Connected(()) => {
                tracing::info!(connection = NAME, subscriptions = self.subscription_count(), "Chain subscriptions ready");
            }
            RetryOutcome::Cancelled => tracing::debug!(connection = NAME, "Refresh cancelled"),
            RetryOutcome::Exhausted { attempts } => {
                tracing::error!(connection = NAME, attempts, "Reconnection attempts exhausted, shutting down relay");
                lifetime.trigger();
            }
        }
    }

    /// Cancel the running instance, unsubscribe every client and wait for readers.
    async fn stop_current(&self) {
        if let Some(instance) = self.inner.slot.current() {
            instance.token().cancel();
        }

        let event_types: Vec<&'static str> = self.inner.subscriptions.iter().map(|e| *e.key()).collect();
        for event_type in event_types {
            let Some((_, mut client)) = self.inner.subscriptions.remove(event_type) else {
                continue;
            };
            if let Err(e) = client.unsubscribe().await {
                tracing::debug!(connection = NAME, query = client.query(), error = %e, "Unsubscribe failed");
            }
            client.stop().await;
        }

        self.inner.slot.stop_instance().await;
    }
}

#[async_trait]
impl Connection for ChainConnection {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn refresh(&self) {
        self.inner.slot.request_refresh();
        while let Some(_guard) = self.inner.slot.begin_refresh(NAME) {
            self.refresh_once().await;
        }
    }

    async fn stop(&self) {
        let _guard = self.inner.slot.lock_refresh().await;
        self.stop_current().await;
        tracing::info!(connection = NAME, "Connection stopped");
    }
}

impl std::fmt::Debug for ChainConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConnection")
            .field("url", &self.inner.config.websocket_url())
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish_non_exhaustive()
    }
}
