//! Storage-network connection: SP websocket reader feeding the broadcaster.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::blockchain::TxBuilder;
use crate::config::schema::{BroadcastConfig, SdsConfig};
use crate::relay::broadcaster::TxBroadcaster;
use crate::relay::instance::{guarded, Connection, ConnectionSlot, Instance};
use crate::relay::session::Session;
use crate::resilience::{retry_fixed, RetryOutcome, RetryPolicy};
use crate::sds::messages::decode_frame;
use crate::sds::websocket::{self, SdsStream};
use crate::sds::UnsignedMessage;

const NAME: &str = "sds";

struct NetworkInner {
    session: Session,
    sds: SdsConfig,
    broadcast: BroadcastConfig,
    builder: Arc<TxBuilder>,
    slot: ConnectionSlot,
}

/// Connection to the SP's broadcast topic.
#[derive(Clone)]
pub struct NetworkConnection {
    inner: Arc<NetworkInner>,
}

impl NetworkConnection {
    pub fn new(session: Session, sds: SdsConfig, broadcast: BroadcastConfig, builder: Arc<TxBuilder>) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                session,
                sds,
                broadcast,
                builder,
                slot: ConnectionSlot::new(),
            }),
        }
    }

    /// Refresh in the background; collapses into any refresh already running.
    pub fn trigger_refresh(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.refresh().await });
    }

    fn schedule_refresh(&self, instance: &Instance) {
        let Some(interval) = self.inner.sds.connection_retries.refresh_interval() else {
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

    fn start_loops(&self, instance: &Instance, stream: SdsStream) {
        let (tx, rx) = mpsc::channel(self.inner.broadcast.channel_size.max(1));

        // The broadcaster must be consuming before the reader produces.
        let broadcaster = TxBroadcaster::new(self.inner.builder.clone(), &self.inner.broadcast);
        let this = self.clone();
        let owner = instance.clone();
        instance.spawn(async move {
            let panicked = guarded(NAME, "broadcaster", broadcaster.run(rx, owner.token().clone())).await;
            if panicked && !owner.is_cancelled() {
                this.trigger_refresh();
            }
        });

        let this = self.clone();
        let owner = instance.clone();
        instance.spawn(async move {
            guarded(NAME, "reader", this.read_loop(stream, tx, owner.token().clone())).await;
            if !owner.is_cancelled() {
                this.trigger_refresh();
            }
        });
    }

    async fn refresh_once(&self) {
        let lifetime = self.inner.session.lifetime();
        if lifetime.is_triggered() {
            return;
        }

        self.inner.slot.stop_instance().await;
        let instance = self.inner.slot.install(lifetime);
        self.schedule_refresh(&instance);

        let url = self.inner.sds.websocket_url();
        let target = url.as_str();
        tracing::info!(connection = NAME, url = target, "Connecting to SP websocket");
        let policy = RetryPolicy::from(&self.inner.sds.connection_retries);
        match retry_fixed(policy, instance.token(), NAME, move || websocket::dial(target)).await {
            RetryOutcome::Connected(stream) => self.start_loops(&instance, stream),
            RetryOutcome::Cancelled => tracing::debug!(connection = NAME, "Refresh cancelled"),
            RetryOutcome::Exhausted { attempts } => {
                tracing::error!(connection = NAME, attempts, "Reconnection attempts exhausted, shutting down relay");
                lifetime.trigger();
            }
        }
    }

    async fn read_loop(&self, mut stream: SdsStream, tx: mpsc::Sender<UnsignedMessage>, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = stream.next() => frame,
            };
            let payload = match frame {
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                Some(Ok(Message::Close(close))) => {
                    tracing::warn!(connection = NAME, frame = ?close, "SP closed the websocket");
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(connection = NAME, error = %e, "Websocket read error");
                    return;
                }
                None => {
                    tracing::warn!(connection = NAME, "Websocket stream ended");
                    return;
                }
            };

            let messages = match decode_frame(&payload) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!(connection = NAME, error = %e, "Dropping undecodable frame");
                    continue;
                }
            };
            tracing::debug!(connection = NAME, count = messages.len(), "Received unsigned messages");

            for mut message in messages {
                message.inject_private_key(self.inner.session.wallet_address(), self.inner.session.private_key());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            tracing::warn!(connection = NAME, "Broadcaster is gone");
                            return;
                        }
                    }
                }
            }
        }
        let _ = stream.close(None).await;
    }
}

#[async_trait]
impl Connection for NetworkConnection {
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
        self.inner.slot.stop_instance().await;
        tracing::info!(connection = NAME, "Connection stopped");
    }
}

impl std::fmt::Debug for NetworkConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConnection")
            .field("url", &self.inner.sds.websocket_url())
            .finish_non_exhaustive()
    }
}
