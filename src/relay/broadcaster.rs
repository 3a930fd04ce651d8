//! Batching of unsigned messages into chain transactions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::blockchain::TxBuilder;
use crate::config::BroadcastConfig;
use crate::observability::metrics;
use crate::sds::UnsignedMessage;

/// Accumulates messages and flushes them as one transaction when the batch
/// is full or the flush window elapses, whichever comes first.
pub struct TxBroadcaster {
    builder: Arc<TxBuilder>,
    max_msgs: usize,
    window: Duration,
}

impl TxBroadcaster {
    pub fn new(builder: Arc<TxBuilder>, config: &BroadcastConfig) -> Self {
        Self {
            builder,
            max_msgs: config.max_msg_per_tx.max(1),
            window: config.max_interval(),
        }
    }

    /// Consume `rx` until it closes or `cancel` fires.
    ///
    /// Messages still buffered when the channel closes are flushed; on
    /// cancellation they are abandoned.
    pub async fn run(self, mut rx: mpsc::Receiver<UnsignedMessage>, cancel: CancellationToken) {
        let mut batch: Vec<UnsignedMessage> = Vec::with_capacity(self.max_msgs);
        let mut deadline = Instant::now() + self.window;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if !batch.is_empty() {
                        tracing::warn!(batch_size = batch.len(), "Abandoning pending batch on shutdown");
                    }
                    break;
                }

                message = rx.recv() => match message {
                    Some(message) => {
                        batch.push(message);
                        if batch.len() >= self.max_msgs {
                            self.flush(&mut batch, &cancel).await;
                            deadline = Instant::now() + self.window;
                        }
                    }
                    None => {
                        self.flush(&mut batch, &cancel).await;
                        break;
                    }
                },

                _ = tokio::time::sleep_until(deadline) => {
                    self.flush(&mut batch, &cancel).await;
                    deadline = Instant::now() + self.window;
                }
            }
        }
        tracing::debug!("Broadcaster stopped");
    }

    async fn flush(&self, batch: &mut Vec<UnsignedMessage>, cancel: &CancellationToken) {
        if batch.is_empty() {
            return;
        }
        let messages = std::mem::take(batch);
        let batch_size = messages.len();
        tracing::debug!(batch_size, "Broadcasting batch");

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(batch_size, "Batch abandoned on shutdown");
                return;
            }
            result = self.builder.broadcast(messages) => result,
        };

        match result {
            Ok(outcome) => {
                metrics::record_tx_batch(outcome.messages, true);
                tracing::info!(
                    tx_hash = %outcome.response.txhash,
                    height = outcome.response.height,
                    batch_size,
                    included = outcome.messages,
                    gas_limit = outcome.gas_limit,
                    fee = %outcome.fee,
                    "Transaction broadcast"
                );
            }
            Err(e) => {
                // No retry queue: the batch is gone.
                metrics::record_tx_batch(batch_size, false);
                tracing::error!(batch_size, error = %e, "Dropping batch after broadcast failure");
            }
        }
    }
}

impl std::fmt::Debug for TxBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxBroadcaster")
            .field("max_msgs", &self.max_msgs)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
