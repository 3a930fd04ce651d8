//! Tendermint event subscriptions over the JSON-RPC websocket.
//!
//! One [`SubscriptionClient`] owns one socket and one query. Matching events
//! are decoded into [`RawEvent`]s and pushed into a bounded channel by a pump
//! task; the channel closes when the socket does.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::blockchain::types::{BlockchainError, BlockchainResult};
use crate::events::types::RawEvent;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const SUBSCRIBE_ID: u64 = 1;
const UNSUBSCRIBE_ID: u64 = 2;

/// Query matching transactions whose message action is `event_type`.
pub fn action_query(event_type: &str) -> String {
    format!("message.action='{}'", event_type)
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: QueryParams<'a>,
}

#[derive(Debug, Serialize)]
struct QueryParams<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<EventResult>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct EventResult {
    #[serde(default)]
    events: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

impl RpcError {
    fn describe(&self) -> String {
        if self.data.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.message, self.data)
        }
    }

    fn already_subscribed(&self) -> bool {
        self.data.contains("already subscribed") || self.message.contains("already subscribed")
    }
}

/// Strip one pair of surrounding double quotes from every value.
pub fn clean_event_strings(events: &mut HashMap<String, Vec<String>>) {
    for values in events.values_mut() {
        for value in values.iter_mut() {
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                *value = value[1..value.len() - 1].to_string();
            }
        }
    }
}

/// A live subscription for a single query.
pub struct SubscriptionClient {
    query: String,
    sink: Arc<Mutex<WsSink>>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl SubscriptionClient {
    /// Dial `endpoint`, subscribe to `query` and start pumping events.
    ///
    /// The subscribe acknowledgement must arrive within `ack_timeout`. The
    /// pump stops when `parent` is cancelled.
    pub async fn subscribe(
        endpoint: &str,
        query: &str,
        capacity: usize,
        parent: &CancellationToken,
        ack_timeout: Duration,
    ) -> BlockchainResult<(Self, mpsc::Receiver<RawEvent>)> {
        let (stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| BlockchainError::Subscription(format!("dial {}: {}", endpoint, e)))?;
        let (mut sink, mut stream) = stream.split();

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: SUBSCRIBE_ID,
            method: "subscribe",
            params: QueryParams { query },
        };
        let payload = serde_json::to_string(&request).map_err(|e| BlockchainError::Decode(e.to_string()))?;
        sink.send(Message::Text(payload.into()))
            .await
            .map_err(|e| BlockchainError::Subscription(e.to_string()))?;

        let ack = async {
            while let Some(message) = stream.next().await {
                let message = message.map_err(|e| BlockchainError::Subscription(e.to_string()))?;
                let Message::Text(text) = message else { continue };
                let response: RpcResponse = match serde_json::from_str(text.as_str()) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                if let Some(error) = response.error {
                    if error.already_subscribed() {
                        return Ok(());
                    }
                    return Err(BlockchainError::Subscription(error.describe()));
                }
                return Ok(());
            }
            Err::<(), _>(BlockchainError::Subscription(
                "socket closed before subscribe ack".to_string(),
            ))
        };
        tokio::time::timeout(ack_timeout, ack)
            .await
            .map_err(|_| BlockchainError::Timeout(ack_timeout.as_secs()))??;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = parent.child_token();
        let pump_cancel = cancel.clone();
        let pump_query = query.to_string();
        let pump = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    message = stream.next() => message,
                };
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(query = %pump_query, "Subscription socket closed");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(query = %pump_query, error = %e, "Subscription read error");
                        break;
                    }
                };
                let Some(event) = parse_event(text.as_str()) else { continue };
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                query: query.to_string(),
                sink: Arc::new(Mutex::new(sink)),
                cancel,
                pump: Some(pump),
            },
            rx,
        ))
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Ask the node to drop the subscription.
    pub async fn unsubscribe(&self) -> BlockchainResult<()> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: UNSUBSCRIBE_ID,
            method: "unsubscribe",
            params: QueryParams { query: &self.query },
        };
        let payload = serde_json::to_string(&request).map_err(|e| BlockchainError::Decode(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| BlockchainError::Subscription(e.to_string()))
    }

    /// Stop the pump and close the socket.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                tracing::warn!(query = %self.query, error = %e, "Subscription pump ended abnormally");
            }
        }
        let _ = self.sink.lock().await.close().await;
    }
}

impl std::fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// Decode an event notification. Acks and other responses yield `None`.
fn parse_event(text: &str) -> Option<RawEvent> {
    let response: RpcResponse = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable subscription message");
            return None;
        }
    };
    if let Some(error) = response.error {
        tracing::warn!(error = %error.describe(), "Subscription error notification");
        return None;
    }
    let mut events = response.result?.events?;
    clean_event_strings(&mut events);
    Some(RawEvent::new(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_query() {
        assert_eq!(action_query("volume_report"), "message.action='volume_report'");
    }

    #[test]
    fn test_clean_event_strings() {
        let mut events = HashMap::from([(
            "volume_report.epoch".to_string(),
            vec!["\"12\"".to_string(), "13".to_string(), "\"".to_string()],
        )]);
        clean_event_strings(&mut events);
        assert_eq!(events["volume_report.epoch"], vec!["12", "13", "\""]);
    }

    #[test]
    fn test_parse_event_notification() {
        let text = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "query": "message.action='volume_report'",
                "data": {},
                "events": {
                    "tx.hash": ["ABCD"],
                    "volume_report.epoch": ["\"7\""]
                }
            }
        })
        .to_string();
        let event = parse_event(&text).unwrap();
        assert_eq!(event.tx_hash, "ABCD");
        assert_eq!(event.attributes["volume_report.epoch"], vec!["7"]);
    }

    #[test]
    fn test_ack_is_not_an_event() {
        let ack = json!({"jsonrpc": "2.0", "id": 1, "result": {}}).to_string();
        assert!(parse_event(&ack).is_none());
        assert!(parse_event("garbage").is_none());
    }

    #[test]
    fn test_already_subscribed_is_tolerated() {
        let error = RpcError {
            message: "Internal error".to_string(),
            data: "already subscribed".to_string(),
        };
        assert!(error.already_subscribed());
        assert_eq!(error.describe(), "Internal error: already subscribed");
    }
}
