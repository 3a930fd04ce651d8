//! In-process mock servers for integration testing.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use sds_relayd::blockchain::Wallet;
use sds_relayd::config::RelayConfig;
use sds_relayd::config::ConnectionRetries;

/// Anvil's first development key.
pub const RELAY_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const RELAY_ADDRESS: &str = "st1relay";

pub fn relay_wallet() -> Wallet {
    Wallet::from_private_key(RELAY_KEY, Some(RELAY_ADDRESS)).unwrap()
}

pub fn retries(max: u32, sleep_duration_ms: u64) -> ConnectionRetries {
    ConnectionRetries {
        max,
        sleep_duration_ms,
        refresh_interval_secs: 0,
    }
}

/// Config pointing every endpoint at the given mock addresses.
pub fn config_for(sp_ws: SocketAddr, sp_api: SocketAddr, chain_ws: SocketAddr, chain_rest: SocketAddr) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.sds.network_address = "127.0.0.1".to_string();
    config.sds.websocket_port = sp_ws.port().to_string();
    config.sds.api_port = sp_api.port().to_string();
    config.sds.connection_retries = retries(20, 50);
    config.stratos_chain.websocket_server = chain_ws.to_string();
    config.stratos_chain.rest_server = format!("http://{}", chain_rest);
    config.stratos_chain.rpc_timeout_secs = 2;
    config.stratos_chain.connection_retries = retries(20, 50);
    config.stratos_chain.broadcast.max_interval_ms = 100;
    config.rpc.http_enabled = false;
    config.rpc.ipc_enabled = false;
    config
}

pub async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accepts TCP connections and drops them at once, counting accepts.
pub async fn start_refusing_server() -> (SocketAddr, Arc<AtomicU32>) {
    let (listener, addr) = bind_local().await;
    let accepts = Arc::new(AtomicU32::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (addr, accepts)
}

/// A request seen by [`start_http_server`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

pub type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

/// Minimal HTTP/1.1 server answering through `respond(method, path, body)`.
pub async fn start_http_server<F>(respond: F) -> (SocketAddr, Requests)
where
    F: Fn(&str, &str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let (listener, addr) = bind_local().await;
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let _ = serve_http(socket, recorded, respond).await;
            });
        }
    });
    (addr, requests)
}

async fn serve_http<F>(mut socket: TcpStream, recorded: Requests, respond: Arc<F>) -> std::io::Result<()>
where
    F: Fn(&str, &str, &str) -> (u16, String),
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let (status, reply) = respond(&method, &path, &body);
    recorded.lock().unwrap().push(RecordedRequest { method, path, body });

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        if status == 200 { "OK" } else { "Error" },
        reply.len(),
        reply
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// Chain REST endpoints answering for any account.
pub fn chain_rest_responder(method: &str, path: &str, _body: &str) -> (u16, String) {
    match (method, path) {
        ("GET", p) if p.starts_with("/cosmos/auth/v1beta1/accounts/") => (
            200,
            r#"{"account":{"@type":"/cosmos.auth.v1beta1.BaseAccount","account_number":"5","sequence":"1"}}"#.to_string(),
        ),
        ("POST", "/cosmos/tx/v1beta1/simulate") => {
            (200, r#"{"gas_info":{"gas_wanted":"0","gas_used":"1000"}}"#.to_string())
        }
        ("POST", "/cosmos/tx/v1beta1/txs") => (
            200,
            r#"{"tx_response":{"height":"7","txhash":"C0FFEE","code":0,"raw_log":""}}"#.to_string(),
        ),
        ("GET", "/cosmos/base/tendermint/v1beta1/node_info") => {
            (200, r#"{"default_node_info":{"network":"stratos-1"}}"#.to_string())
        }
        ("GET", "/cosmos/tx/v1beta1/txs/C0FFEE") => (
            200,
            r#"{"tx_response":{"height":"7","txhash":"C0FFEE","code":0,"raw_log":"","events":[
                {"type":"message","attributes":[{"key":"action","value":"volume_report"}]},
                {"type":"volume_report","attributes":[{"key":"epoch","value":"\"21\""}]}
            ]}}"#
                .to_string(),
        ),
        ("GET", "/stratos/register/v1/resource_node/stsds1node") => (
            200,
            format!(
                r#"{{"node":{{"network_address":"stsds1node","status":"BOND_STATUS_BONDED","suspend":false,"tokens":"{}"}}}}"#,
                NODE_TOKENS
            ),
        ),
        ("GET", "/stratos/sds/v1/noz_supply") => (200, r#"{"remaining":"70","total":"100"}"#.to_string()),
        _ => (404, r#"{"Msg":"not found"}"#.to_string()),
    }
}

/// Bonded tokens of the mock resource node, larger than `u128::MAX`.
pub const NODE_TOKENS: &str = "500000000000000000000000000000000000000000";

/// Indexing-service endpoint that accepts everything.
pub fn indexing_responder(_method: &str, _path: &str, _body: &str) -> (u16, String) {
    (200, r#"{"Msg":"ok"}"#.to_string())
}

/// SP websocket: records the `topics` handshake header, then sends `frames`
/// on every connection and keeps the socket open.
pub async fn start_sp_websocket(frames: Vec<String>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    start_sp_websocket_with(frames, None).await
}

/// Like [`start_sp_websocket`], but with `close_first_after` the first
/// connection sends nothing and is closed by the server after that delay.
pub async fn start_sp_websocket_with(
    frames: Vec<String>,
    close_first_after: Option<Duration>,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let (listener, addr) = bind_local().await;
    let topics = Arc::new(Mutex::new(Vec::new()));
    let seen = topics.clone();
    let connections = Arc::new(AtomicU32::new(0));

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let seen = seen.clone();
            let frames = frames.clone();
            let index = connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    if let Some(topic) = request.headers().get("topics").and_then(|v| v.to_str().ok()) {
                        seen.lock().unwrap().push(topic.to_string());
                    }
                    Ok(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, callback).await else {
                    return;
                };
                if let (0, Some(delay)) = (index, close_first_after) {
                    tokio::time::sleep(delay).await;
                    let _ = ws.close(None).await;
                    return;
                }
                for frame in frames {
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        break;
                    }
                }
            });
        }
    });
    (addr, topics)
}

/// Tendermint-style websocket: acknowledges every subscribe and, for queries
/// listed in `events`, pushes the given notifications right after the ack.
pub async fn start_chain_websocket(
    events: Vec<(String, Vec<serde_json::Value>)>,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    start_chain_websocket_with(events, None).await
}

/// Like [`start_chain_websocket`], but with `close_first = (query, delay)`
/// the first socket subscribing to `query` is closed by the server `delay`
/// after its ack.
pub async fn start_chain_websocket_with(
    events: Vec<(String, Vec<serde_json::Value>)>,
    close_first: Option<(String, Duration)>,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let (listener, addr) = bind_local().await;
    let queries = Arc::new(Mutex::new(Vec::new()));
    let seen = queries.clone();
    let events = Arc::new(events);
    let close_first = Arc::new(Mutex::new(close_first));

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let seen = seen.clone();
            let events = events.clone();
            let close_first = close_first.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else { continue };
                    let Ok(request) = serde_json::from_str::<serde_json::Value>(text.as_str()) else {
                        continue;
                    };
                    let id = request["id"].clone();
                    let query = request["params"]["query"].as_str().unwrap_or_default().to_string();
                    let ack = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}});
                    if ws.send(Message::Text(ack.to_string().into())).await.is_err() {
                        return;
                    }
                    if request["method"] != "subscribe" {
                        continue;
                    }
                    seen.lock().unwrap().push(query.clone());
                    for (target, notifications) in events.iter() {
                        if *target != query {
                            continue;
                        }
                        for events in notifications {
                            let notification = serde_json::json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": {"query": query, "data": {}, "events": events}
                            });
                            if ws.send(Message::Text(notification.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                    }

                    let delay = {
                        let mut close_first = close_first.lock().unwrap();
                        match close_first.as_ref() {
                            Some((target, delay)) if *target == query => {
                                let delay = *delay;
                                *close_first = None;
                                Some(delay)
                            }
                            _ => None,
                        }
                    };
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            });
        }
    });
    (addr, queries)
}

/// Poll `condition` every 20ms for up to `secs` seconds.
pub async fn wait_until<F: Fn() -> bool>(secs: u64, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
