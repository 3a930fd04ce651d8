//! End-to-end relay tests against in-process SP and chain mocks.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::future::join_all;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sds_relayd::blockchain::transaction::Tx;
use sds_relayd::blockchain::{RestChainClient, TxBuilder};
use sds_relayd::events::{HandlerRegistry, HttpNotifier};
use sds_relayd::relay::{ChainConnection, Connection, NetworkConnection, Session, SupervisorState};
use sds_relayd::Supervisor;

use common::*;

fn broadcast_frame(count: usize) -> String {
    let msgs: Vec<_> = (0..count)
        .map(|i| {
            json!({
                "msg": {"@type": "/stratos.sds.v1.MsgFileUpload", "file_hash": format!("f{}", i)},
                "signature_keys": [{"address": RELAY_ADDRESS}],
                "type": "sds/FileUpload"
            })
        })
        .collect();
    let data = serde_json::to_vec(&json!({ "msgs": msgs })).unwrap();
    json!({"type": "broadcast", "data": BASE64.encode(data)}).to_string()
}

fn volume_report(tx_hash: &str, epoch: &str) -> serde_json::Value {
    json!({
        "tx.hash": [tx_hash],
        "message.action": ["volume_report"],
        "volume_report.epoch": [format!("\"{}\"", epoch)]
    })
}

fn broadcast_txs(requests: &Requests) -> Vec<Tx> {
    requests
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.path == "/cosmos/tx/v1beta1/txs")
        .map(|r| {
            let body: serde_json::Value = serde_json::from_str(&r.body).unwrap();
            let bytes = BASE64.decode(body["tx_bytes"].as_str().unwrap()).unwrap();
            serde_json::from_slice(&bytes).unwrap()
        })
        .collect()
}

fn posts_to(requests: &Requests, path: &str) -> Vec<serde_json::Value> {
    requests
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.method == "POST" && r.path == path)
        .map(|r| serde_json::from_str(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_unsigned_messages_are_signed_and_broadcast() {
    let (sp_ws, topics) = start_sp_websocket(vec![broadcast_frame(3)]).await;
    let (sp_api, _) = start_http_server(indexing_responder).await;
    let (chain_ws, _) = start_chain_websocket(Vec::new()).await;
    let (chain_rest, rest_requests) = start_http_server(chain_rest_responder).await;

    let config = config_for(sp_ws, sp_api, chain_ws, chain_rest);
    let session = Session::new(relay_wallet());
    let rest = Arc::new(RestChainClient::new(&config.stratos_chain).unwrap());
    let builder = Arc::new(TxBuilder::new(rest, &config.blockchain_info).unwrap());
    let network = NetworkConnection::new(
        session.clone(),
        config.sds.clone(),
        config.stratos_chain.broadcast.clone(),
        builder,
    );

    network.trigger_refresh();
    assert!(wait_until(5, || !broadcast_txs(&rest_requests).is_empty()).await);

    let txs = broadcast_txs(&rest_requests);
    assert_eq!(txs.len(), 1);
    let tx = &txs[0];
    assert_eq!(tx.body.messages.len(), 3);
    assert_eq!(tx.auth_info.signer_infos.len(), 1);
    assert_eq!(tx.signatures.len(), 1);
    assert_eq!(tx.auth_info.signer_infos[0].sequence, "1");

    assert_eq!(topics.lock().unwrap().as_slice(), ["broadcast"]);

    network.stop().await;
    assert!(!session.lifetime().is_triggered());
}

#[tokio::test]
async fn test_duplicate_chain_events_are_posted_once() {
    let query = "message.action='volume_report'".to_string();
    let (chain_ws, queries) = start_chain_websocket(vec![(
        query.clone(),
        vec![volume_report("AAA", "12"), volume_report("AAA", "12"), volume_report("BBB", "13")],
    )])
    .await;
    let (sp_api, api_requests) = start_http_server(indexing_responder).await;
    let (unused, _) = start_refusing_server().await;

    let config = config_for(unused, sp_api, chain_ws, unused);
    let session = Session::new(relay_wallet());
    let notifier = Arc::new(HttpNotifier::new(&config.sds, Duration::from_secs(2)).unwrap());
    let registry = Arc::new(HandlerRegistry::new(notifier, config.dedup.ttl()));
    let chain = ChainConnection::new(session.clone(), config.stratos_chain.clone(), registry);

    chain.trigger_refresh();
    assert!(wait_until(5, || posts_to(&api_requests, "/volume/reported").len() >= 2).await);
    // Give a late duplicate the chance to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let posts = posts_to(&api_requests, "/volume/reported");
    assert_eq!(posts.len(), 2);
    assert!(posts.contains(&json!({"epochs": ["12"]})));
    assert!(posts.contains(&json!({"epochs": ["13"]})));

    assert!(wait_until(5, || queries.lock().unwrap().len() == 14).await);
    assert!(queries.lock().unwrap().contains(&query));
    assert_eq!(chain.subscription_count(), 14);

    chain.stop().await;
    assert_eq!(chain.subscription_count(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_cancel_the_relay() {
    let (refusing, accepts) = start_refusing_server().await;
    let (chain_ws, _) = start_chain_websocket(Vec::new()).await;
    let (chain_rest, _) = start_http_server(chain_rest_responder).await;
    let (sp_api, _) = start_http_server(indexing_responder).await;

    let mut config = config_for(refusing, sp_api, chain_ws, chain_rest);
    config.sds.connection_retries = retries(3, 20);

    let rest = Arc::new(RestChainClient::new(&config.stratos_chain).unwrap());
    let notifier = Arc::new(HttpNotifier::new(&config.sds, Duration::from_secs(2)).unwrap());
    let supervisor = Supervisor::new(&config, relay_wallet(), rest, notifier).unwrap();

    supervisor.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), supervisor.terminated())
        .await
        .expect("relay should shut itself down");
    assert_eq!(accepts.load(Ordering::SeqCst), 3);

    supervisor.stop().await;
    assert_eq!(supervisor.state().await, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_concurrent_refreshes_collapse() {
    let (refusing, accepts) = start_refusing_server().await;
    let (sp_api, _) = start_http_server(indexing_responder).await;
    let (chain_rest, _) = start_http_server(chain_rest_responder).await;

    let mut config = config_for(refusing, sp_api, refusing, chain_rest);
    config.sds.connection_retries = retries(4, 20);

    let session = Session::new(relay_wallet());
    let rest = Arc::new(RestChainClient::new(&config.stratos_chain).unwrap());
    let builder = Arc::new(TxBuilder::new(rest, &config.blockchain_info).unwrap());
    let network = NetworkConnection::new(
        session.clone(),
        config.sds.clone(),
        config.stratos_chain.broadcast.clone(),
        builder,
    );

    join_all((0..5).map(|_| network.refresh())).await;

    assert_eq!(accepts.load(Ordering::SeqCst), 4);
    assert!(session.lifetime().is_triggered());

    // Refreshing after the relay is cancelled does nothing.
    network.refresh().await;
    assert_eq!(accepts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_sp_socket_close_redials_and_broadcasts() {
    let (sp_ws, topics) = start_sp_websocket_with(vec![broadcast_frame(2)], Some(Duration::from_millis(50))).await;
    let (sp_api, _) = start_http_server(indexing_responder).await;
    let (chain_rest, rest_requests) = start_http_server(chain_rest_responder).await;

    let (unused, _) = start_refusing_server().await;

    let config = config_for(sp_ws, sp_api, unused, chain_rest);
    let session = Session::new(relay_wallet());
    let rest = Arc::new(RestChainClient::new(&config.stratos_chain).unwrap());
    let builder = Arc::new(TxBuilder::new(rest, &config.blockchain_info).unwrap());
    let network = NetworkConnection::new(
        session.clone(),
        config.sds.clone(),
        config.stratos_chain.broadcast.clone(),
        builder,
    );

    network.trigger_refresh();
    assert!(wait_until(5, || !broadcast_txs(&rest_requests).is_empty()).await);

    // The first socket carried nothing, so the frames came over the redial.
    assert_eq!(topics.lock().unwrap().len(), 2);
    let txs = broadcast_txs(&rest_requests);
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].body.messages.len(), 2);

    network.stop().await;
    assert!(!session.lifetime().is_triggered());
}

#[tokio::test]
async fn test_closed_subscription_is_resubscribed() {
    let dropped = "message.action='create_resource_node'".to_string();
    let (chain_ws, queries) =
        start_chain_websocket_with(Vec::new(), Some((dropped.clone(), Duration::from_millis(5)))).await;
    let (sp_api, _) = start_http_server(indexing_responder).await;
    let (unused, _) = start_refusing_server().await;

    let config = config_for(unused, sp_api, chain_ws, unused);
    let session = Session::new(relay_wallet());
    let notifier = Arc::new(HttpNotifier::new(&config.sds, Duration::from_secs(2)).unwrap());
    let registry = Arc::new(HandlerRegistry::new(notifier, config.dedup.ttl()));
    let chain = ChainConnection::new(session.clone(), config.stratos_chain.clone(), registry);

    chain.trigger_refresh();
    assert!(wait_until(5, || queries.lock().unwrap().len() >= 28).await);
    assert!(wait_until(5, || chain.subscription_count() == 14).await);
    // Nothing else closes, so no third round follows.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seen = queries.lock().unwrap().clone();
    assert_eq!(seen.len(), 28);
    for query in &seen {
        assert_eq!(seen.iter().filter(|q| *q == query).count(), 2, "{}", query);
    }
    assert!(seen.contains(&dropped));
    assert_eq!(chain.subscription_count(), 14);
    assert!(!session.lifetime().is_triggered());

    chain.stop().await;
    assert_eq!(chain.subscription_count(), 0);
}
