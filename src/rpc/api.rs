//! Methods of the `query` and `relayer` namespaces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::blockchain::subscription::clean_event_strings;
use crate::blockchain::types::{Amount, TxResponse};
use crate::blockchain::ChainRpc;
use crate::events::types::{RawEvent, TX_HASH_KEY};
use crate::events::HandlerRegistry;
use crate::rpc::protocol::{expect_at_most, param, to_result, RpcError, RpcResult, RpcService};

pub const PP_INACTIVE: u8 = 0;
pub const PP_ACTIVE: u8 = 1;
pub const PP_UNBONDING: u8 = 2;

/// Reply of `relayer_sync`.
pub const REQUEST_ACCEPTED: &str = "Request Accepted";

/// Activation state of a resource node as the SP sees it.
#[derive(Debug, PartialEq, Serialize)]
pub struct ResourceNodeState {
    pub is_active: u8,
    pub suspended: bool,
    pub tokens: Option<Amount>,
}

impl Default for ResourceNodeState {
    fn default() -> Self {
        Self {
            is_active: PP_INACTIVE,
            suspended: true,
            tokens: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeEnvelope {
    node: ResourceNode,
}

#[derive(Debug, Deserialize)]
struct ResourceNode {
    #[serde(default)]
    network_address: String,
    #[serde(default)]
    suspend: bool,
    #[serde(default)]
    status: Value,
    #[serde(default)]
    tokens: String,
}

/// Map a staking bond status, given by name or number, to an activation state.
fn activation(status: &Value) -> Option<u8> {
    match status {
        Value::String(name) => match name.as_str() {
            "BOND_STATUS_BONDED" => Some(PP_ACTIVE),
            "BOND_STATUS_UNBONDING" => Some(PP_UNBONDING),
            "BOND_STATUS_UNBONDED" => Some(PP_INACTIVE),
            _ => None,
        },
        Value::Number(n) => match n.as_u64()? {
            3 => Some(PP_ACTIVE),
            2 => Some(PP_UNBONDING),
            1 => Some(PP_INACTIVE),
            _ => None,
        },
        _ => None,
    }
}

/// Reject values that would change the shape of a REST path.
fn path_segment(value: &str) -> Result<&str, RpcError> {
    let invalid = value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace() || c.is_control());
    if invalid {
        return Err(RpcError::invalid_params(format!("invalid path argument '{}'", value)));
    }
    Ok(value)
}

fn take_field(mut response: Value, field: &str) -> Result<Value, RpcError> {
    match response.get_mut(field).map(Value::take) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(RpcError::server(format!("response has no '{}'", field))),
    }
}

/// Fetch a transaction, failing for unknown or unsuccessful ones.
async fn fetch_tx(chain: &dyn ChainRpc, tx_hash: &str) -> Result<Value, RpcError> {
    let response = chain
        .query(&format!("/cosmos/tx/v1beta1/txs/{}", path_segment(tx_hash)?))
        .await?;
    let tx_response = take_field(response, "tx_response")?;
    let outcome: TxResponse = serde_json::from_value(tx_response.clone())
        .map_err(|e| RpcError::server(format!("undecodable tx_response: {}", e)))?;
    if !outcome.is_success() {
        return Err(RpcError::server(format!(
            "Tx with hash[{}] failed with code {}: {}",
            tx_hash, outcome.code, outcome.raw_log
        )));
    }
    Ok(tx_response)
}

#[derive(Debug, Default, Deserialize)]
struct TxEvents {
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    events: Vec<AbciEvent>,
    #[serde(default)]
    logs: Vec<AbciLog>,
}

#[derive(Debug, Deserialize)]
struct AbciLog {
    #[serde(default)]
    events: Vec<AbciEvent>,
}

#[derive(Debug, Deserialize)]
struct AbciEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Vec<AbciAttribute>,
}

#[derive(Debug, Deserialize)]
struct AbciAttribute {
    key: String,
    #[serde(default)]
    value: String,
}

/// Flatten the events of a `tx_response` into `"<type>.<key>"` → values,
/// the same shape a subscription delivers.
///
/// Older nodes only fill the per-message logs, so those are used when the
/// top-level event list is empty.
pub fn flatten_tx_events(tx_response: &Value, tx_hash: &str) -> RawEvent {
    let parsed: TxEvents = serde_json::from_value(tx_response.clone()).unwrap_or_default();
    let events = if parsed.events.is_empty() {
        parsed.logs.into_iter().flat_map(|log| log.events).collect()
    } else {
        parsed.events
    };

    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    for event in events {
        for attribute in event.attributes {
            attributes
                .entry(format!("{}.{}", event.kind, attribute.key))
                .or_default()
                .push(attribute.value);
        }
    }
    clean_event_strings(&mut attributes);

    let hash = if parsed.txhash.is_empty() { tx_hash } else { parsed.txhash.as_str() };
    attributes.insert(TX_HASH_KEY.to_string(), vec![hash.to_string()]);
    RawEvent::new(attributes)
}

/// Read-only chain lookups, served over HTTP.
#[derive(Clone)]
pub struct QueryApi {
    chain: Arc<dyn ChainRpc>,
}

impl QueryApi {
    pub fn new(chain: Arc<dyn ChainRpc>) -> Self {
        Self { chain }
    }

    /// Base account of `address`; vesting and module accounts are unwrapped.
    pub async fn account(&self, address: &str) -> Result<Value, RpcError> {
        let response = self
            .chain
            .query(&format!("/cosmos/auth/v1beta1/accounts/{}", path_segment(address)?))
            .await?;
        let mut account = take_field(response, "account")?;
        match account.get_mut("base_account").map(Value::take) {
            Some(base) if !base.is_null() => Ok(base),
            _ => Ok(account),
        }
    }

    pub async fn resource_node(&self, p2p_address: &str) -> Result<Value, RpcError> {
        let response = self
            .chain
            .query(&format!("/stratos/register/v1/resource_node/{}", path_segment(p2p_address)?))
            .await?;
        take_field(response, "node")
    }

    /// Activation state of a resource node.
    ///
    /// A node registered under another address reads as inactive and suspended.
    pub async fn resource_node_state(&self, p2p_address: &str) -> Result<ResourceNodeState, RpcError> {
        let response = self
            .chain
            .query(&format!("/stratos/register/v1/resource_node/{}", path_segment(p2p_address)?))
            .await?;
        let envelope: NodeEnvelope = serde_json::from_value(response)
            .map_err(|e| RpcError::server(format!("undecodable resource node: {}", e)))?;
        let node = envelope.node;

        let mut state = ResourceNodeState::default();
        if node.network_address != p2p_address {
            return Ok(state);
        }
        state.suspended = node.suspend;
        if let Some(is_active) = activation(&node.status) {
            state.is_active = is_active;
        }
        let Some(tokens) = Amount::parse(&node.tokens) else {
            return Err(RpcError::server(format!(
                "token amount [{}] is an invalid integer string",
                node.tokens
            )));
        };
        state.tokens = Some(tokens);
        Ok(state)
    }

    pub async fn meta_node(&self, p2p_address: &str) -> Result<Value, RpcError> {
        let response = self
            .chain
            .query(&format!("/stratos/register/v1/meta_node/{}", path_segment(p2p_address)?))
            .await?;
        take_field(response, "node")
    }

    pub async fn tx_hash(&self, tx_hash: &str) -> Result<Value, RpcError> {
        fetch_tx(self.chain.as_ref(), tx_hash).await
    }

    pub async fn volume_report(&self, epoch: i64) -> Result<Value, RpcError> {
        if epoch < 0 {
            return Err(RpcError::invalid_params(format!("invalid epoch {}", epoch)));
        }
        Ok(self
            .chain
            .query(&format!("/stratos/pot/v1/volume_report/{}", epoch))
            .await?)
    }

    /// Remaining and total ozone supply. Both must be present and fit in `i64`.
    pub async fn noz_supply(&self) -> Result<Value, RpcError> {
        let response = self.chain.query("/stratos/sds/v1/noz_supply").await?;
        let mut supply = serde_json::Map::new();
        for (field, label) in [("remaining", "remaining ozone limit"), ("total", "total ozone supply")] {
            let raw = response.get(field).and_then(Value::as_str).unwrap_or_default();
            if raw.is_empty() {
                return Err(RpcError::server(format!("{} is empty in the response from the chain", label)));
            }
            let value: i64 = raw
                .parse()
                .map_err(|e| RpcError::server(format!("{} '{}': {}", label, raw, e)))?;
            supply.insert(field.to_string(), json!(value));
        }
        Ok(Value::Object(supply))
    }

    pub async fn merkle_root(&self, commitment: &str) -> Result<Value, RpcError> {
        Ok(self
            .chain
            .query(&format!("/stratos/register/v1/merkle_root/{}", path_segment(commitment)?))
            .await?)
    }
}

#[async_trait]
impl RpcService for QueryApi {
    fn namespace(&self) -> &'static str {
        "query"
    }

    async fn call(&self, method: &str, params: &Value) -> RpcResult {
        let arity = if method == "nozSupply" { 0 } else { 1 };
        expect_at_most(params, arity)?;

        match method {
            "account" => to_result(&self.account(&param::<String>(params, 0)?).await?),
            "resourceNode" => to_result(&self.resource_node(&param::<String>(params, 0)?).await?),
            "resourceNodeState" => to_result(&self.resource_node_state(&param::<String>(params, 0)?).await?),
            "metaNode" => to_result(&self.meta_node(&param::<String>(params, 0)?).await?),
            "txHash" => to_result(&self.tx_hash(&param::<String>(params, 0)?).await?),
            "volumeReport" => to_result(&self.volume_report(param::<i64>(params, 0)?).await?),
            "nozSupply" => to_result(&self.noz_supply().await?),
            "merkleRoot" => to_result(&self.merkle_root(&param::<String>(params, 0)?).await?),
            _ => Err(RpcError::method_not_found(&format!("{}_{}", self.namespace(), method))),
        }
    }
}

/// Relay commands, served over IPC to the local SP.
#[derive(Clone)]
pub struct RelayApi {
    chain: Arc<dyn ChainRpc>,
    registry: Arc<HandlerRegistry>,
}

impl RelayApi {
    pub fn new(chain: Arc<dyn ChainRpc>, registry: Arc<HandlerRegistry>) -> Self {
        Self { chain, registry }
    }

    /// Replay the events of an already committed transaction through the
    /// handlers, for events the subscriptions missed.
    ///
    /// Deduplication still applies, so a replay of a delivered event is a no-op.
    pub async fn sync(&self, tx_hash: &str) -> Result<Value, RpcError> {
        let tx_response = fetch_tx(self.chain.as_ref(), tx_hash).await?;
        let event = flatten_tx_events(&tx_response, tx_hash);
        let outcomes = self.registry.handle_actions(&event).await;
        tracing::info!(tx_hash = %event.tx_hash, handled = outcomes.len(), "Synced transaction");
        Ok(json!({ "Msg": REQUEST_ACCEPTED }))
    }
}

#[async_trait]
impl RpcService for RelayApi {
    fn namespace(&self) -> &'static str {
        "relayer"
    }

    async fn call(&self, method: &str, params: &Value) -> RpcResult {
        match method {
            "sync" => {
                expect_at_most(params, 1)?;
                let args: Vec<String> = param(params, 0)?;
                match args.as_slice() {
                    [tx_hash] if !tx_hash.is_empty() => to_result(&self.sync(tx_hash).await?),
                    _ => Err(RpcError::invalid_params("wrong number of arguments")),
                }
            }
            _ => Err(RpcError::method_not_found(&format!("{}_{}", self.namespace(), method))),
        }
    }
}
