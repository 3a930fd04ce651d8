//! Chain REST client with timeout and failover handling.
//!
//! # Responsibilities
//! - Look up account number/sequence
//! - Simulate and broadcast transactions
//! - Query node state (network id, latest height)
//! - Pass arbitrary read-only queries through for the RPC server
//! - Fall through to the next endpoint on errors and timeouts

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{
    u64_from_string_or_number, AccountInfo, BlockchainError, BlockchainResult, GasInfo, TxResponse,
};
use crate::config::schema::StratosChainConfig;

/// Chain RPC surface used by the relay.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current account number and sequence of `address`.
    async fn account(&self, address: &str) -> BlockchainResult<AccountInfo>;

    /// Estimate gas for encoded transaction bytes.
    async fn simulate(&self, tx_bytes: &[u8]) -> BlockchainResult<GasInfo>;

    /// Submit encoded transaction bytes and wait for block inclusion.
    async fn broadcast_tx_block(&self, tx_bytes: &[u8]) -> BlockchainResult<TxResponse>;

    /// Network (chain id) reported by the node.
    async fn node_network(&self) -> BlockchainResult<String>;

    /// Latest committed block height.
    async fn latest_block_height(&self) -> BlockchainResult<u64>;

    /// Raw JSON returned by a REST query path such as `/stratos/sds/v1/noz_supply`.
    async fn query(&self, path: &str) -> BlockchainResult<serde_json::Value>;
}

#[derive(Deserialize)]
struct AccountEnvelope {
    account: RawAccount,
}

#[derive(Deserialize)]
struct RawAccount {
    #[serde(default, deserialize_with = "u64_from_string_or_number")]
    account_number: u64,
    #[serde(default, deserialize_with = "u64_from_string_or_number")]
    sequence: u64,
    /// Vesting and module accounts nest the base account.
    #[serde(default)]
    base_account: Option<Box<RawAccount>>,
}

impl RawAccount {
    fn into_info(self) -> AccountInfo {
        match self.base_account {
            Some(base) => base.into_info(),
            None => AccountInfo {
                account_number: self.account_number,
                sequence: self.sequence,
            },
        }
    }
}

#[derive(Deserialize)]
struct SimulateEnvelope {
    gas_info: GasInfo,
}

#[derive(Deserialize)]
struct BroadcastEnvelope {
    tx_response: TxResponse,
}

#[derive(Deserialize)]
struct NodeInfoEnvelope {
    default_node_info: DefaultNodeInfo,
}

#[derive(Deserialize)]
struct DefaultNodeInfo {
    network: String,
}

#[derive(Deserialize)]
struct BlockEnvelope {
    block: Block,
}

#[derive(Deserialize)]
struct Block {
    header: BlockHeader,
}

#[derive(Deserialize)]
struct BlockHeader {
    #[serde(deserialize_with = "u64_from_string_or_number")]
    height: u64,
}

/// REST (LCD) client with failover across configured servers.
#[derive(Clone)]
pub struct RestChainClient {
    http: reqwest::Client,
    /// Base URLs (primary + failovers).
    servers: Vec<String>,
    timeout_duration: Duration,
}

impl RestChainClient {
    pub fn new(config: &StratosChainConfig) -> BlockchainResult<Self> {
        let timeout_duration = config.rpc_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout_duration)
            .build()
            .map_err(|e| BlockchainError::Rpc(format!("Failed to build HTTP client: {}", e)))?;

        let mut servers = Vec::new();
        for server in std::iter::once(&config.rest_server).chain(config.rest_failover_servers.iter()) {
            match url::Url::parse(server) {
                Ok(_) => servers.push(server.trim_end_matches('/').to_string()),
                Err(e) => tracing::warn!(url = %server, error = %e, "Ignoring invalid REST server URL"),
            }
        }
        if servers.is_empty() {
            return Err(BlockchainError::Rpc("No valid REST server configured".to_string()));
        }

        Ok(Self {
            http,
            servers,
            timeout_duration,
        })
    }

    /// Verify the node serves the expected chain.
    pub async fn verify_chain_id(&self, expected: &str) -> BlockchainResult<()> {
        let actual = self.node_network().await?;
        if actual != expected {
            return Err(BlockchainError::ChainMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> BlockchainResult<T> {
        self.call(path, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> BlockchainResult<T> {
        self.call(path, Some(body)).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> BlockchainResult<T> {
        let mut last_error = BlockchainError::Rpc("No REST server configured".to_string());

        for (i, server) in self.servers.iter().enumerate() {
            let url = format!("{}{}", server, path);
            let request = match &body {
                Some(body) => self.http.post(&url).json(body),
                None => self.http.get(&url),
            };
            match timeout(self.timeout_duration, Self::send(request)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e @ BlockchainError::Decode(_))) => {
                    // A decoding failure is not endpoint specific.
                    return Err(e);
                }
                Ok(Err(e)) => {
                    tracing::warn!(server_idx = i, path, error = %e, "RPC error, trying next server");
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!(server_idx = i, path, "RPC timeout, trying next server");
                    last_error = BlockchainError::Timeout(self.timeout_duration.as_secs());
                }
            }
        }
        Err(last_error)
    }

    async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> BlockchainResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| BlockchainError::Rpc(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BlockchainError::Rpc(e.to_string()))?;
        if !status.is_success() {
            return Err(BlockchainError::Rpc(format!("HTTP {}: {}", status, text)));
        }
        serde_json::from_str(&text).map_err(|e| BlockchainError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChainRpc for RestChainClient {
    async fn account(&self, address: &str) -> BlockchainResult<AccountInfo> {
        let envelope: AccountEnvelope = self
            .get(&format!("/cosmos/auth/v1beta1/accounts/{}", address))
            .await
            .map_err(|e| BlockchainError::Account {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(envelope.account.into_info())
    }

    async fn simulate(&self, tx_bytes: &[u8]) -> BlockchainResult<GasInfo> {
        let envelope: SimulateEnvelope = self
            .post(
                "/cosmos/tx/v1beta1/simulate",
                json!({ "tx_bytes": BASE64.encode(tx_bytes) }),
            )
            .await?;
        Ok(envelope.gas_info)
    }

    async fn broadcast_tx_block(&self, tx_bytes: &[u8]) -> BlockchainResult<TxResponse> {
        let envelope: BroadcastEnvelope = self
            .post(
                "/cosmos/tx/v1beta1/txs",
                json!({ "tx_bytes": BASE64.encode(tx_bytes), "mode": "BROADCAST_MODE_BLOCK" }),
            )
            .await?;
        Ok(envelope.tx_response)
    }

    async fn node_network(&self) -> BlockchainResult<String> {
        let envelope: NodeInfoEnvelope = self.get("/cosmos/base/tendermint/v1beta1/node_info").await?;
        Ok(envelope.default_node_info.network)
    }

    async fn latest_block_height(&self) -> BlockchainResult<u64> {
        let envelope: BlockEnvelope = self.get("/cosmos/base/tendermint/v1beta1/blocks/latest").await?;
        Ok(envelope.block.header.height)
    }

    async fn query(&self, path: &str) -> BlockchainResult<serde_json::Value> {
        self.get(path).await
    }
}

impl std::fmt::Debug for RestChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestChainClient")
            .field("servers", &self.servers)
            .field("timeout", &self.timeout_duration)
            .finish()
    }
}
