//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the relay daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Wallet key file location and password.
    pub keys: KeysConfig,

    /// Storage network (SDS) endpoints.
    pub sds: SdsConfig,

    /// Chain endpoints and broadcaster tuning.
    pub stratos_chain: StratosChainConfig,

    /// Chain id and fee settings.
    pub blockchain_info: BlockchainInfoConfig,

    /// Event deduplication.
    pub dedup: DedupConfig,

    /// Local JSON-RPC servers.
    pub rpc: RpcConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Wallet key file configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Encrypted key file, relative to the SP home directory.
    pub wallet_path: String,

    /// Password for the key file.
    pub wallet_password: String,

    /// Overrides the address read from the key file when non-empty.
    pub wallet_address: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            wallet_path: "account/wallet.json".to_string(),
            wallet_password: String::new(),
            wallet_address: String::new(),
        }
    }
}

/// Reconnection policy shared by both connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionRetries {
    /// Maximum dial attempts before the relay shuts down.
    pub max: u32,

    /// Fixed delay between attempts, in milliseconds.
    pub sleep_duration_ms: u64,

    /// Forced reconnect interval in seconds (0 disables).
    pub refresh_interval_secs: u64,
}

impl ConnectionRetries {
    pub fn sleep_duration(&self) -> Duration {
        Duration::from_millis(self.sleep_duration_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

impl Default for ConnectionRetries {
    fn default() -> Self {
        Self {
            max: 100,
            sleep_duration_ms: 5000,
            refresh_interval_secs: 0,
        }
    }
}

/// Storage network endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SdsConfig {
    /// Host of the SP node.
    pub network_address: String,

    /// Port of the SP HTTP API (event notifications).
    pub api_port: String,

    /// Port of the SP websocket (outbound transactions).
    pub websocket_port: String,

    /// Reconnection policy for the SDS websocket.
    pub connection_retries: ConnectionRetries,
}

impl SdsConfig {
    /// Base URL for event notifications.
    pub fn api_base_url(&self) -> String {
        format!("http://{}:{}", self.network_address, self.api_port)
    }

    /// Websocket URL for the broadcast topic.
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/websocket", self.network_address, self.websocket_port)
    }
}

impl Default for SdsConfig {
    fn default() -> Self {
        Self {
            network_address: "127.0.0.1".to_string(),
            api_port: "8081".to_string(),
            websocket_port: "8083".to_string(),
            connection_retries: ConnectionRetries::default(),
        }
    }
}

/// Chain endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StratosChainConfig {
    /// Primary REST (LCD) endpoint.
    pub rest_server: String,

    /// Tried in order when the primary fails.
    pub rest_failover_servers: Vec<String>,

    /// Tendermint RPC websocket address (host:port or ws:// URL).
    pub websocket_server: String,

    /// Timeout applied to every RPC call, in seconds.
    pub rpc_timeout_secs: u64,

    /// Reconnection policy for chain subscriptions.
    pub connection_retries: ConnectionRetries,

    /// Transaction batching.
    pub broadcast: BroadcastConfig,
}

impl StratosChainConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Websocket URL of the event subscription endpoint.
    pub fn websocket_url(&self) -> String {
        let server = self.websocket_server.trim_end_matches('/');
        let base = if let Some(rest) = server.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if let Some(rest) = server.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if server.starts_with("ws://") || server.starts_with("wss://") {
            server.to_string()
        } else {
            format!("ws://{}", server)
        };
        if base.ends_with("/websocket") {
            base
        } else {
            format!("{}/websocket", base)
        }
    }
}

impl Default for StratosChainConfig {
    fn default() -> Self {
        Self {
            rest_server: "http://127.0.0.1:1317".to_string(),
            rest_failover_servers: Vec::new(),
            websocket_server: "127.0.0.1:26657".to_string(),
            rpc_timeout_secs: 10,
            connection_retries: ConnectionRetries::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

/// Transaction broadcaster tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Capacity of the reader → broadcaster channel.
    pub channel_size: usize,

    /// Maximum messages per transaction.
    pub max_msg_per_tx: usize,

    /// Flush window for a non-empty batch, in milliseconds.
    pub max_interval_ms: u64,
}

impl BroadcastConfig {
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_size: 2000,
            max_msg_per_tx: 900,
            max_interval_ms: 500,
        }
    }
}

/// Chain identity and fee settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainInfoConfig {
    pub chain_id: String,
    pub transactions: TransactionsConfig,
}

impl Default for BlockchainInfoConfig {
    fn default() -> Self {
        Self {
            chain_id: "stratos-1".to_string(),
            transactions: TransactionsConfig::default(),
        }
    }
}

/// Fee settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionsConfig {
    /// Gas price as integer amount followed by denomination, e.g. "1000000000wei".
    pub gas_price: String,

    /// Multiplier applied to simulated gas.
    pub gas_adjustment: f64,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            gas_price: "1000000000wei".to_string(),
            gas_adjustment: 1.3,
        }
    }
}

/// Event deduplication.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a handled event suppresses redelivery, in seconds.
    pub ttl_secs: u64,
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_secs: 60 }
    }
}

/// Local JSON-RPC servers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Serve the read-only `query` namespace over HTTP.
    pub http_enabled: bool,

    /// HTTP bind address.
    pub http_address: String,

    /// Serve the `relayer` namespace on a Unix socket.
    pub ipc_enabled: bool,

    /// Socket path, relative to the relay home directory unless absolute.
    pub ipc_path: PathBuf,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            http_enabled: true,
            http_address: "127.0.0.1:8090".to_string(),
            ipc_enabled: true,
            ipc_path: PathBuf::from("relayd.ipc"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
