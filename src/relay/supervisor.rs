//! Relay lifecycle: owns the session and both connections.

use futures_util::future::join_all;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::WaitForCancellationFuture;
use tokio_util::task::TaskTracker;

use crate::blockchain::{BlockchainError, ChainRpc, RestChainClient, TxBuilder, Wallet};
use crate::config::{RelayConfig, RpcConfig};
use crate::events::{HandlerRegistry, HttpNotifier, Notifier, NotifyError};
use crate::relay::chain::ChainConnection;
use crate::relay::instance::Connection;
use crate::relay::network::NetworkConnection;
use crate::relay::session::Session;
use crate::rpc::{QueryApi, RelayApi, RpcServer};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("RPC server: {0}")]
    Rpc(#[source] std::io::Error),

    #[error("relay cannot start while {0:?}")]
    InvalidState(SupervisorState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Created,
    Running,
    Stopping,
    Stopped,
}

pub struct Supervisor {
    session: Session,
    network: NetworkConnection,
    chain: ChainConnection,
    chain_rpc: Arc<dyn ChainRpc>,
    registry: Arc<HandlerRegistry>,
    rpc: RpcConfig,
    servers: TaskTracker,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        config: &RelayConfig,
        wallet: Wallet,
        chain_rpc: Arc<dyn ChainRpc>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, RelayError> {
        let session = Session::new(wallet);
        let builder = Arc::new(TxBuilder::new(chain_rpc.clone(), &config.blockchain_info)?);
        let registry = Arc::new(HandlerRegistry::new(notifier, config.dedup.ttl()));

        let network = NetworkConnection::new(
            session.clone(),
            config.sds.clone(),
            config.stratos_chain.broadcast.clone(),
            builder,
        );
        let chain = ChainConnection::new(session.clone(), config.stratos_chain.clone(), registry.clone());

        Ok(Self {
            session,
            network,
            chain,
            chain_rpc,
            registry,
            rpc: config.rpc.clone(),
            servers: TaskTracker::new(),
            state: Mutex::new(SupervisorState::Created),
        })
    }

    /// Load the wallet from `sp_home` and wire the real chain and notifier clients.
    pub async fn from_config(config: &RelayConfig, sp_home: &Path) -> Result<Self, RelayError> {
        let wallet_path = sp_home.join(&config.keys.wallet_path);
        let wallet = Wallet::from_keystore(
            &wallet_path,
            &config.keys.wallet_password,
            Some(config.keys.wallet_address.as_str()),
        )?;

        let rest = RestChainClient::new(&config.stratos_chain)?;
        if let Err(e) = rest.verify_chain_id(&config.blockchain_info.chain_id).await {
            tracing::warn!(
                expected = %config.blockchain_info.chain_id,
                error = %e,
                "Could not confirm chain id"
            );
        }
        match rest.latest_block_height().await {
            Ok(height) => tracing::info!(height, "Chain reachable"),
            Err(e) => tracing::warn!(error = %e, "Could not read latest block height"),
        }
        let notifier = HttpNotifier::new(&config.sds, config.stratos_chain.rpc_timeout())?;
        tracing::info!(indexing_service = notifier.base_url(), "Notifier configured");

        Self::new(config, wallet, Arc::new(rest), Arc::new(notifier))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.lock().await
    }

    /// Bind the RPC listeners, then launch both connections.
    ///
    /// Returns without waiting for the connections. A listener that cannot
    /// be bound fails the start and leaves the relay in `Created`.
    pub async fn start(&self) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if *state != SupervisorState::Created {
            return Err(RelayError::InvalidState(*state));
        }

        let server = RpcServer::bind(
            &self.rpc,
            QueryApi::new(self.chain_rpc.clone()),
            RelayApi::new(self.chain_rpc.clone(), self.registry.clone()),
        )
        .await
        .map_err(RelayError::Rpc)?;
        tracing::debug!(server = ?server, "RPC listeners bound");
        server.spawn(&self.servers, self.session.lifetime().child());
        *state = SupervisorState::Running;

        tracing::info!(wallet = self.session.wallet_address(), "Starting relay");
        self.network.trigger_refresh();
        self.chain.trigger_refresh();
        Ok(())
    }

    /// Cancel everything and wait for all connection and server tasks. Only
    /// acts when running.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if *state != SupervisorState::Running {
                return;
            }
            *state = SupervisorState::Stopping;
        }

        tracing::info!("Stopping relay");
        self.session.lifetime().trigger();
        let connections: [&dyn Connection; 2] = [&self.network, &self.chain];
        join_all(connections.iter().map(|c| c.stop())).await;
        self.servers.close();
        self.servers.wait().await;

        *self.state.lock().await = SupervisorState::Stopped;
        tracing::info!("Relay stopped");
    }

    /// Resolves when the root lifetime is cancelled, by `stop` or by a
    /// connection that ran out of reconnection attempts.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.session.lifetime().wait()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("session", &self.session)
            .field("network", &self.network)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}
