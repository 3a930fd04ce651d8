//! HTTP and IPC transports for the RPC namespaces.
//!
//! The HTTP server answers JSON-RPC bodies POSTed to `/`. The IPC server
//! reads one JSON-RPC body per line from a Unix socket and writes one reply
//! per line.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::schema::RpcConfig;
use crate::rpc::api::{QueryApi, RelayApi};
use crate::rpc::protocol::{handle_payload, RpcService};

/// Bound, not yet serving, RPC listeners.
pub struct RpcServer {
    http: Option<TcpListener>,
    #[cfg(unix)]
    ipc: Option<(tokio::net::UnixListener, PathBuf)>,
    query: Arc<QueryApi>,
    relay: Arc<RelayApi>,
}

impl RpcServer {
    /// Bind every enabled listener. Nothing is served until [`RpcServer::spawn`].
    pub async fn bind(config: &RpcConfig, query: QueryApi, relay: RelayApi) -> std::io::Result<Self> {
        let http = if config.http_enabled {
            Some(TcpListener::bind(&config.http_address).await?)
        } else {
            None
        };

        #[cfg(unix)]
        let ipc = if config.ipc_enabled {
            Some((bind_ipc(&config.ipc_path)?, config.ipc_path.clone()))
        } else {
            None
        };
        #[cfg(not(unix))]
        warn_ipc_unsupported(config);

        Ok(Self {
            http,
            #[cfg(unix)]
            ipc,
            query: Arc::new(query),
            relay: Arc::new(relay),
        })
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serve on `tracker` until `cancel` fires.
    pub fn spawn(self, tracker: &TaskTracker, cancel: CancellationToken) {
        if let Some(listener) = self.http {
            let addr = listener.local_addr().ok();
            let app = Router::new()
                .route("/", post(handle_http))
                .with_state(self.query.clone());
            let shutdown = cancel.clone().cancelled_owned();
            tracker.spawn(async move {
                tracing::info!(addr = ?addr, namespace = "query", "RPC HTTP server starting");
                if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                    tracing::error!(error = %e, "RPC HTTP server failed");
                }
                tracing::info!("RPC HTTP server stopped");
            });
        }

        #[cfg(unix)]
        spawn_ipc(self.ipc, self.relay, tracker, cancel);
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("RpcServer");
        debug.field("http", &self.http_addr());
        #[cfg(unix)]
        debug.field("ipc", &self.ipc.as_ref().map(|(_, path)| path));
        debug.finish_non_exhaustive()
    }
}

async fn handle_http(State(api): State<Arc<QueryApi>>, body: String) -> impl IntoResponse {
    let reply = handle_payload(&*api, &body).await;
    ([(header::CONTENT_TYPE, "application/json")], reply)
}

#[cfg(not(unix))]
fn warn_ipc_unsupported(config: &RpcConfig) {
    if config.ipc_enabled {
        tracing::warn!(path = %config.ipc_path.display(), "IPC endpoint needs Unix sockets, skipping");
    }
}

#[cfg(unix)]
fn spawn_ipc(
    ipc: Option<(tokio::net::UnixListener, PathBuf)>,
    relay: Arc<RelayApi>,
    tracker: &TaskTracker,
    cancel: CancellationToken,
) {
    let Some((listener, path)) = ipc else {
        return;
    };
    let service: Arc<dyn RpcService> = relay;
    tracker.spawn(serve_ipc(listener, path, service, tracker.clone(), cancel));
}

/// Bind the socket, replacing a stale one left by an earlier run.
#[cfg(unix)]
fn bind_ipc(path: &std::path::Path) -> std::io::Result<tokio::net::UnixListener> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale IPC socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::net::UnixListener::bind(path)
}

#[cfg(unix)]
async fn serve_ipc(
    listener: tokio::net::UnixListener,
    path: PathBuf,
    service: Arc<dyn RpcService>,
    connections: TaskTracker,
    cancel: CancellationToken,
) {
    tracing::info!(path = %path.display(), namespace = service.namespace(), "RPC IPC server starting");
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                connections.spawn(serve_ipc_connection(stream, service.clone(), cancel.clone()));
            }
            Err(e) => tracing::warn!(error = %e, "IPC accept failed"),
        }
    }
    if let Err(e) = std::fs::remove_file(&path) {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove IPC socket");
    }
    tracing::info!("RPC IPC server stopped");
}

#[cfg(unix)]
async fn serve_ipc_connection(stream: tokio::net::UnixStream, service: Arc<dyn RpcService>, cancel: CancellationToken) {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "IPC read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let mut reply = handle_payload(service.as_ref(), &line).await;
        reply.push('\n');
        if let Err(e) = writer.write_all(reply.as_bytes()).await {
            tracing::debug!(error = %e, "IPC write failed");
            return;
        }
    }
}
