//! relayd: SDS ⇄ Stratos chain relay daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                ┌──────────────────────────── relayd ────────────────────────────┐
//!   SP websocket │  NetworkConnection ──▶ TxBroadcaster ──▶ TxBuilder ──▶ REST ───┼──▶ chain
//!   ─────────────┼─▶ (reader)              (batch)          (sign)               │
//!                │                                                                │
//!   SP HTTP API  │  HandlerRegistry ◀── ChainConnection ◀── SubscriptionClient ◀──┼─── chain
//!   ◀────────────┼── (dedup, POST)        (readers)          (Tendermint ws)      │    websocket
//!                │                                                                │
//!                │  Supervisor: Session (wallet + root lifetime), start / stop    │
//!   SP CLI / ops │                                                                │
//!   ─────────────┼─▶ RpcServer: HTTP query_*, IPC relayer_sync ──▶ REST ────────┼──▶ chain
//!                └────────────────────────────────────────────────────────────────┘
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use sds_relayd::config::{load_config, RelayConfig};
use sds_relayd::lifecycle::signals::wait_for_signal;
use sds_relayd::observability::{logging, metrics};
use sds_relayd::Supervisor;

#[derive(Parser)]
#[command(name = "relayd")]
#[command(about = "Relay between an SDS storage provider and the Stratos chain", long_about = None)]
struct Cli {
    /// Relay home directory.
    #[arg(long, default_value = ".")]
    home: PathBuf,

    /// Config file, relative to the home directory unless absolute.
    #[arg(short, long, default_value = "config/relayd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until a signal arrives
    Start {
        /// SP home directory holding the wallet key file (defaults to --home)
        #[arg(long)]
        sp_home: Option<PathBuf>,
    },
    /// Load and validate the config file
    CheckConfig,
    /// Print the default configuration as TOML
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.home.join(&cli.config);

    match cli.command {
        Commands::DefaultConfig => {
            print!("{}", toml::to_string_pretty(&RelayConfig::default())?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig => match load_config(&config_path) {
            Ok(_) => {
                println!("{}: OK", config_path.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{}: {}", config_path.display(), e);
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::Start { sp_home } => {
            let mut config = load_config(&config_path)?;
            config.rpc.ipc_path = cli.home.join(&config.rpc.ipc_path);
            let sp_home = sp_home.unwrap_or_else(|| cli.home.clone());
            run(config, &config_path, &sp_home).await
        }
    }
}

async fn run(config: RelayConfig, config_path: &Path, sp_home: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %config_path.display(), "relayd starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    tracing::info!(
        sp = %config.sds.websocket_url(),
        chain_ws = %config.stratos_chain.websocket_url(),
        chain_rest = %config.stratos_chain.rest_server,
        chain_id = %config.blockchain_info.chain_id,
        "Configuration loaded"
    );

    let supervisor = Supervisor::from_config(&config, sp_home).await?;
    supervisor.start().await?;

    let fatal = tokio::select! {
        signal = wait_for_signal() => {
            match signal {
                Ok(name) => tracing::info!(signal = name, "Received signal, shutting down"),
                Err(e) => tracing::error!(error = %e, "Signal handler failed, shutting down"),
            }
            false
        }
        _ = supervisor.terminated() => true,
    };

    supervisor.stop().await;
    if fatal {
        tracing::error!("Relay terminated after losing a connection");
        return Ok(ExitCode::FAILURE);
    }
    tracing::info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}
