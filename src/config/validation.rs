//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (retries > 0, batch size > 0, gas adjustment >= 1)
//! - Check that endpoint, bind address and fee strings parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::blockchain::types::Coin;
use crate::config::schema::{ConnectionRetries, RelayConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every violation.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.sds.network_address.trim().is_empty() {
        errors.push(ValidationError::new("sds.network_address", "must not be empty"));
    }
    check_port(&mut errors, "sds.api_port", &config.sds.api_port);
    check_port(&mut errors, "sds.websocket_port", &config.sds.websocket_port);
    check_retries(&mut errors, "sds.connection_retries", &config.sds.connection_retries);

    let chain = &config.stratos_chain;
    for (field, server) in std::iter::once(("stratos_chain.rest_server", &chain.rest_server))
        .chain(chain.rest_failover_servers.iter().map(|s| ("stratos_chain.rest_failover_servers", s)))
    {
        if let Err(e) = url::Url::parse(server) {
            errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", server, e)));
        }
    }
    if chain.websocket_server.trim().is_empty() {
        errors.push(ValidationError::new("stratos_chain.websocket_server", "must not be empty"));
    }
    if chain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("stratos_chain.rpc_timeout_secs", "must be greater than 0"));
    }
    check_retries(&mut errors, "stratos_chain.connection_retries", &chain.connection_retries);

    if chain.broadcast.channel_size == 0 {
        errors.push(ValidationError::new("stratos_chain.broadcast.channel_size", "must be greater than 0"));
    }
    if chain.broadcast.max_msg_per_tx == 0 {
        errors.push(ValidationError::new("stratos_chain.broadcast.max_msg_per_tx", "must be greater than 0"));
    }
    if chain.broadcast.max_interval_ms == 0 {
        errors.push(ValidationError::new("stratos_chain.broadcast.max_interval_ms", "must be greater than 0"));
    }

    let info = &config.blockchain_info;
    if info.chain_id.trim().is_empty() {
        errors.push(ValidationError::new("blockchain_info.chain_id", "must not be empty"));
    }
    if let Err(e) = info.transactions.gas_price.parse::<Coin>() {
        errors.push(ValidationError::new("blockchain_info.transactions.gas_price", e.to_string()));
    }
    let adjustment = info.transactions.gas_adjustment;
    if !adjustment.is_finite() || adjustment < 1.0 {
        errors.push(ValidationError::new(
            "blockchain_info.transactions.gas_adjustment",
            format!("must be a finite number >= 1.0, got {}", adjustment),
        ));
    }

    if config.keys.wallet_path.trim().is_empty() {
        errors.push(ValidationError::new("keys.wallet_path", "must not be empty"));
    }
    if config.dedup.ttl_secs == 0 {
        errors.push(ValidationError::new("dedup.ttl_secs", "must be greater than 0"));
    }
    if config.rpc.http_enabled && config.rpc.http_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "rpc.http_address",
            format!("invalid socket address '{}'", config.rpc.http_address),
        ));
    }
    if config.rpc.ipc_enabled && config.rpc.ipc_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("rpc.ipc_path", "must not be empty"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_port(errors: &mut Vec<ValidationError>, field: &str, port: &str) {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => errors.push(ValidationError::new(field, format!("invalid port '{}'", port))),
        Ok(_) => {}
    }
}

fn check_retries(errors: &mut Vec<ValidationError>, field: &str, retries: &ConnectionRetries) {
    if retries.max == 0 {
        errors.push(ValidationError::new(format!("{}.max", field), "must be greater than 0"));
    }
}
