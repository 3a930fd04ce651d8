//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_chain_events_total` (counter): chain events received, by event type
//! - `relay_duplicate_events_total` (counter): events suppressed by the dedup cache
//! - `relay_notifications_total` (counter): indexing-service POSTs, by endpoint and status
//! - `relay_tx_batches_total` (counter): broadcast batches, by status
//! - `relay_tx_batch_messages` (histogram): messages per broadcast batch
//! - `relay_dropped_messages_total` (counter): unsigned messages dropped, by reason
//! - `relay_reconnect_attempts_total` (counter): dial attempts, by connection
//! - `relay_dedup_cache_entries` (gauge): live dedup keys

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(bind_address: SocketAddr) {
    match PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .install()
    {
        Ok(()) => tracing::info!(bind_address = %bind_address, "Prometheus metrics exporter enabled"),
        Err(error) => tracing::warn!(
            bind_address = %bind_address,
            error = %error,
            "Failed to initialize Prometheus metrics exporter"
        ),
    }
}

pub fn record_chain_event(event_type: &str) {
    counter!("relay_chain_events_total", "event_type" => event_type.to_string()).increment(1);
}

pub fn record_duplicate_event(event_type: &str) {
    counter!("relay_duplicate_events_total", "event_type" => event_type.to_string()).increment(1);
}

pub fn record_notification(endpoint: &str, success: bool) {
    counter!(
        "relay_notifications_total",
        "endpoint" => endpoint.to_string(),
        "status" => status(success)
    )
    .increment(1);
}

pub fn record_tx_batch(messages: usize, success: bool) {
    counter!("relay_tx_batches_total", "status" => status(success)).increment(1);
    histogram!("relay_tx_batch_messages").record(messages as f64);
}

pub fn record_dropped_messages(reason: &str, count: usize) {
    counter!("relay_dropped_messages_total", "reason" => reason.to_string()).increment(count as u64);
}

pub fn record_reconnect_attempt(connection: &str, success: bool) {
    counter!(
        "relay_reconnect_attempts_total",
        "connection" => connection.to_string(),
        "status" => status(success)
    )
    .increment(1);
}

pub fn record_dedup_cache_size(entries: usize) {
    gauge!("relay_dedup_cache_entries").set(entries as f64);
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
