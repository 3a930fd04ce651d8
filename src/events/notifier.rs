//! HTTP callbacks to the storage network's indexing service.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::SdsConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },
}

/// Destination for event notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// POST a JSON `body` to `endpoint` (a path such as `/pp/activated`).
    async fn post(&self, endpoint: &str, body: Vec<u8>) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Deserialize)]
struct NotifyResponse {
    #[serde(rename = "Msg", default)]
    msg: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(config: &SdsConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let base_url = config.api_base_url();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport {
                endpoint: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn post(&self, endpoint: &str, body: Vec<u8>) -> Result<(), NotifyError> {
        let transport = |e: reqwest::Error| NotifyError::Transport {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        let reply: NotifyResponse = serde_json::from_str(&text).unwrap_or_default();
        tracing::info!(
            endpoint,
            status = status.as_u16(),
            msg = ?reply.msg,
            "Indexing service response"
        );

        if !status.is_success() {
            return Err(NotifyError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
