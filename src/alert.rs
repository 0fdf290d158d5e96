//! Alerting collaborators, used only by the recovery policy when an error
//! class runs out of retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert endpoint returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), AlertError>;
}

/// Writes alerts to the log at error level.
#[derive(Debug, Default)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        tracing::error!(target: "cadence::alert", "{message}");
        Ok(())
    }
}

/// Posts alerts as JSON to an HTTP webhook.
pub struct WebhookAlerter {
    url: String,
    client: Client,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "source": "cadence",
                "text": message,
                "sent_at": Utc::now().to_rfc3339(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(url = %self.url, "manual-intervention alert delivered");
        Ok(())
    }
}

/// Keeps alerts in memory. Useful for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryAlerter {
    sent: Mutex<Vec<String>>,
}

impl MemoryAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Alerter for MemoryAlerter {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        self.sent.lock().push(message.to_string());
        Ok(())
    }
}
