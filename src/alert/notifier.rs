use crate::alert::{Alert, AlertLevel};
use crate::error::{MlinziError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, warn};

/// Destination alerts are forwarded to
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the structured log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        match alert.level {
            AlertLevel::Critical => error!(
                component = %alert.component,
                alert_id = alert.id,
                "CRITICAL: {}",
                alert.message
            ),
            AlertLevel::Warning => warn!(
                component = %alert.component,
                alert_id = alert.id,
                "WARNING: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Posts each alert as JSON to an HTTP endpoint
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MlinziError::NotifyError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| MlinziError::NotifyError(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MlinziError::NotifyError(format!(
                "Webhook returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
