//! Outbound sleep onset notification

use crate::error::DetectorError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Default bound on the webhook POST
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct SleepNotification {
    sleep: bool,
}

/// Receiver of sleep onset events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_sleep(&self) -> Result<(), DetectorError>;
}

/// POSTs `{"sleep": true}` to a configured URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_sleep(&self) -> Result<(), DetectorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&SleepNotification { sleep: true })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::Notify(format!(
                "webhook {} answered {}",
                self.url, status
            )));
        }
        info!(url = %self.url, status = status.as_u16(), "sleep notification delivered");
        Ok(())
    }
}

/// Notifier used when no webhook is configured
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_sleep(&self) -> Result<(), DetectorError> {
        info!("sleep onset detected (no webhook configured)");
        Ok(())
    }
}
