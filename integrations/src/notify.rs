use async_trait::async_trait;
use dumpvault_core::config::NotificationConfig;
use dumpvault_core::{Error, Notification, NotificationLevel, Notifier, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let user = notification.user_id.as_deref().unwrap_or("-");
        match notification.level {
            NotificationLevel::Info => info!(user, title = %notification.title, "{}", notification.message),
            NotificationLevel::Warning => warn!(user, title = %notification.title, "{}", notification.message),
            NotificationLevel::Error => error!(user, title = %notification.title, "{}", notification.message),
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Notification(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Notification(format!("Webhook returned HTTP {}", status.as_u16())));
        }
        Ok(())
    }
}

/// Delivers to every inner notifier, returning the first failure after all
/// have been tried.
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(notification.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// The log notifier, plus a webhook when one is configured.
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url, Duration::from_secs(config.timeout_secs))?;
            Ok(Arc::new(FanoutNotifier::new(vec![Arc::new(LogNotifier), Arc::new(webhook)])))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
