//! Webhook messenger for matched contract events.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::domain::{AppError, ContractEventLogsMessage, ExternalServiceError, NotificationClient};

/// Posts each contract event message as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http_client: Client,
    url: Option<String>,
}

impl WebhookNotifier {
    /// Without a URL every message is dropped with a warning.
    pub fn new(url: Option<String>) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Configuration(e.to_string()))
            })?;
        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl NotificationClient for WebhookNotifier {
    #[instrument(skip(self, message), fields(subscription_uuid = %message.subscription_uuid, logs = message.logs.len()))]
    async fn contract_event_logs_message(
        &self,
        message: &ContractEventLogsMessage,
    ) -> Result<(), AppError> {
        let Some(url) = &self.url else {
            warn!("No NOTIFIER_WEBHOOK_URL configured, dropping contract events");
            return Ok(());
        };

        let response = self
            .http_client
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Webhook request failed");
                if e.is_timeout() {
                    AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
                } else {
                    AppError::ExternalService(ExternalServiceError::Network(e.to_string()))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("webhook answered {}", status),
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(
                ExternalServiceError::InvalidResponse(format!("webhook answered {}: {}", status, body)),
            ));
        }

        debug!("Contract events delivered");
        Ok(())
    }
}
