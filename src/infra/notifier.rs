//! Notification delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use crate::domain::{AppError, Notifier, RemoteServiceError};

/// Posts each notification as JSON to a webhook.
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::RemoteService(RemoteServiceError::Connection(e.to_string())))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, body), fields(url = %self.url))]
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookBody {
                recipient,
                subject,
                body,
            })
            .send()
            .await
            .map_err(RemoteServiceError::from)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RemoteServiceError::Unavailable(format!("webhook returned {status}")).into());
        }
        if !status.is_success() {
            return Err(RemoteServiceError::Rejected(format!("webhook returned {status}")).into());
        }
        Ok(())
    }
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), AppError> {
        info!(recipient, subject, "Notification (log delivery)");
        Ok(())
    }
}
