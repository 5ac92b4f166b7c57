use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{DeliveryError, DeliveryPayload, ResultSink};
use crate::config::DeliveryConfig;

const SECRET_HEADER: &str = "X-Webhook-Secret";

/// Posts results as JSON to an HTTP endpoint. Any non-2xx answer is a failure.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(url: &str, secret: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            secret: secret.filter(|s| !s.is_empty()),
            timeout,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(
            config.url.as_deref().unwrap_or_default(),
            config.secret.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ResultSink for WebhookSink {
    async fn post(&self, payload: &DeliveryPayload) -> Result<(), DeliveryError> {
        debug!("Posting result for meeting {} to {}", payload.meeting_id, self.url);

        let mut request = self.client.post(&self.url).json(payload).timeout(self.timeout);
        if let Some(secret) = &self.secret {
            request = request.header(SECRET_HEADER, secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
