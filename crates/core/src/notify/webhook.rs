//! Generic JSON webhook sender.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{classify_status, Delivery, Notifier, NotifyError};
use crate::config::WebhookConfig;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    owner: &'a str,
    text: &'a str,
}

/// POSTs `{"owner": ..., "text": ...}` to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig, timeout: Duration) -> Result<Self, NotifyError> {
        if config.url.trim().is_empty() {
            return Err(NotifyError::Setup("webhook url is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Setup(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, owner: &str, text: &str) -> Result<Delivery, NotifyError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { owner, text });
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Webhook {} unreachable: {}", self.url, e);
                return Ok(Delivery::Unavailable);
            }
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let config = WebhookConfig {
            url: "http://127.0.0.1:9/hook".to_string(),
            bearer_token: None,
        };
        let notifier = WebhookNotifier::new(&config, Duration::from_secs(2)).unwrap();
        let delivery = notifier.notify("42", "hello").await.unwrap();
        assert_eq!(delivery, Delivery::Unavailable);
    }
}
