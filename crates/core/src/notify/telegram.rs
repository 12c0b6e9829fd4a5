//! Telegram Bot API sender.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{classify_status, Delivery, Notifier, NotifyError};
use crate::config::TelegramConfig;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Sends messages with `sendMessage`; the job owner is the chat id.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Result<Self, NotifyError> {
        if config.bot_token.trim().is_empty() {
            return Err(NotifyError::Setup("telegram bot_token is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Setup(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, owner: &str, text: &str) -> Result<Delivery, NotifyError> {
        let response = match self
            .client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: owner,
                text,
                disable_web_page_preview: true,
            })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // The token is part of the URL; keep it out of the logs.
                debug!("Telegram request failed: {}", e.without_url());
                return Ok(Delivery::Unavailable);
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}
