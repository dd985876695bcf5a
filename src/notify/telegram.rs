//! Telegram Bot API delivery via `sendMessage`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};

use super::{Notification, Notifier, ParseMode};
use crate::config::TelegramConfig;
use crate::error::DeliveryError;

/// JSON body of a `sendMessage` call.
#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
    disable_web_page_preview: bool,
}

/// Posts notifications to one Telegram chat.
pub struct TelegramNotifier {
    api_base: String,
    bot_token: SecretString,
    chat_id: String,
    disable_preview: bool,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Build the notifier. Every request is bounded by `config.timeout`.
    pub fn new(config: &TelegramConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            api_base: config.api_base.clone(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            disable_preview: config.disable_preview,
            client,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn post(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: &notification.text,
            parse_mode: notification.parse_mode,
            disable_web_page_preview: self.disable_preview,
        };

        // `without_url` keeps the bot token out of error messages and logs.
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(e.without_url()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(chat_id = %self.chat_id, "Telegram sendMessage accepted");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        warn!(status = %status, chat_id = %self.chat_id, "Telegram sendMessage rejected");
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
