//! Telegram Bot API client, used both as the chat delivery transport and as
//! the update source for the command front-end.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::types::{ChatTransport, DigestError, Result, SendReceipt};

const API_BASE: &str = "https://api.telegram.org";

/// Escapes the three characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub struct TelegramChannel {
    client: reqwest::Client,
    bot_token: String,
    chunk_limit: usize,
    poll_timeout_secs: u64,
    last_update_id: AtomicI64,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or_else(|| DigestError::Config("TELEGRAM_BOT_TOKEN is not set".to_string()))?;
        // Long polls hold the request open for poll_timeout_secs.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()?;
        Ok(Self {
            client,
            bot_token,
            chunk_limit: config.chunk_limit,
            poll_timeout_secs: config.poll_timeout_secs,
            last_update_id: AtomicI64::new(0),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.bot_token, method)
    }

    /// Sends one HTML-formatted message with link previews disabled.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<i64> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let result: TelegramApiResponse<TelegramMessage> = response
            .json()
            .await
            .map_err(|e| DigestError::Chat(format!("invalid sendMessage response ({}): {}", status, e)))?;

        if !result.ok {
            return Err(DigestError::Chat(format!(
                "sendMessage to {} failed: {}",
                chat_id,
                result.description.unwrap_or_else(|| status.to_string())
            )));
        }
        let message_id = result
            .result
            .map(|m| m.message_id)
            .ok_or_else(|| DigestError::Chat("sendMessage returned no message".to_string()))?;
        debug!("Sent message {} to {}", message_id, chat_id);
        Ok(message_id)
    }

    /// Long-polls for new updates past the last one seen.
    pub async fn get_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let offset = self.last_update_id.load(Ordering::SeqCst) + 1;
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| DigestError::Chat(format!("invalid getUpdates response: {}", e)))?;
        if !body.ok {
            return Err(DigestError::Chat(format!(
                "getUpdates failed: {}",
                body.description.unwrap_or_default()
            )));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.last_update_id.fetch_max(last, Ordering::SeqCst);
        }
        Ok(updates)
    }
}

#[async_trait]
impl ChatTransport for TelegramChannel {
    fn max_chunk_len(&self) -> usize {
        self.chunk_limit
    }

    async fn send_chunk(&self, recipient_id: &str, text: &str) -> anyhow::Result<SendReceipt> {
        let message_id = self.send_message(recipient_id, text).await?;
        Ok(SendReceipt {
            message_id: Some(message_id),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl TelegramUser {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn parses_update_payload() {
        let raw = r#"{
            "ok": true,
            "result": [{
                "update_id": 7,
                "message": {
                    "message_id": 3,
                    "from": {"id": 42, "is_bot": false, "first_name": "Ada", "username": "ada"},
                    "chat": {"id": 42, "type": "private"},
                    "text": "/start",
                    "date": 1700000000
                }
            }]
        }"#;
        let parsed: TelegramApiResponse<Vec<TelegramUpdate>> = serde_json::from_str(raw).unwrap();
        let update = &parsed.result.unwrap()[0];
        let message = update.message.as_ref().unwrap();
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert_eq!(message.from.as_ref().unwrap().display_name(), "Ada");
        assert_eq!(message.chat.chat_type, "private");
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let config = TelegramConfig {
            bot_token: None,
            fallback_chat_ids: Vec::new(),
            chunk_limit: 4000,
            poll_timeout_secs: 30,
        };
        assert!(matches!(TelegramChannel::new(&config), Err(DigestError::Config(_))));
    }
}
