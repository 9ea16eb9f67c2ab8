//! Telegram Bot API messenger.
//!
//! Sends notifications with an inline keyboard, plain replies, and
//! callback acknowledgements. Updates arrive through the webhook in
//! `server`, so there is no polling loop here.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::error::ChannelError;
use crate::notify::Messenger;
use crate::notify::render::{Action, MessagePayload, markdown_to_plain};

/// Default Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Per-request timeout. Keeps a hung call well inside a dispatch lease.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram messenger backed by the Bot API.
pub struct TelegramMessenger {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramMessenger {
    pub fn new(bot_token: SecretString, api_base: impl Into<String>) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("HTTP client init failed: {e}"),
            })?;
        Ok(Self {
            bot_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
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

    /// Send one message, trying Markdown first with plain text fallback.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_markup: Option<&Value>,
    ) -> Result<(), ChannelError> {
        let mut markdown_body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(markup) = reply_markup {
            markdown_body["reply_markup"] = markup.clone();
        }

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        let _markdown_err = markdown_resp.text().await.unwrap_or_default();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        // Retry without parse_mode
        let mut plain_body = json!({
            "chat_id": chat_id,
            "text": markdown_to_plain(text),
        });
        if let Some(markup) = reply_markup {
            plain_body["reply_markup"] = markup.clone();
        }
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {}, plain: {})",
                    markdown_status, plain_err
                ),
            });
        }

        Ok(())
    }
}

/// Inline keyboard with one button per row.
pub fn inline_keyboard(actions: &[Action]) -> Value {
    let rows: Vec<Value> = actions
        .iter()
        .map(|action| match action {
            Action::Download { url } => json!([{ "text": action.label(), "url": url }]),
            Action::Deactivate { .. } => json!([{
                "text": action.label(),
                "callback_data": action.callback_data().unwrap_or_default(),
            }]),
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

#[async_trait]
impl Messenger for TelegramMessenger {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_notification(
        &self,
        chat_id: &str,
        payload: &MessagePayload,
    ) -> Result<(), ChannelError> {
        if payload.text.chars().count() > TELEGRAM_MAX_MESSAGE_LENGTH {
            return Err(ChannelError::InvalidMessage(format!(
                "notification exceeds {TELEGRAM_MAX_MESSAGE_LENGTH} chars"
            )));
        }
        let markup = inline_keyboard(&payload.actions);
        self.send_message(chat_id, &payload.text, Some(&markup))
            .await
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message(chat_id, &chunk, None).await?;
        }
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = Value::String(text.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("answerCallbackQuery failed: {err}"),
            });
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|_| ChannelError::HealthCheckFailed {
                name: "telegram".into(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: "telegram".into(),
            })
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_chars {
        let hard_cut = remaining
            .char_indices()
            .nth(max_chars)
            .map_or(remaining.len(), |(i, _)| i);
        let window = &remaining[..hard_cut];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard_cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
