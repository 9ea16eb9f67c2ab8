//! Telegram webhook: text commands and inline-button callbacks.
//!
//! Telegram only needs a 200. Every authentic update is acknowledged,
//! including malformed ones, so Telegram never redelivers in a loop.
//! Calls without the configured secret token are refused before parsing.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use super::AppState;
use crate::error::RegistryError;
use crate::model::{Address, AddressState};
use crate::notify::Action;
use crate::pipeline::{UserActionResult, UserCommand};
use crate::registry::normalize_address_input;

/// A parsed text command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    /// `/deactivate` without an argument.
    DeactivateUsage,
    Help,
    User(UserCommand),
}

/// Map message text from `chat_id` to a command. Case-insensitive.
pub fn parse_command(chat_id: &str, text: &str) -> BotCommand {
    let text = text.trim();
    let mut words = text.split_whitespace();
    let head = words.next().unwrap_or_default().to_lowercase();
    // `/list@my_bot` in group chats.
    let head = head.split('@').next().unwrap_or_default();
    let owner_id = chat_id.to_string();

    match head {
        "/start" => BotCommand::Start,
        "/list" | "/aliases" => BotCommand::User(UserCommand::List { owner_id }),
        "/register" | "/newemail" | "/create" => BotCommand::User(UserCommand::Register { owner_id }),
        "/deactivate" | "/disable" => match words.next().and_then(normalize_address_input) {
            Some(address_id) => BotCommand::User(UserCommand::Deactivate {
                owner_id,
                address_id,
            }),
            None => BotCommand::DeactivateUsage,
        },
        _ => BotCommand::Help,
    }
}

/// Header Telegram sets to the `secret_token` given to `setWebhook`.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

pub(super) async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Value>,
) -> impl IntoResponse {
    if let Some(expected) = &state.webhook_secret {
        let presented = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if !secret_matches(expected, presented) {
            warn!("Webhook call without a valid secret token rejected");
            return (StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }

    if let Some(message) = update.get("message") {
        handle_message(&state, message).await;
    } else if let Some(callback) = update.get("callback_query") {
        handle_callback(&state, callback).await;
    } else {
        debug!("Ignoring unsupported Telegram update");
    }
    (StatusCode::OK, "ok")
}

/// Constant-time comparison against the configured secret.
fn secret_matches(expected: &SecretString, presented: Option<&str>) -> bool {
    let expected = expected.expose_secret().as_bytes();
    let Some(presented) = presented.map(str::as_bytes) else {
        return false;
    };
    expected.len() == presented.len()
        && expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

async fn handle_message(state: &AppState, message: &Value) {
    let Some(chat_id) = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
    else {
        return;
    };
    let text = message.get("text").and_then(Value::as_str).unwrap_or_default();

    let reply = match parse_command(&chat_id, text) {
        BotCommand::Start => START_TEXT.to_string(),
        BotCommand::Help => HELP_TEXT.to_string(),
        BotCommand::DeactivateUsage => DEACTIVATE_USAGE.to_string(),
        BotCommand::User(command) => {
            let result = state.coordinator.handle_user_action(command).await;
            reply_text(&result, &state.mail_domain)
        }
    };

    if let Err(e) = state.messenger.send_text(&chat_id, &reply).await {
        warn!(chat_id = %chat_id, error = %e, "Failed to send command reply");
    }
}

async fn handle_callback(state: &AppState, callback: &Value) {
    let data = callback.get("data").and_then(Value::as_str).unwrap_or_default();
    let chat_id = callback
        .get("message")
        .and_then(|m| m.get("chat"))
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());

    let mut ack = None;
    if let (Some(chat_id), Some(Action::Deactivate { owner_id, address_id })) =
        (chat_id.as_deref(), Action::from_callback_data(data))
    {
        // A button only acts for the chat it was sent to.
        let result = if owner_id == chat_id {
            state
                .coordinator
                .handle_user_action(UserCommand::Deactivate {
                    owner_id,
                    address_id,
                })
                .await
        } else {
            Err(RegistryError::Forbidden {
                owner_id: chat_id.to_string(),
                address_id,
            })
        };
        let reply = reply_text(&result, &state.mail_domain);
        ack = Some(short_ack(&result));
        if let Err(e) = state.messenger.send_text(chat_id, &reply).await {
            warn!(chat_id = %chat_id, error = %e, "Failed to send callback reply");
        }
    } else {
        debug!(data, "Ignoring callback with unknown data");
    }

    if let Some(callback_id) = callback.get("id").and_then(Value::as_str) {
        if let Err(e) = state.messenger.answer_callback(callback_id, ack).await {
            warn!(error = %e, "Failed to answer callback query");
        }
    }
}

// ── Reply texts ─────────────────────────────────────────────────────

const START_TEXT: &str = "🤖 Welcome!\n\n\
Available commands:\n\
• /list - Show your email addresses\n\
• /register - Create a new address\n\
• /deactivate <address> - Disable an address\n\n\
Send emails to your addresses to receive AI-summarized versions here!";

const HELP_TEXT: &str = "Available commands:\n\
• /list – show your email addresses\n\
• /register – create a new address\n\
• /deactivate <address-id> – disable an address\n\n\
Need help? Just type /start to begin.";

const DEACTIVATE_USAGE: &str = "Usage: /deactivate <address-id or full-email>\n\
Example: /deactivate abc123 or /deactivate abc123@domain.com";

/// User-facing text for a command result.
pub fn reply_text(result: &Result<UserActionResult, RegistryError>, mail_domain: &str) -> String {
    match result {
        Ok(UserActionResult::Registered(address)) => format!(
            "🎉 New email address created!\n\n\
*Address:* `{}`\n\n\
📧 *How to use:*\n\
1. Send or forward emails to this address\n\
2. Receive AI-summarized versions here\n\
3. Download original emails when needed\n\n\
⚙️ *Manage:* Use /deactivate to disable this address.",
            address.email(mail_domain)
        ),
        Ok(UserActionResult::Listed(addresses)) => list_text(addresses, mail_domain),
        Ok(UserActionResult::Deactivated(d)) if d.newly_disabled => format!(
            "✅ Address `{}` has been disabled.",
            d.address.address_id
        ),
        Ok(UserActionResult::Deactivated(_)) => "ℹ️ Address is already disabled.".to_string(),
        Ok(UserActionResult::Ignored) => HELP_TEXT.to_string(),
        // Foreign addresses look the same as missing ones.
        Err(RegistryError::NotFound(_) | RegistryError::Forbidden { .. }) => {
            "❌ Address not found.".to_string()
        }
        Err(RegistryError::AllocationExhausted { .. } | RegistryError::Database(_)) => {
            "❌ Something went wrong. Please try again later.".to_string()
        }
    }
}

fn list_text(addresses: &[Address], mail_domain: &str) -> String {
    if addresses.is_empty() {
        return "You have no addresses yet. 😔\n\
Use /register to generate a new email address."
            .to_string();
    }

    let mut lines = vec!["Your current email addresses:".to_string()];
    for address in addresses {
        let emoji = match address.state {
            AddressState::Active => "✅",
            AddressState::Disabled => "❌",
        };
        lines.push(format!(
            "{emoji} `{}` ({})",
            address.email(mail_domain),
            address.state
        ));
    }
    lines.push(String::new());
    lines.push("Use /register to create a new address.".to_string());
    lines.push("Use /deactivate <address-id> to disable one.".to_string());
    lines.join("\n")
}

fn short_ack(result: &Result<UserActionResult, RegistryError>) -> &'static str {
    match result {
        Ok(UserActionResult::Deactivated(d)) if d.newly_disabled => "Address disabled",
        Ok(_) => "Already disabled",
        Err(_) => "Address not found",
    }
}
