//! Notification delivery to the owner's messaging channel.

pub mod dispatcher;
#[cfg(test)]
pub(crate) mod mock;
pub mod render;
pub mod telegram;

pub use dispatcher::{ActionEffect, NotificationDispatcher};
pub use render::{Action, MessagePayload, Renderer};
pub use telegram::TelegramMessenger;

use async_trait::async_trait;

use crate::error::ChannelError;

/// Outbound side of a messaging channel.
///
/// Implementations never retry internally; a failed send is reported to the
/// caller, which decides whether the record stays pending.
#[async_trait]
pub trait Messenger: Send + Sync {
    fn name(&self) -> &str;

    /// Send one notification with its action buttons.
    async fn send_notification(
        &self,
        chat_id: &str,
        payload: &MessagePayload,
    ) -> Result<(), ChannelError>;

    /// Send a plain reply (command responses).
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Acknowledge a button press so the client stops its spinner.
    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;
}
