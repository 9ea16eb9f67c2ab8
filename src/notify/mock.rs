//! Recording messenger for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::notify::{MessagePayload, Messenger};

/// Records every call; optionally fails or slows notifications.
#[derive(Default)]
pub struct RecordingMessenger {
    pub fail_notifications: bool,
    pub send_delay: Duration,
    pub notifications: Mutex<Vec<(String, MessagePayload)>>,
    pub texts: Mutex<Vec<(String, String)>>,
    pub callbacks: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingMessenger {
    pub fn failing() -> Self {
        Self {
            fail_notifications: true,
            ..Self::default()
        }
    }

    pub fn slow(send_delay: Duration) -> Self {
        Self {
            send_delay,
            ..Self::default()
        }
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_notification(
        &self,
        chat_id: &str,
        payload: &MessagePayload,
    ) -> Result<(), ChannelError> {
        tokio::time::sleep(self.send_delay).await;
        if self.fail_notifications {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "chat not found".into(),
            });
        }
        self.notifications
            .lock()
            .unwrap()
            .push((chat_id.to_string(), payload.clone()));
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        self.texts
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.callbacks
            .lock()
            .unwrap()
            .push((callback_query_id.to_string(), text.map(String::from)));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
