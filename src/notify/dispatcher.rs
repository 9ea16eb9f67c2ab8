//! Notification dispatcher: render, deliver, and handle button actions.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{CapabilityError, ChannelError, RegistryError};
use crate::model::ProcessedRecord;
use crate::notify::Messenger;
use crate::notify::render::{Action, MessagePayload, Renderer};
use crate::registry::{AddressRegistry, Deactivation};

/// What handling an action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEffect {
    Deactivated(Deactivation),
    /// The action is handled by the client (download links).
    NoEffect,
}

pub struct NotificationDispatcher {
    renderer: Renderer,
    messenger: Arc<dyn Messenger>,
    registry: Arc<AddressRegistry>,
}

impl NotificationDispatcher {
    pub fn new(
        renderer: Renderer,
        messenger: Arc<dyn Messenger>,
        registry: Arc<AddressRegistry>,
    ) -> Self {
        Self {
            renderer,
            messenger,
            registry,
        }
    }

    pub fn render(&self, record: &ProcessedRecord) -> Result<MessagePayload, CapabilityError> {
        self.renderer.render(record)
    }

    /// One send attempt. Failures go back to the caller untouched.
    pub async fn deliver(&self, owner_id: &str, payload: &MessagePayload) -> Result<(), ChannelError> {
        self.messenger.send_notification(owner_id, payload).await?;
        debug!(owner_id, channel = self.messenger.name(), "Notification delivered");
        Ok(())
    }

    /// Apply a button action. Never sends a notification.
    pub async fn handle_action(&self, action: &Action) -> Result<ActionEffect, RegistryError> {
        match action {
            Action::Deactivate {
                owner_id,
                address_id,
            } => {
                let deactivation = self.registry.deactivate(owner_id, address_id).await?;
                info!(
                    owner_id = %owner_id,
                    address_id = %address_id,
                    newly_disabled = deactivation.newly_disabled,
                    "Deactivate action handled"
                );
                Ok(ActionEffect::Deactivated(deactivation))
            }
            Action::Download { .. } => Ok(ActionEffect::NoEffect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::LinkSigner;
    use crate::model::{AddressState, InboundMessage, RawObjectRef, SummarySource};
    use crate::notify::mock::RecordingMessenger;
    use crate::store::{Database, LibSqlBackend};
    use chrono::Duration;
    use secrecy::SecretString;

    struct Fixture {
        dispatcher: NotificationDispatcher,
        messenger: Arc<RecordingMessenger>,
        registry: Arc<AddressRegistry>,
    }

    async fn fixture(messenger: RecordingMessenger) -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let registry = Arc::new(AddressRegistry::new(db));
        let messenger = Arc::new(messenger);
        let signer = LinkSigner::new(
            "https://relay.example",
            SecretString::from("k"),
            Duration::hours(12),
        )
        .unwrap();
        let dispatcher = NotificationDispatcher::new(
            Renderer::new(signer, "relay.example"),
            messenger.clone(),
            registry.clone(),
        );
        Fixture {
            dispatcher,
            messenger,
            registry,
        }
    }

    fn record(owner: &str, address: &str) -> ProcessedRecord {
        let message = InboundMessage {
            message_id: "m1".into(),
            recipient_address_id: address.into(),
            subject: "Hello".into(),
            plain_text_body: "Body".into(),
            raw_object_ref: RawObjectRef::new("m1.eml"),
        };
        ProcessedRecord::pending(&message, owner, "Summary", SummarySource::Fallback)
    }

    #[tokio::test]
    async fn deliver_sends_to_owner_chat() {
        let f = fixture(RecordingMessenger::default()).await;
        let payload = f.dispatcher.render(&record("42", "abcd1234")).unwrap();

        f.dispatcher.deliver("42", &payload).await.unwrap();

        let sent = f.messenger.notifications.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "42");
        assert_eq!(sent[0].1, payload);
    }

    #[tokio::test]
    async fn deliver_failure_is_reported() {
        let f = fixture(RecordingMessenger::failing()).await;
        let payload = f.dispatcher.render(&record("42", "abcd1234")).unwrap();
        let err = f.dispatcher.deliver("42", &payload).await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    }

    #[tokio::test]
    async fn deactivate_action_disables_without_notifying() {
        let f = fixture(RecordingMessenger::default()).await;
        let address = f.registry.generate("42").await.unwrap();
        let payload = f
            .dispatcher
            .render(&record("42", &address.address_id))
            .unwrap();

        let effect = f.dispatcher.handle_action(&payload.actions[1]).await.unwrap();

        match effect {
            ActionEffect::Deactivated(d) => {
                assert!(d.newly_disabled);
                assert_eq!(d.address.state, AddressState::Disabled);
            }
            other => panic!("unexpected effect {other:?}"),
        }
        assert_eq!(f.messenger.notification_count(), 0);
        assert!(f.messenger.texts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn download_action_has_no_effect() {
        let f = fixture(RecordingMessenger::default()).await;
        let payload = f.dispatcher.render(&record("42", "abcd1234")).unwrap();
        assert_eq!(
            f.dispatcher.handle_action(&payload.actions[0]).await.unwrap(),
            ActionEffect::NoEffect
        );
    }

    #[tokio::test]
    async fn foreign_deactivate_is_forbidden() {
        let f = fixture(RecordingMessenger::default()).await;
        let address = f.registry.generate("42").await.unwrap();
        let forged = Action::Deactivate {
            owner_id: "99".into(),
            address_id: address.address_id.clone(),
        };
        assert!(matches!(
            f.dispatcher.handle_action(&forged).await,
            Err(RegistryError::Forbidden { .. })
        ));
    }
}
