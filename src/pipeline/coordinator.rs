//! Pipeline coordinator: one stateless invocation per trigger.
//!
//! Per `message_id` the flow is RECEIVED → PARSED → SUMMARIZED → RECORDED →
//! {DISPATCHED | SUPPRESSED}. Every step is safe to repeat: the record insert
//! and the terminal transitions are conditional writes, so redelivered or
//! concurrent triggers converge on the same stored state.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::{PipelineError, RegistryError};
use crate::mail::parse_raw_for;
use crate::model::{AddressState, ProcessedRecord};
use crate::notify::{Action, ActionEffect, NotificationDispatcher};
use crate::pipeline::types::{
    DispatchOutcome, RawObjectEvent, RawObjectOutcome, UserActionResult, UserCommand,
};
use crate::raw::RawObjectSource;
use crate::registry::AddressRegistry;
use crate::store::{ClaimOutcome, Database, InsertOutcome, TransitionOutcome};
use crate::summarizer::Summarizer;

/// How long one dispatcher owns a record. Outlasts a full delivery,
/// including the plain-text retry and message splitting.
const DISPATCH_LEASE_SECS: i64 = 60;

/// Sending half of the record-changed feed.
pub type ChangeSender = mpsc::UnboundedSender<ProcessedRecord>;

/// Receiving half of the record-changed feed.
pub type ChangeReceiver = mpsc::UnboundedReceiver<ProcessedRecord>;

/// Create a record-changed feed.
pub fn change_feed() -> (ChangeSender, ChangeReceiver) {
    mpsc::unbounded_channel()
}

pub struct PipelineCoordinator {
    db: Arc<dyn Database>,
    raw_source: Arc<dyn RawObjectSource>,
    summarizer: Arc<Summarizer>,
    registry: Arc<AddressRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    changes: ChangeSender,
}

impl PipelineCoordinator {
    pub fn new(
        db: Arc<dyn Database>,
        raw_source: Arc<dyn RawObjectSource>,
        summarizer: Arc<Summarizer>,
        registry: Arc<AddressRegistry>,
        dispatcher: Arc<NotificationDispatcher>,
        changes: ChangeSender,
    ) -> Self {
        Self {
            db,
            raw_source,
            summarizer,
            registry,
            dispatcher,
            changes,
        }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn raw_source(&self) -> &Arc<dyn RawObjectSource> {
        &self.raw_source
    }

    // ── Trigger A: new raw object ───────────────────────────────────

    /// Parse, summarize and record one raw message.
    ///
    /// `Err` only for infrastructure faults (raw object or store
    /// unavailable); nothing has been written in that case.
    pub async fn handle_raw_object(
        &self,
        event: &RawObjectEvent,
    ) -> Result<RawObjectOutcome, PipelineError> {
        self.record_raw_object(event)
            .instrument(trigger_span("new_raw_object"))
            .await
    }

    async fn record_raw_object(
        &self,
        event: &RawObjectEvent,
    ) -> Result<RawObjectOutcome, PipelineError> {
        debug!(raw_ref = %event.raw_ref, "Handling trigger");
        let raw = self.raw_source.load(&event.raw_ref).await?;

        let message = match parse_raw_for(&raw, &event.raw_ref, event.recipient.as_deref()) {
            Ok(message) => message,
            Err(e) => {
                warn!(raw_ref = %event.raw_ref, error = %e, "Unparseable raw message dropped");
                return Ok(RawObjectOutcome::Unparseable(e));
            }
        };
        let message_id = message.message_id.clone();

        let Some(address) = self.db.get_address(&message.recipient_address_id).await? else {
            warn!(
                message_id = %message_id,
                address_id = %message.recipient_address_id,
                "Mail for unknown address dropped"
            );
            return Ok(RawObjectOutcome::UnknownAddress {
                address_id: message.recipient_address_id,
            });
        };

        // Skips the remote call on redelivery. The insert below is still
        // the only dedup gate.
        if self.db.get_record(&message_id).await?.is_some() {
            debug!(message_id = %message_id, "Record exists, skipping");
            return Ok(RawObjectOutcome::Duplicate { message_id });
        }

        let summary = self
            .summarizer
            .summarize(&message.subject, &message.plain_text_body)
            .await;
        let record = ProcessedRecord::pending(&message, &address.owner_id, summary.text, summary.source);

        match self.db.insert_record_if_absent(&record).await? {
            InsertOutcome::Duplicate => {
                debug!(message_id = %message_id, "Concurrent duplicate absorbed");
                Ok(RawObjectOutcome::Duplicate { message_id })
            }
            InsertOutcome::Inserted => {
                info!(
                    message_id = %message_id,
                    address_id = %record.address_id,
                    summary_source = record.summary_source.as_str(),
                    "Record stored"
                );
                if self.changes.send(record).is_err() {
                    // The pending sweep re-emits it.
                    warn!(message_id = %message_id, "Change feed closed; record left for sweep");
                }
                Ok(RawObjectOutcome::Recorded { message_id })
            }
        }
    }

    // ── Trigger B: record changed ───────────────────────────────────

    /// Dispatch a PENDING record, or suppress it if its address is disabled.
    ///
    /// Delivery happens under a lease, so a redelivered event that arrives
    /// mid-send returns `InFlight` instead of sending again.
    pub async fn handle_record_changed(
        &self,
        record: &ProcessedRecord,
    ) -> Result<DispatchOutcome, PipelineError> {
        self.dispatch_record(record)
            .instrument(trigger_span("record_changed"))
            .await
    }

    async fn dispatch_record(
        &self,
        record: &ProcessedRecord,
    ) -> Result<DispatchOutcome, PipelineError> {
        let message_id = record.message_id.as_str();
        debug!(message_id, "Handling trigger");

        // The event may be stale; the store is authoritative.
        let current = match self.db.get_record(message_id).await? {
            Some(current) if !current.notification_state.is_terminal() => current,
            Some(_) => return Ok(DispatchOutcome::AlreadyTerminal),
            None => {
                warn!(message_id, "Change event for unknown record ignored");
                return Ok(DispatchOutcome::AlreadyTerminal);
            }
        };

        let now = Utc::now();
        let lease_until = now + chrono::Duration::seconds(DISPATCH_LEASE_SECS);
        if self.db.claim_record(message_id, now, lease_until).await? == ClaimOutcome::Unavailable {
            debug!(message_id, "Record is being dispatched elsewhere");
            return Ok(DispatchOutcome::InFlight);
        }

        let state = match self.registry.resolve_state(&current.address_id).await {
            Ok(state) => state,
            Err(RegistryError::NotFound(_)) => AddressState::Disabled,
            Err(e) => return Err(e.into()),
        };

        if state == AddressState::Disabled {
            return Ok(match self.db.mark_suppressed(message_id).await? {
                TransitionOutcome::Applied => {
                    info!(message_id, address_id = %current.address_id, "Notification suppressed");
                    DispatchOutcome::Suppressed
                }
                TransitionOutcome::AlreadyTerminal => DispatchOutcome::AlreadyTerminal,
            });
        }

        let payload = match self.dispatcher.render(&current) {
            Ok(payload) => payload,
            Err(e) => return self.delivery_failed(message_id, e.to_string()).await,
        };

        if let Err(e) = self.dispatcher.deliver(&current.owner_id, &payload).await {
            return self.delivery_failed(message_id, e.to_string()).await;
        }

        Ok(match self.db.mark_sent(message_id).await? {
            TransitionOutcome::Applied => {
                info!(message_id, owner_id = %current.owner_id, "Notification sent");
                DispatchOutcome::Sent
            }
            TransitionOutcome::AlreadyTerminal => {
                warn!(message_id, "Record reached a terminal state during delivery");
                DispatchOutcome::AlreadyTerminal
            }
        })
    }

    async fn delivery_failed(
        &self,
        message_id: &str,
        reason: String,
    ) -> Result<DispatchOutcome, PipelineError> {
        warn!(message_id, reason = %reason, "Delivery failed; record stays pending");
        self.db.record_delivery_failure(message_id, &reason).await?;
        Ok(DispatchOutcome::DeliveryFailed { reason })
    }

    // ── Trigger C: user action ──────────────────────────────────────

    /// Register, list or deactivate. Never produces a notification.
    pub async fn handle_user_action(
        &self,
        command: UserCommand,
    ) -> Result<UserActionResult, RegistryError> {
        self.apply_user_action(command)
            .instrument(trigger_span("user_action"))
            .await
    }

    async fn apply_user_action(
        &self,
        command: UserCommand,
    ) -> Result<UserActionResult, RegistryError> {
        debug!(?command, "Handling trigger");
        match command {
            UserCommand::Register { owner_id } => self
                .registry
                .generate(&owner_id)
                .await
                .map(UserActionResult::Registered),
            UserCommand::List { owner_id } => self
                .registry
                .list(&owner_id)
                .await
                .map(UserActionResult::Listed),
            UserCommand::Deactivate {
                owner_id,
                address_id,
            } => {
                let action = Action::Deactivate {
                    owner_id,
                    address_id,
                };
                match self.dispatcher.handle_action(&action).await? {
                    ActionEffect::Deactivated(d) => Ok(UserActionResult::Deactivated(d)),
                    ActionEffect::NoEffect => Ok(UserActionResult::Ignored),
                }
            }
        }
    }
}

/// One span per trigger invocation.
fn trigger_span(kind: &'static str) -> Span {
    info_span!("trigger", id = %Uuid::new_v4(), kind)
}
