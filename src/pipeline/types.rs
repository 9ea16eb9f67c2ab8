//! Shared types for the processing pipeline: triggers and their outcomes.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::model::{Address, RawObjectRef};
use crate::registry::Deactivation;

// ── Triggers ────────────────────────────────────────────────────────

/// A new raw object is available (trigger A).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObjectEvent {
    pub raw_ref: RawObjectRef,
    /// Envelope recipient, when the intake knows it. Wins over headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// A user request arriving from the messaging channel (trigger C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Register { owner_id: String },
    List { owner_id: String },
    Deactivate { owner_id: String, address_id: String },
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Terminal outcome of a new-raw-object trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawObjectOutcome {
    /// Logged and dropped. No record exists.
    Unparseable(ParseError),
    /// Recipient is not a known address. No record exists.
    UnknownAddress { address_id: String },
    /// Already processed; fully absorbed.
    Duplicate { message_id: String },
    /// New record stored and a change event published.
    Recorded { message_id: String },
}

/// Terminal outcome of a record-changed trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Already SENT or SUPPRESSED (or raced to it).
    AlreadyTerminal,
    /// Address disabled or gone; record marked SUPPRESSED.
    Suppressed,
    /// Delivered and marked SENT.
    Sent,
    /// Another dispatcher holds the record's lease.
    InFlight,
    /// Owner unreachable; record stays PENDING.
    DeliveryFailed { reason: String },
}

/// Result of a user command, for the caller to show to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserActionResult {
    Registered(Address),
    Listed(Vec<Address>),
    Deactivated(Deactivation),
    /// The action had nothing to apply.
    Ignored,
}
