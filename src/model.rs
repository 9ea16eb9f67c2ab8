//! Domain model: addresses, inbound messages, and processed records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Address ─────────────────────────────────────────────────────────

/// Lifecycle state of a generated address.
///
/// The only transition is `Active` → `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressState {
    Active,
    Disabled,
}

impl AddressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for AddressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AddressState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            _ => Err(format!("Unknown address state: {}", s)),
        }
    }
}

/// A generated mail address routed to one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Local part of the generated address. Globally unique, immutable.
    pub address_id: String,
    /// Owner identity (Telegram chat id).
    pub owner_id: String,
    pub state: AddressState,
    pub created_at: DateTime<Utc>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Address {
    /// Create a fresh active address.
    pub fn new(address_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            address_id: address_id.into(),
            owner_id: owner_id.into(),
            state: AddressState::Active,
            created_at: Utc::now(),
            disabled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == AddressState::Active
    }

    /// Full mail address under the given domain.
    pub fn email(&self, domain: &str) -> String {
        format!("{}@{}", self.address_id, domain)
    }
}

// ── Raw objects ─────────────────────────────────────────────────────

/// Opaque locator of the original raw mail content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawObjectRef(String);

impl RawObjectRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment without its extension (`a/b/msg-1.eml` → `msg-1`).
    pub fn file_stem(&self) -> &str {
        let name = self.0.rsplit('/').next().unwrap_or(&self.0);
        match name.rfind('.') {
            Some(pos) if pos > 0 => &name[..pos],
            _ => name,
        }
    }
}

impl std::fmt::Display for RawObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Inbound message ─────────────────────────────────────────────────

/// Normalized view of one raw mail. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Idempotency key threaded through every pipeline stage.
    pub message_id: String,
    pub recipient_address_id: String,
    pub subject: String,
    pub plain_text_body: String,
    pub raw_object_ref: RawObjectRef,
}

// ── Processed record ────────────────────────────────────────────────

/// Where a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Remote,
    Fallback,
}

impl SummarySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for SummarySource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" => Ok(Self::Remote),
            "fallback" => Ok(Self::Fallback),
            _ => Err(format!("Unknown summary source: {}", s)),
        }
    }
}

/// Notification state of a record. `Pending` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Pending,
    Sent,
    Suppressed,
}

impl NotificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Suppressed => "suppressed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for NotificationState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "suppressed" => Ok(Self::Suppressed),
            _ => Err(format!("Unknown notification state: {}", s)),
        }
    }
}

/// The persisted, deduplicated outcome of processing one raw message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    /// Primary key. Unique across all time.
    pub message_id: String,
    pub address_id: String,
    pub owner_id: String,
    pub subject: String,
    pub summary_text: String,
    pub summary_source: SummarySource,
    pub raw_object_ref: RawObjectRef,
    pub notification_state: NotificationState,
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub delivery_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessedRecord {
    /// Build a pending record from a parsed message, its owner, and its summary.
    pub fn pending(
        message: &InboundMessage,
        owner_id: impl Into<String>,
        summary_text: impl Into<String>,
        summary_source: SummarySource,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message.message_id.clone(),
            address_id: message.recipient_address_id.clone(),
            owner_id: owner_id.into(),
            subject: message.subject.clone(),
            summary_text: summary_text.into(),
            summary_source,
            raw_object_ref: message.raw_object_ref.clone(),
            notification_state: NotificationState::Pending,
            created_at: now,
            delivery_attempts: 0,
            last_error: None,
            updated_at: now,
        }
    }
}
