//! Unified `Database` trait: single async interface for all persistence.
//!
//! Every mutation is a conditional write. The outcome enums report whether
//! the write took effect, which is how concurrent triggers coordinate
//! without locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::model::{Address, ProcessedRecord};

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row did not exist and was written.
    Inserted,
    /// A row with the same key already existed. Nothing was written.
    Duplicate,
}

/// Result of a compare-and-swap state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row was in the expected state and has moved on.
    Applied,
    /// The row had already left the expected state (or does not exist).
    AlreadyTerminal,
}

/// Result of taking the dispatch lease on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller holds the lease and may deliver.
    Claimed,
    /// Another dispatcher holds an unexpired lease, or the record is
    /// terminal or missing.
    Unavailable,
}

/// Backend-agnostic database trait covering addresses and processed records.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Addresses ───────────────────────────────────────────────────

    /// Insert an address unless its id is already taken.
    async fn insert_address_if_absent(
        &self,
        address: &Address,
    ) -> Result<InsertOutcome, DatabaseError>;

    async fn get_address(&self, address_id: &str) -> Result<Option<Address>, DatabaseError>;

    /// All addresses of an owner, oldest first (ties broken by id).
    async fn list_addresses(&self, owner_id: &str) -> Result<Vec<Address>, DatabaseError>;

    /// ACTIVE → DISABLED. `AlreadyTerminal` if already disabled or missing.
    async fn disable_address(
        &self,
        address_id: &str,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DatabaseError>;

    // ── Records ─────────────────────────────────────────────────────

    /// Insert a record unless its `message_id` exists. Sole dedup mechanism.
    async fn insert_record_if_absent(
        &self,
        record: &ProcessedRecord,
    ) -> Result<InsertOutcome, DatabaseError>;

    async fn get_record(&self, message_id: &str) -> Result<Option<ProcessedRecord>, DatabaseError>;

    /// PENDING → SENT.
    async fn mark_sent(&self, message_id: &str) -> Result<TransitionOutcome, DatabaseError>;

    /// PENDING → SUPPRESSED.
    async fn mark_suppressed(&self, message_id: &str) -> Result<TransitionOutcome, DatabaseError>;

    /// Lease a PENDING record for delivery until `until`.
    ///
    /// Succeeds only when no other lease is live at `now`.
    async fn claim_record(
        &self,
        message_id: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DatabaseError>;

    /// Bump the attempt counter of a PENDING record, keep the last error
    /// and release its lease. The notification state is left unchanged.
    async fn record_delivery_failure(
        &self,
        message_id: &str,
        reason: &str,
    ) -> Result<(), DatabaseError>;

    /// PENDING records created before `created_before`, oldest first.
    /// Records leased past `now` are skipped.
    async fn list_pending_records(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProcessedRecord>, DatabaseError>;
}
