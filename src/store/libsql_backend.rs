//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Conditional writes rely on
//! the affected-row count returned by `execute`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::model::{Address, AddressState, NotificationState, ProcessedRecord, RawObjectRef};
use crate::store::migrations;
use crate::store::traits::{ClaimOutcome, Database, InsertOutcome, TransitionOutcome};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width so lexical order matches time order.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn conversion_error(reason: String) -> libsql::Error {
    libsql::Error::ConnectionFailed(reason)
}

const ADDRESS_COLUMNS: &str = "address_id, owner_id, state, created_at, disabled_at";

const RECORD_COLUMNS: &str = "message_id, address_id, owner_id, subject, summary_text, summary_source, raw_object_ref, notification_state, created_at, delivery_attempts, last_error, updated_at";

/// Map a libsql Row to an Address. Column order matches ADDRESS_COLUMNS.
fn row_to_address(row: &libsql::Row) -> Result<Address, libsql::Error> {
    let state_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let disabled_str: Option<String> = row.get(4).ok();

    Ok(Address {
        address_id: row.get(0)?,
        owner_id: row.get(1)?,
        state: state_str.parse::<AddressState>().map_err(conversion_error)?,
        created_at: parse_datetime(&created_str),
        disabled_at: parse_optional_datetime(&disabled_str),
    })
}

/// Map a libsql Row to a ProcessedRecord. Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<ProcessedRecord, libsql::Error> {
    let source_str: String = row.get(5)?;
    let raw_ref: String = row.get(6)?;
    let state_str: String = row.get(7)?;
    let created_str: String = row.get(8)?;
    let attempts: i64 = row.get(9)?;
    let updated_str: String = row.get(11)?;

    Ok(ProcessedRecord {
        message_id: row.get(0)?,
        address_id: row.get(1)?,
        owner_id: row.get(2)?,
        subject: row.get(3)?,
        summary_text: row.get(4)?,
        summary_source: source_str.parse().map_err(conversion_error)?,
        raw_object_ref: RawObjectRef::new(raw_ref),
        notification_state: state_str
            .parse::<NotificationState>()
            .map_err(conversion_error)?,
        created_at: parse_datetime(&created_str),
        delivery_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.get(10).ok(),
        updated_at: parse_datetime(&updated_str),
    })
}

fn insert_outcome(affected: u64) -> InsertOutcome {
    if affected == 0 {
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted
    }
}

fn transition_outcome(affected: u64) -> TransitionOutcome {
    if affected == 0 {
        TransitionOutcome::AlreadyTerminal
    } else {
        TransitionOutcome::Applied
    }
}

impl LibSqlBackend {
    /// Move a PENDING record into `target`. Only one caller can ever win.
    async fn transition_record(
        &self,
        message_id: &str,
        target: NotificationState,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE records SET notification_state = ?1, updated_at = ?2 WHERE message_id = ?3 AND notification_state = 'pending'",
                params![target.as_str(), fmt_datetime(&Utc::now()), message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_record: {e}")))?;

        let outcome = transition_outcome(affected);
        debug!(message_id, target = target.as_str(), ?outcome, "Record transition");
        Ok(outcome)
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Addresses ───────────────────────────────────────────────────

    async fn insert_address_if_absent(
        &self,
        address: &Address,
    ) -> Result<InsertOutcome, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT INTO addresses (address_id, owner_id, state, created_at, disabled_at) VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(address_id) DO NOTHING",
                params![
                    address.address_id.as_str(),
                    address.owner_id.as_str(),
                    address.state.as_str(),
                    fmt_datetime(&address.created_at),
                    opt_text_owned(address.disabled_at.as_ref().map(fmt_datetime)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_address_if_absent: {e}")))?;

        Ok(insert_outcome(affected))
    }

    async fn get_address(&self, address_id: &str) -> Result<Option<Address>, DatabaseError> {
        let sql = format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE address_id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![address_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_address: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_address: {e}")))?
        {
            Some(row) => Ok(Some(
                row_to_address(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_address row: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    async fn list_addresses(&self, owner_id: &str) -> Result<Vec<Address>, DatabaseError> {
        let sql = format!(
            "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE owner_id = ?1 ORDER BY created_at ASC, address_id ASC"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![owner_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("list_addresses: {e}")))?;

        let mut addresses = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_addresses: {e}")))?
        {
            addresses.push(
                row_to_address(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_addresses row: {e}")))?,
            );
        }
        Ok(addresses)
    }

    async fn disable_address(
        &self,
        address_id: &str,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE addresses SET state = 'disabled', disabled_at = ?1 WHERE address_id = ?2 AND state = 'active'",
                params![fmt_datetime(&at), address_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("disable_address: {e}")))?;

        Ok(transition_outcome(affected))
    }

    // ── Records ─────────────────────────────────────────────────────

    async fn insert_record_if_absent(
        &self,
        record: &ProcessedRecord,
    ) -> Result<InsertOutcome, DatabaseError> {
        let sql = format!(
            "INSERT INTO records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) ON CONFLICT(message_id) DO NOTHING"
        );
        let affected = self
            .conn()
            .execute(
                &sql,
                params![
                    record.message_id.as_str(),
                    record.address_id.as_str(),
                    record.owner_id.as_str(),
                    record.subject.as_str(),
                    record.summary_text.as_str(),
                    record.summary_source.as_str(),
                    record.raw_object_ref.as_str(),
                    record.notification_state.as_str(),
                    fmt_datetime(&record.created_at),
                    i64::from(record.delivery_attempts),
                    opt_text_owned(record.last_error.clone()),
                    fmt_datetime(&record.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_record_if_absent: {e}")))?;

        let outcome = insert_outcome(affected);
        debug!(message_id = %record.message_id, ?outcome, "Record insert");
        Ok(outcome)
    }

    async fn get_record(&self, message_id: &str) -> Result<Option<ProcessedRecord>, DatabaseError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE message_id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![message_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?
        {
            Some(row) => Ok(Some(
                row_to_record(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_record row: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    async fn mark_sent(&self, message_id: &str) -> Result<TransitionOutcome, DatabaseError> {
        self.transition_record(message_id, NotificationState::Sent)
            .await
    }

    async fn mark_suppressed(&self, message_id: &str) -> Result<TransitionOutcome, DatabaseError> {
        self.transition_record(message_id, NotificationState::Suppressed)
            .await
    }

    async fn claim_record(
        &self,
        message_id: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE records SET dispatching_until = ?1 WHERE message_id = ?2 AND notification_state = 'pending' AND (dispatching_until IS NULL OR dispatching_until < ?3)",
                params![fmt_datetime(&until), message_id, fmt_datetime(&now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_record: {e}")))?;

        let outcome = if affected == 0 {
            ClaimOutcome::Unavailable
        } else {
            ClaimOutcome::Claimed
        };
        debug!(message_id, ?outcome, "Record claim");
        Ok(outcome)
    }

    async fn record_delivery_failure(
        &self,
        message_id: &str,
        reason: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE records SET delivery_attempts = delivery_attempts + 1, last_error = ?1, dispatching_until = NULL, updated_at = ?2 WHERE message_id = ?3 AND notification_state = 'pending'",
                params![reason, fmt_datetime(&Utc::now()), message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_delivery_failure: {e}")))?;
        Ok(())
    }

    async fn list_pending_records(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProcessedRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE notification_state = 'pending' AND created_at < ?1 AND (dispatching_until IS NULL OR dispatching_until < ?2) ORDER BY created_at ASC LIMIT ?3"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn()
            .query(
                &sql,
                params![fmt_datetime(&created_before), fmt_datetime(&now), limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_records: {e}")))?
        {
            records.push(
                row_to_record(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_pending_records row: {e}")))?,
            );
        }
        Ok(records)
    }
}
