//! Persistence layer: libSQL-backed storage for addresses and processed records.

mod libsql_backend;
pub mod migrations;
mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ClaimOutcome, Database, InsertOutcome, TransitionOutcome};
