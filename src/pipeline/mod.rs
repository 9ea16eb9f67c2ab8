//! Mail-to-notification pipeline.
//!
//! Three trigger kinds drive everything:
//! 1. A new raw object → parse, summarize, record (`PENDING`)
//! 2. A record change → dispatch to the owner, or suppress
//! 3. A user action → register, list, deactivate
//!
//! Stages share no in-memory state. Idempotency comes from conditional
//! writes keyed on `message_id`.

pub mod coordinator;
pub mod types;
pub mod worker;

pub use coordinator::{ChangeReceiver, ChangeSender, PipelineCoordinator, change_feed};
pub use types::{
    DispatchOutcome, RawObjectEvent, RawObjectOutcome, UserActionResult, UserCommand,
};
pub use worker::{SweepConfig, spawn_change_consumer, spawn_pending_sweep};
