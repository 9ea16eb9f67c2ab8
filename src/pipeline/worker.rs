//! Background workers: change-feed consumer and redelivery sweep.
//!
//! The consumer turns every published record into a record-changed trigger
//! on its own task. The sweep re-emits records still PENDING after a grace
//! period, which is how failed deliveries get retried. Records leased by an
//! in-flight delivery are left alone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::coordinator::{ChangeReceiver, ChangeSender, PipelineCoordinator};
use crate::pipeline::types::DispatchOutcome;
use crate::store::Database;

/// Default sweep interval: 60 seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default delivery deadline: 5 minutes from receipt.
pub const DEFAULT_DELIVERY_DEADLINE_SECS: u64 = 300;

/// Records younger than this are left to the change feed.
const SWEEP_GRACE_SECS: i64 = 30;

/// Max records re-emitted per tick.
const SWEEP_BATCH: usize = 100;

/// Settings for the redelivery sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub interval: Duration,
    pub delivery_deadline: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            delivery_deadline: Duration::from_secs(DEFAULT_DELIVERY_DEADLINE_SECS),
        }
    }
}

/// Consume the change feed until every sender is dropped.
pub fn spawn_change_consumer(
    coordinator: Arc<PipelineCoordinator>,
    mut changes: ChangeReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Change feed consumer started");
        while let Some(record) = changes.recv().await {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                match coordinator.handle_record_changed(&record).await {
                    Ok(outcome) => {
                        debug!(message_id = %record.message_id, ?outcome, "Record change handled")
                    }
                    Err(e) => {
                        error!(message_id = %record.message_id, error = %e, "Record change failed")
                    }
                }
            });
        }
        info!("Change feed closed; consumer exiting");
    })
}

/// Spawn the redelivery sweep.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_pending_sweep(
    db: Arc<dyn Database>,
    changes: ChangeSender,
    config: SweepConfig,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Pending sweep started, checking every {}s",
            config.interval.as_secs()
        );

        let mut tick = tokio::time::interval(config.interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Pending sweep shutting down");
                return;
            }

            let emitted = sweep_pending(&db, &changes, config.delivery_deadline).await;
            if emitted > 0 {
                info!("Re-emitted {emitted} pending record(s)");
            }
        }
    });

    (handle, shutdown_flag)
}

/// One sweep pass. Returns how many records were re-emitted.
pub async fn sweep_pending(
    db: &Arc<dyn Database>,
    changes: &ChangeSender,
    delivery_deadline: Duration,
) -> usize {
    let now = Utc::now();
    let cutoff = now - chrono::Duration::seconds(SWEEP_GRACE_SECS);

    let pending = match db.list_pending_records(cutoff, now, SWEEP_BATCH).await {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to list pending records: {e}");
            return 0;
        }
    };

    let deadline = chrono::Duration::from_std(delivery_deadline)
        .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_DELIVERY_DEADLINE_SECS as i64));

    let mut emitted = 0;
    for record in pending {
        let age = now - record.created_at;
        if age > deadline {
            warn!(
                message_id = %record.message_id,
                age_secs = age.num_seconds(),
                attempts = record.delivery_attempts,
                last_error = record.last_error.as_deref().unwrap_or(""),
                "Record pending past delivery deadline"
            );
        }
        if changes.send(record).is_err() {
            warn!("Change feed closed; sweep stopped");
            break;
        }
        emitted += 1;
    }
    emitted
}

/// Dispatch every pending record once, at most `concurrency` at a time.
///
/// Used at startup to drain records left behind by a previous run.
pub async fn drain_pending(
    coordinator: &PipelineCoordinator,
    concurrency: usize,
) -> Vec<DispatchOutcome> {
    let now = Utc::now();
    let pending = match coordinator
        .db()
        .list_pending_records(now, now, SWEEP_BATCH)
        .await
    {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to list pending records: {e}");
            return Vec::new();
        }
    };

    futures::stream::iter(pending)
        .map(|record| async move {
            match coordinator.handle_record_changed(&record).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(message_id = %record.message_id, error = %e, "Startup dispatch failed");
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|outcome| async move { outcome })
        .collect()
        .await
}
