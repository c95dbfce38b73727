//! Periodic removal of registrations whose TTL lapsed without renewal.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::registration_lifecycle::RegistrationLifecycle;
use crate::error::RegistryError;
use crate::observability::events;
use crate::runtime::background::{spawn_periodic, BackgroundTaskHandle};
use crate::runtime::retry::retry_transient;

const COMPONENT: &str = "expiry_sweeper";

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    /// Listed as expired but renewed before the conditional delete ran.
    pub skipped_renewed: usize,
    pub failed: usize,
}

/// Public health metadata for sweep attempts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepHealth {
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_sweep_succeeded: Option<bool>,
    pub last_removed: usize,
    pub total_removed: u64,
}

pub(crate) struct ExpirySweeper {
    namespace: String,
    lifecycle: Arc<RegistrationLifecycle>,
    batch_size: usize,
    health: ArcSwap<SweepHealth>,
}

impl ExpirySweeper {
    pub(crate) fn new(namespace: &str, lifecycle: Arc<RegistrationLifecycle>, batch_size: usize) -> Self {
        Self {
            namespace: namespace.to_string(),
            lifecycle,
            batch_size: batch_size.max(1),
            health: ArcSwap::from_pointee(SweepHealth::default()),
        }
    }

    pub(crate) fn health(&self) -> SweepHealth {
        self.health.load().as_ref().clone()
    }

    /// Expires every record listed as expired at the sweep's start instant.
    ///
    /// Each delete re-checks expiry against that instant, so a record renewed after
    /// it was listed survives.
    pub(crate) async fn sweep_once(&self) -> Result<SweepReport, RegistryError> {
        let now = self.lifecycle.clock().now();
        let result = self.sweep_at(now).await;

        let mut next = self.health();
        next.last_sweep_at = Some(now);
        next.last_sweep_succeeded = Some(result.is_ok());
        match &result {
            Ok(report) => {
                next.last_removed = report.expired;
                next.total_removed += report.expired as u64;
                info!(
                    event = events::SWEEP_COMPLETE,
                    component = COMPONENT,
                    namespace = self.namespace.as_str(),
                    scanned = report.scanned,
                    expired = report.expired,
                    skipped_renewed = report.skipped_renewed,
                    failed = report.failed,
                    "expiry sweep complete"
                );
            }
            Err(err) => {
                next.last_removed = 0;
                warn!(
                    event = events::SWEEP_FAILED,
                    component = COMPONENT,
                    namespace = self.namespace.as_str(),
                    err = %err,
                    "expiry sweep failed"
                );
            }
        }
        self.health.store(Arc::new(next));
        result
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, RegistryError> {
        let store = self.lifecycle.store();
        let mut report = SweepReport::default();

        loop {
            let batch = retry_transient(self.lifecycle.store_retry(), "list_expired", || {
                store.list_expired(now, self.batch_size)
            })
            .await?;
            let listed = batch.len();
            let mut removed = 0;

            for record in batch {
                report.scanned += 1;
                match self.lifecycle.expire(&record.identity, now).await {
                    Ok(true) => removed += 1,
                    Ok(false) => report.skipped_renewed += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            event = events::SWEEP_FAILED,
                            component = COMPONENT,
                            namespace = self.namespace.as_str(),
                            identity = record.identity.as_str(),
                            err = %err,
                            "failed to expire identity"
                        );
                    }
                }
            }
            report.expired += removed;

            // A full batch with no progress would list the same records again.
            if listed < self.batch_size || removed == 0 {
                break;
            }
        }
        Ok(report)
    }

    /// Runs [`ExpirySweeper::sweep_once`] every `interval` until the handle is
    /// stopped.
    pub(crate) fn start(self: &Arc<Self>, interval: Duration) -> BackgroundTaskHandle {
        let sweeper = Arc::clone(self);
        spawn_periodic("expiry_sweeper", interval, move || {
            let sweeper = sweeper.clone();
            async move {
                // Failures are logged and recorded in the health snapshot.
                let _ = sweeper.sweep_once().await;
            }
        })
    }
}
