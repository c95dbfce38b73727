//! Drains the durability queue back through the messaging sink.

use std::sync::Arc;
use tracing::{debug, info, warn, Level};

use crate::backend::{DurabilitySink, MessagingSink, PendingDelivery};
use crate::config::RedeliveryConfig;
use crate::error::{RegistryCode, RegistryError};
use crate::observability::events;
use crate::routing::target_resolution::TargetResolver;

const COMPONENT: &str = "redelivery";

/// Counts from one drain pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub requeued: usize,
    /// Entries discarded because the target is gone or the attempt cap was hit.
    pub dropped: usize,
}

pub(crate) struct RedeliveryWorker {
    namespace: String,
    resolver: Arc<TargetResolver>,
    messaging: Arc<dyn MessagingSink>,
    durability: Arc<dyn DurabilitySink>,
    batch_size: usize,
    max_attempts: u32,
}

impl RedeliveryWorker {
    pub(crate) fn new(
        namespace: &str,
        resolver: Arc<TargetResolver>,
        messaging: Arc<dyn MessagingSink>,
        durability: Arc<dyn DurabilitySink>,
        config: &RedeliveryConfig,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            resolver,
            messaging,
            durability,
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Leases one batch and settles every entry in it.
    pub(crate) async fn drain_once(&self) -> Result<RedeliveryReport, RegistryError> {
        let batch = self.durability.dequeue(self.batch_size).await?;
        let mut report = RedeliveryReport::default();

        for entry in batch {
            report.attempted += 1;
            match self.redeliver(&entry).await {
                Settled::Delivered => report.delivered += 1,
                Settled::Requeued => report.requeued += 1,
                Settled::Dropped => report.dropped += 1,
            }
        }

        if report.attempted > 0 {
            info!(
                event = events::REDELIVERY_COMPLETE,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                attempted = report.attempted,
                delivered = report.delivered,
                requeued = report.requeued,
                dropped = report.dropped,
                "redelivery pass complete"
            );
        }
        Ok(report)
    }

    async fn redeliver(&self, entry: &PendingDelivery) -> Settled {
        match self.resolver.get(&entry.identity).await {
            Ok(_) => {}
            Err(err) if err.code == RegistryCode::NotFound => {
                return self.drop_entry(entry, "target no longer registered").await;
            }
            Err(err) => {
                // Registry unreachable: leave the lease to lapse and retry later.
                warn!(
                    event = events::REDELIVERY_FAILED,
                    component = COMPONENT,
                    namespace = self.namespace.as_str(),
                    identity = entry.identity.as_str(),
                    err = %err,
                    "could not confirm redelivery target"
                );
                return Settled::Requeued;
            }
        }

        match self
            .messaging
            .deliver(&entry.identity, entry.message.clone())
            .await
        {
            Ok(()) => {
                if let Err(err) = self.durability.acknowledge(entry.entry_id).await {
                    warn!(
                        event = events::DELIVERY_ACK_FAILED,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = entry.identity.as_str(),
                        err = %err,
                        "redelivered but acknowledgement failed"
                    );
                }
                if tracing::enabled!(Level::DEBUG) {
                    debug!(
                        event = events::DELIVERY_OK,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = entry.identity.as_str(),
                        msg_id = %entry.message.message_id,
                        attempts = entry.attempts + 1,
                        "redelivered"
                    );
                }
                Settled::Delivered
            }
            Err(err) if entry.attempts + 1 >= self.max_attempts => {
                self.drop_entry(entry, &err.to_string()).await
            }
            Err(err) => {
                if let Err(requeue_err) = self.durability.requeue(entry.entry_id).await {
                    warn!(
                        event = events::REDELIVERY_FAILED,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = entry.identity.as_str(),
                        err = %requeue_err,
                        "requeue failed; entry returns when its lease lapses"
                    );
                } else if tracing::enabled!(Level::DEBUG) {
                    debug!(
                        event = events::REDELIVERY_FAILED,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = entry.identity.as_str(),
                        attempts = entry.attempts + 1,
                        err = %err,
                        "redelivery failed; requeued"
                    );
                }
                Settled::Requeued
            }
        }
    }

    async fn drop_entry(&self, entry: &PendingDelivery, reason: &str) -> Settled {
        warn!(
            event = events::REDELIVERY_DROPPED,
            component = COMPONENT,
            namespace = self.namespace.as_str(),
            identity = entry.identity.as_str(),
            msg_id = %entry.message.message_id,
            attempts = entry.attempts + 1,
            reason,
            "dropping queued delivery"
        );
        if let Err(err) = self.durability.acknowledge(entry.entry_id).await {
            warn!(
                event = events::DELIVERY_ACK_FAILED,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity = entry.identity.as_str(),
                err = %err,
                "could not discard queued delivery"
            );
        }
        Settled::Dropped
    }
}

enum Settled {
    Delivered,
    Requeued,
    Dropped,
}
