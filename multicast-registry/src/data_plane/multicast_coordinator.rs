/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Multicast fan-out: snapshot targets, deliver concurrently under a deadline, and
//! account for every target.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

use super::delivery::deliver_with_retry;
use super::{DeliverySemantics, DeliveryState, DeliveryStatus, MulticastRequest, MulticastResult};
use crate::backend::{DurabilitySink, MessagingSink, MulticastMessage, RegistryStore};
use crate::config::DeliveryConfig;
use crate::error::RegistryError;
use crate::observability::{events, fields};
use crate::routing::target_resolution::TargetResolver;

const COMPONENT: &str = "multicast_coordinator";

/// Namespace delivery defaults resolved from config.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DeliverySettings {
    pub(crate) default_semantics: DeliverySemantics,
    pub(crate) retry_attempts: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) default_timeout: Duration,
    pub(crate) max_concurrency: usize,
}

impl From<&DeliveryConfig> for DeliverySettings {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            default_semantics: config.default_semantics,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            max_concurrency: config.max_concurrency.clamp(1, Semaphore::MAX_PERMITS),
        }
    }
}

/// Exactly-once needs a transactional store and a transactional durability sink.
pub(crate) fn supports_exactly_once(
    store: &dyn RegistryStore,
    durability: Option<&Arc<dyn DurabilitySink>>,
) -> bool {
    store.supports_transactions() && durability.is_some_and(|sink| sink.is_transactional())
}

pub(crate) struct MulticastCoordinator {
    namespace: String,
    resolver: Arc<TargetResolver>,
    messaging: Arc<dyn MessagingSink>,
    durability: Option<Arc<dyn DurabilitySink>>,
    exactly_once: bool,
    settings: DeliverySettings,
}

impl MulticastCoordinator {
    pub(crate) fn new(
        namespace: &str,
        resolver: Arc<TargetResolver>,
        messaging: Arc<dyn MessagingSink>,
        durability: Option<Arc<dyn DurabilitySink>>,
        exactly_once: bool,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            resolver,
            messaging,
            durability,
            exactly_once,
            settings,
        }
    }

    /// Fails with `INVALID_CONFIGURATION` when the bound slots cannot honor
    /// `semantics`.
    pub(crate) fn check_semantics(&self, semantics: DeliverySemantics) -> Result<(), RegistryError> {
        if semantics == DeliverySemantics::ExactlyOnce && !self.exactly_once {
            return Err(RegistryError::invalid_configuration(format!(
                "namespace '{}': EXACTLY_ONCE needs a transactional registry store and durability sink",
                self.namespace
            )));
        }
        Ok(())
    }

    pub(crate) async fn multicast(
        &self,
        request: MulticastRequest,
    ) -> Result<MulticastResult, RegistryError> {
        let semantics = request.semantics.unwrap_or(self.settings.default_semantics);
        self.check_semantics(semantics)?;
        let timeout = request.timeout.unwrap_or(self.settings.default_timeout);
        if timeout.is_zero() {
            return Err(RegistryError::invalid_argument("multicast timeout must be positive"));
        }
        let deadline = Instant::now() + timeout;

        let targets: Vec<String> = self
            .resolver
            .resolve_all(request.filter.as_ref())
            .await?
            .into_iter()
            .map(|record| record.identity)
            .collect();
        let message = Arc::new(MulticastMessage::new(request.payload, request.content_type));
        let msg_id = message.message_id.to_string();

        info!(
            event = events::MULTICAST_START,
            component = COMPONENT,
            namespace = self.namespace.as_str(),
            msg_id = msg_id.as_str(),
            semantics = ?semantics,
            filter = %fields::format_filter(request.filter.as_ref()),
            target_count = targets.len(),
            timeout_ms = timeout.as_millis() as u64,
            "multicast started"
        );

        let mut statuses: Vec<Option<DeliveryStatus>> = vec![None; targets.len()];
        let entries = self
            .enqueue_before_delivery(semantics, &targets, &message, &mut statuses)
            .await;
        self.fan_out(semantics, &targets, &message, &entries, &mut statuses, deadline)
            .await;

        let mut statuses: Vec<DeliveryStatus> = statuses
            .into_iter()
            .zip(&targets)
            .zip(&entries)
            .map(|((status, identity), entry)| {
                status.unwrap_or_else(|| self.timed_out(identity, entry.is_some(), semantics))
            })
            .collect();

        if semantics == DeliverySemantics::AtLeastOnce {
            self.enqueue_leftovers(&message, &mut statuses).await;
        }

        let result = MulticastResult {
            target_count: targets.len(),
            delivered_count: statuses
                .iter()
                .filter(|status| status.status == DeliveryState::Delivered)
                .count(),
            statuses,
        };
        info!(
            event = events::MULTICAST_COMPLETE,
            component = COMPONENT,
            namespace = self.namespace.as_str(),
            msg_id = msg_id.as_str(),
            target_count = result.target_count,
            delivered_count = result.delivered_count,
            pending_count = result.count(DeliveryState::Pending),
            failed_count = result.count(DeliveryState::Failed),
            timeout_count = result.count(DeliveryState::Timeout),
            "multicast complete"
        );
        Ok(result)
    }

    /// Exactly-once entries are persisted, leased, before any delivery starts. A
    /// target whose entry cannot be written is failed without delivery.
    async fn enqueue_before_delivery(
        &self,
        semantics: DeliverySemantics,
        targets: &[String],
        message: &Arc<MulticastMessage>,
        statuses: &mut [Option<DeliveryStatus>],
    ) -> Vec<Option<Uuid>> {
        let durability = match (&self.durability, semantics) {
            (Some(durability), DeliverySemantics::ExactlyOnce) => durability,
            _ => return vec![None; targets.len()],
        };

        let enqueued = join_all(
            targets
                .iter()
                .map(|identity| durability.enqueue(identity, message.clone(), true)),
        )
        .await;

        let mut entries = Vec::with_capacity(targets.len());
        for (index, result) in enqueued.into_iter().enumerate() {
            match result {
                Ok(entry_id) => entries.push(Some(entry_id)),
                Err(err) => {
                    warn!(
                        event = events::DELIVERY_ENQUEUE_FAILED,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = targets[index].as_str(),
                        err = %err,
                        "exactly-once enqueue failed; target not delivered"
                    );
                    statuses[index] = Some(DeliveryStatus {
                        identity: targets[index].clone(),
                        status: DeliveryState::Failed,
                        error: Some(err.to_string()),
                        attempts: 0,
                    });
                    entries.push(None);
                }
            }
        }
        entries
    }

    /// Spawns one task per target and collects their statuses until `deadline`.
    /// Tasks still running at the deadline are abandoned, not cancelled.
    async fn fan_out(
        &self,
        semantics: DeliverySemantics,
        targets: &[String],
        message: &Arc<MulticastMessage>,
        entries: &[Option<Uuid>],
        statuses: &mut [Option<DeliveryStatus>],
        deadline: Instant,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let (status_tx, mut status_rx) = mpsc::channel::<(usize, DeliveryStatus)>(targets.len().max(1));
        let max_attempts = match semantics {
            DeliverySemantics::AtMostOnce => 1,
            _ => self.settings.retry_attempts,
        };

        for (index, identity) in targets.iter().enumerate() {
            if statuses[index].is_some() {
                continue;
            }
            let task = TargetTask {
                namespace: self.namespace.clone(),
                identity: identity.clone(),
                message: message.clone(),
                messaging: self.messaging.clone(),
                queued: entries[index].zip(self.durability.clone()),
                max_attempts,
                retry_delay: self.settings.retry_delay,
            };
            let semaphore = semaphore.clone();
            let status_tx = status_tx.clone();
            tokio::spawn(async move {
                // A target still waiting for a permit at the deadline is already
                // reported as timed out and must not be attempted afterwards.
                let Ok(Ok(_permit)) =
                    tokio::time::timeout_at(deadline, semaphore.acquire_owned()).await
                else {
                    return;
                };
                let status = task.run().await;
                // The receiver is gone once the deadline has passed.
                let _ = status_tx.send((index, status)).await;
            });
        }
        drop(status_tx);

        let collect = async {
            while let Some((index, status)) = status_rx.recv().await {
                statuses[index] = Some(status);
            }
        };
        let _ = tokio::time::timeout_at(deadline, collect).await;
    }

    /// At-least-once: failed and timed-out targets go to the durability sink and are
    /// reported pending when the write succeeds.
    async fn enqueue_leftovers(
        &self,
        message: &Arc<MulticastMessage>,
        statuses: &mut [DeliveryStatus],
    ) {
        let Some(durability) = &self.durability else {
            return;
        };
        let leftovers: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| {
                matches!(status.status, DeliveryState::Failed | DeliveryState::Timeout)
            })
            .map(|(index, _)| index)
            .collect();
        if leftovers.is_empty() {
            return;
        }

        let enqueued = join_all(leftovers.iter().map(|&index| {
            durability.enqueue(&statuses[index].identity, message.clone(), false)
        }))
        .await;

        for (index, result) in leftovers.into_iter().zip(enqueued) {
            let status = &mut statuses[index];
            match result {
                Ok(entry_id) => {
                    debug!(
                        event = events::DELIVERY_ENQUEUED,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = status.identity.as_str(),
                        entry_id = %entry_id,
                        "queued for redelivery"
                    );
                    status.status = DeliveryState::Pending;
                }
                Err(err) => {
                    warn!(
                        event = events::DELIVERY_ENQUEUE_FAILED,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = status.identity.as_str(),
                        err = %err,
                        "redelivery enqueue failed"
                    );
                    let reason = status.error.take().unwrap_or_default();
                    status.error = Some(format!("{reason}; enqueue failed: {err}"));
                }
            }
        }
    }

    fn timed_out(
        &self,
        identity: &str,
        queued: bool,
        semantics: DeliverySemantics,
    ) -> DeliveryStatus {
        if tracing::enabled!(Level::DEBUG) {
            debug!(
                event = events::DELIVERY_TIMEOUT,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity,
                "delivery abandoned at the multicast deadline"
            );
        }
        // A leased exactly-once entry outlives the request and is redelivered once its
        // lease lapses.
        let status = if queued && semantics == DeliverySemantics::ExactlyOnce {
            DeliveryState::Pending
        } else {
            DeliveryState::Timeout
        };
        DeliveryStatus {
            identity: identity.to_string(),
            status,
            error: Some("delivery did not complete before the multicast deadline".to_string()),
            attempts: 0,
        }
    }
}

/// Delivery work for one target, owned by its spawned task.
struct TargetTask {
    namespace: String,
    identity: String,
    message: Arc<MulticastMessage>,
    messaging: Arc<dyn MessagingSink>,
    /// Leased exactly-once entry to settle after delivery.
    queued: Option<(Uuid, Arc<dyn DurabilitySink>)>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl TargetTask {
    async fn run(self) -> DeliveryStatus {
        let outcome = deliver_with_retry(
            self.messaging.as_ref(),
            &self.identity,
            self.message.clone(),
            self.max_attempts,
            self.retry_delay,
        )
        .await;

        let (status, error) = match (outcome.result, &self.queued) {
            (Ok(()), Some((entry_id, durability))) => {
                if let Err(err) = durability.acknowledge(*entry_id).await {
                    warn!(
                        event = events::DELIVERY_ACK_FAILED,
                        component = COMPONENT,
                        namespace = self.namespace.as_str(),
                        identity = self.identity.as_str(),
                        err = %err,
                        "delivered but acknowledgement failed; a duplicate may follow"
                    );
                }
                (DeliveryState::Delivered, None)
            }
            (Ok(()), None) => (DeliveryState::Delivered, None),
            (Err(err), Some((entry_id, durability))) => match durability.requeue(*entry_id).await {
                Ok(true) => (DeliveryState::Pending, Some(err.to_string())),
                Ok(false) => (DeliveryState::Failed, Some(err.to_string())),
                Err(requeue_err) => (
                    DeliveryState::Failed,
                    Some(format!("{err}; requeue failed: {requeue_err}")),
                ),
            },
            (Err(err), None) => (DeliveryState::Failed, Some(err.to_string())),
        };

        if tracing::enabled!(Level::DEBUG) {
            let event = if status == DeliveryState::Delivered {
                events::DELIVERY_OK
            } else {
                events::DELIVERY_FAILED
            };
            debug!(
                event,
                component = COMPONENT,
                namespace = self.namespace.as_str(),
                identity = self.identity.as_str(),
                msg_id = %self.message.message_id,
                attempts = outcome.attempts,
                status = ?status,
                err = fields::format_optional_error(error.as_deref()),
                "target delivery settled"
            );
        }

        DeliveryStatus {
            identity: self.identity,
            status,
            error,
            attempts: outcome.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{supports_exactly_once, DeliverySettings, MulticastCoordinator};
    use crate::backend::{
        DurabilitySink, InMemoryDurabilitySink, InMemoryMessagingSink, InMemoryRegistryStore,
        MessagingSink, MulticastMessage, PutMode, RegistrationRecord, RegistryStore,
    };
    use crate::clock::{Clock, ManualClock};
    use crate::config::FilterEvaluation;
    use crate::data_plane::{DeliverySemantics, DeliveryState, MulticastRequest};
    use crate::error::{RegistryCode, RegistryError};
    use crate::filter::Filter;
    use crate::metadata::metadata;
    use crate::routing::target_resolution::TargetResolver;
    use crate::runtime::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fails or stalls chosen identities, delivers the rest.
    struct ScriptedSink {
        failing: HashSet<String>,
        stalled: HashSet<String>,
        attempted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessagingSink for ScriptedSink {
        fn name(&self) -> &str {
            "scripted"
        }

        fn requires_subscription(&self) -> bool {
            false
        }

        async fn subscribe(&self, _identity: &str) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn unsubscribe(&self, _identity: &str) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn deliver(
            &self,
            identity: &str,
            _message: Arc<MulticastMessage>,
        ) -> Result<(), RegistryError> {
            self.attempted.lock().unwrap().push(identity.to_string());
            if self.stalled.contains(identity) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.contains(identity) {
                return Err(RegistryError::backend_unavailable("scripted", "unreachable"));
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    fn settings() -> DeliverySettings {
        DeliverySettings {
            default_semantics: DeliverySemantics::AtMostOnce,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(10),
            default_timeout: Duration::from_secs(1),
            max_concurrency: 8,
        }
    }

    async fn coordinator(
        identities: &[&str],
        messaging: Arc<dyn MessagingSink>,
        durability: Option<Arc<dyn DurabilitySink>>,
    ) -> MulticastCoordinator {
        coordinator_with(settings(), identities, messaging, durability).await
    }

    async fn coordinator_with(
        settings: DeliverySettings,
        identities: &[&str],
        messaging: Arc<dyn MessagingSink>,
        durability: Option<Arc<dyn DurabilitySink>>,
    ) -> MulticastCoordinator {
        let clock = Arc::new(ManualClock::starting_now());
        let store: Arc<dyn RegistryStore> = Arc::new(InMemoryRegistryStore::new(clock.clone()));
        for identity in identities {
            let record = RegistrationRecord::new(
                identity,
                metadata([("zone", "1".into())]),
                clock.now(),
            );
            store.put(record, PutMode::Create).await.unwrap();
        }
        let exactly_once = supports_exactly_once(store.as_ref(), durability.as_ref());
        let resolver = Arc::new(TargetResolver::new(
            store,
            FilterEvaluation::Auto,
            RetryPolicy::default(),
            100,
        ));
        MulticastCoordinator::new("test", resolver, messaging, durability, exactly_once, settings)
    }

    fn scripted_sink(failing: &[&str], stalled: &[&str]) -> Arc<ScriptedSink> {
        Arc::new(ScriptedSink {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            stalled: stalled.iter().map(|s| s.to_string()).collect(),
            attempted: Mutex::new(Vec::new()),
        })
    }

    fn scripted(failing: &[&str], stalled: &[&str]) -> Arc<dyn MessagingSink> {
        scripted_sink(failing, stalled)
    }

    #[tokio::test]
    async fn zero_targets_is_a_successful_empty_result() {
        let coordinator = coordinator(&[], Arc::new(InMemoryMessagingSink::default()), None).await;

        let result = coordinator
            .multicast(MulticastRequest::new(Some(Filter::eq("zone", "9")), vec![]))
            .await
            .unwrap();

        assert_eq!(result.target_count, 0);
        assert_eq!(result.delivered_count, 0);
        assert!(result.statuses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_and_failing_targets_do_not_block_the_rest() {
        let coordinator = coordinator(&["a", "b", "c"], scripted(&["b"], &["c"]), None).await;

        let result = coordinator
            .multicast(MulticastRequest::new(None, b"x".to_vec()))
            .await
            .unwrap();

        assert_eq!(result.target_count, 3);
        assert_eq!(result.delivered_count, 1);
        assert_eq!(result.status_of("a").unwrap().status, DeliveryState::Delivered);
        let failed = result.status_of("b").unwrap();
        assert_eq!(failed.status, DeliveryState::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(result.status_of("c").unwrap().status, DeliveryState::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn targets_still_queued_for_a_permit_at_the_deadline_are_never_attempted() {
        let sink = scripted_sink(&[], &["a", "b"]);
        let coordinator = coordinator_with(
            DeliverySettings {
                max_concurrency: 1,
                ..settings()
            },
            &["a", "b"],
            sink.clone(),
            None,
        )
        .await;

        let result = coordinator
            .multicast(
                MulticastRequest::new(None, b"x".to_vec())
                    .with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert_eq!(result.status_of("a").unwrap().status, DeliveryState::Timeout);
        assert_eq!(result.status_of("b").unwrap().status, DeliveryState::Timeout);

        // Let the stalled holder finish and release its permit.
        tokio::time::sleep(Duration::from_secs(7200)).await;

        assert_eq!(sink.attempted.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn at_least_once_queues_leftovers_as_pending() {
        let clock = Arc::new(ManualClock::starting_now());
        let durability = Arc::new(InMemoryDurabilitySink::new(clock));
        let sink: Arc<dyn DurabilitySink> = durability.clone();
        let coordinator =
            coordinator(&["a", "b", "c"], scripted(&["b"], &["c"]), Some(sink)).await;

        let result = coordinator
            .multicast(
                MulticastRequest::new(None, b"x".to_vec())
                    .with_semantics(DeliverySemantics::AtLeastOnce),
            )
            .await
            .unwrap();

        assert_eq!(result.status_of("a").unwrap().status, DeliveryState::Delivered);
        let pending = result.status_of("b").unwrap();
        assert_eq!(pending.status, DeliveryState::Pending);
        assert_eq!(pending.attempts, 3);
        assert_eq!(result.status_of("c").unwrap().status, DeliveryState::Pending);
        assert_eq!(durability.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn exactly_once_on_non_transactional_slots_is_a_configuration_error() {
        let clock = Arc::new(ManualClock::starting_now());
        let durability: Arc<dyn DurabilitySink> = Arc::new(InMemoryDurabilitySink::new(clock));
        let coordinator =
            coordinator(&["a"], Arc::new(InMemoryMessagingSink::default()), Some(durability))
                .await;

        let err = coordinator
            .multicast(
                MulticastRequest::new(None, b"x".to_vec())
                    .with_semantics(DeliverySemantics::ExactlyOnce),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code, RegistryCode::InvalidConfiguration);
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let coordinator =
            coordinator(&["a"], Arc::new(InMemoryMessagingSink::default()), None).await;

        let err = coordinator
            .multicast(MulticastRequest::new(None, vec![]).with_timeout(Duration::ZERO))
            .await
            .unwrap_err();

        assert_eq!(err.code, RegistryCode::InvalidArgument);
    }
}
