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

//! Public facade binding one namespace's slots and layers together.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::factory::{build_durability_sink, build_messaging_sink, build_registry_store};
use crate::backend::{
    DurabilitySink, MessagingSink, PageRequest, RegistrationRecord, RegistryStore, SortKey,
};
use crate::clock::{Clock, SystemClock};
use crate::config::NamespaceConfig;
use crate::control_plane::expiry_sweeper::{ExpirySweeper, SweepHealth, SweepReport};
use crate::control_plane::registration_lifecycle::{
    LifecycleSettings, RegisterRequest, RegisterResult, RegistrationLifecycle,
};
use crate::data_plane::multicast_coordinator::{
    supports_exactly_once, DeliverySettings, MulticastCoordinator,
};
use crate::data_plane::redelivery::{RedeliveryReport, RedeliveryWorker};
use crate::data_plane::{DeliverySemantics, MulticastRequest, MulticastResult};
use crate::error::RegistryError;
use crate::filter::{Filter, FilterCompiler};
use crate::metadata::Metadata;
use crate::observability::events;
use crate::routing::target_resolution::TargetResolver;
use crate::routing::EvaluationStrategy;
use crate::runtime::background::{spawn_periodic, BackgroundTaskHandle};

const COMPONENT: &str = "multicast_registry";

/// One enumeration page request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnumerateRequest {
    /// `None` lists every live identity.
    pub filter: Option<Filter>,
    pub page: PageRequest,
    pub include_metadata: bool,
    pub sort_by: SortKey,
}

impl EnumerateRequest {
    pub fn new(filter: Option<Filter>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }

    pub fn sorted_by(mut self, sort_by: SortKey) -> Self {
        self.sort_by = sort_by;
        self
    }
}

/// One enumerated identity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdentityView {
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl IdentityView {
    fn from_record(record: RegistrationRecord, include_metadata: bool) -> Self {
        Self {
            identity: record.identity,
            metadata: include_metadata.then_some(record.metadata),
            registered_at: record.registered_at,
            expires_at: record.expires_at,
            version: record.version,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EnumerateResult {
    pub identities: Vec<IdentityView>,
    /// Matching identities across all pages.
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Builds a [`MulticastRegistry`], optionally overriding configured slots.
pub struct MulticastRegistryBuilder {
    config: NamespaceConfig,
    clock: Option<Arc<dyn Clock>>,
    registry_store: Option<Arc<dyn RegistryStore>>,
    messaging_sink: Option<Arc<dyn MessagingSink>>,
    durability_sink: Option<Arc<dyn DurabilitySink>>,
}

impl MulticastRegistryBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Binds `store` in place of the configured registry slot.
    pub fn with_registry_store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.registry_store = Some(store);
        self
    }

    pub fn with_messaging_sink(mut self, sink: Arc<dyn MessagingSink>) -> Self {
        self.messaging_sink = Some(sink);
        self
    }

    pub fn with_durability_sink(mut self, sink: Arc<dyn DurabilitySink>) -> Self {
        self.durability_sink = Some(sink);
        self
    }

    /// Validates the config and wires every layer. Fails with
    /// `INVALID_CONFIGURATION` when the default delivery semantics cannot be honored
    /// by the bound slots.
    pub fn build(self) -> Result<MulticastRegistry, RegistryError> {
        let config = self.config;
        config.validate()?;
        let namespace = config.name.clone();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let schema = config.identity_schema.clone().map(Arc::new);

        let store = self.registry_store.unwrap_or_else(|| {
            build_registry_store(
                &config.backend_slots.registry,
                schema.as_deref(),
                clock.clone(),
            )
        });
        let messaging = self
            .messaging_sink
            .unwrap_or_else(|| build_messaging_sink(&config.backend_slots.messaging));
        let durability = self.durability_sink.or_else(|| {
            config
                .backend_slots
                .durability
                .as_ref()
                .map(|slot| build_durability_sink(slot, clock.clone()))
        });

        let exactly_once = supports_exactly_once(store.as_ref(), durability.as_ref());
        if config.delivery.default_semantics == DeliverySemantics::ExactlyOnce && !exactly_once {
            return Err(RegistryError::invalid_configuration(format!(
                "namespace '{namespace}': default EXACTLY_ONCE delivery needs a transactional \
                 registry store and durability sink, got '{}' and '{}'",
                store.name(),
                durability.as_ref().map_or("none", |sink| sink.name()),
            )));
        }

        let mut compiler = FilterCompiler::new(config.limits.filter_limits());
        if let Some(schema) = &schema {
            compiler = compiler.with_schema(schema.clone());
        }

        let resolver = Arc::new(TargetResolver::new(
            store.clone(),
            config.filter_evaluation,
            config.store_retry,
            config.scan_page_size,
        ));
        let lifecycle = Arc::new(RegistrationLifecycle::new(
            &namespace,
            store.clone(),
            messaging.clone(),
            clock,
            LifecycleSettings {
                schema,
                default_ttl: config.default_ttl(),
                max_identities: config.limits.max_identities,
                store_retry: config.store_retry,
            },
        ));
        let coordinator = MulticastCoordinator::new(
            &namespace,
            resolver.clone(),
            messaging.clone(),
            durability.clone(),
            exactly_once,
            DeliverySettings::from(&config.delivery),
        );
        let sweeper = Arc::new(ExpirySweeper::new(
            &namespace,
            lifecycle.clone(),
            config.sweeper.batch_size,
        ));
        let redelivery = durability.clone().map(|durability| {
            Arc::new(RedeliveryWorker::new(
                &namespace,
                resolver.clone(),
                messaging.clone(),
                durability,
                &config.redelivery,
            ))
        });

        info!(
            event = events::REGISTRY_BUILT,
            component = COMPONENT,
            namespace = namespace.as_str(),
            registry_store = store.name(),
            messaging_sink = messaging.name(),
            durability_sink = durability.as_ref().map(|sink| sink.name()),
            strategy = ?resolver.strategy(),
            exactly_once,
            "multicast registry built"
        );

        Ok(MulticastRegistry {
            namespace,
            compiler,
            store,
            messaging,
            durability,
            resolver,
            lifecycle,
            coordinator,
            sweeper,
            redelivery,
            sweep_interval: config.sweeper.interval(),
            redelivery_interval: Duration::from_millis(config.redelivery.interval_ms),
        })
    }
}

/// The multicast registry for one namespace: register identities with metadata,
/// enumerate them by filter, and fan messages out to every match.
pub struct MulticastRegistry {
    namespace: String,
    compiler: FilterCompiler,
    store: Arc<dyn RegistryStore>,
    messaging: Arc<dyn MessagingSink>,
    durability: Option<Arc<dyn DurabilitySink>>,
    resolver: Arc<TargetResolver>,
    lifecycle: Arc<RegistrationLifecycle>,
    coordinator: MulticastCoordinator,
    sweeper: Arc<ExpirySweeper>,
    redelivery: Option<Arc<RedeliveryWorker>>,
    sweep_interval: Duration,
    redelivery_interval: Duration,
}

impl MulticastRegistry {
    pub fn builder(config: NamespaceConfig) -> MulticastRegistryBuilder {
        MulticastRegistryBuilder {
            config,
            clock: None,
            registry_store: None,
            messaging_sink: None,
            durability_sink: None,
        }
    }

    /// Builds with every slot taken from `config`.
    pub fn from_config(config: NamespaceConfig) -> Result<Self, RegistryError> {
        Self::builder(config).build()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn evaluation_strategy(&self) -> EvaluationStrategy {
        self.resolver.strategy()
    }

    pub fn supports_exactly_once(&self) -> bool {
        self.coordinator
            .check_semantics(DeliverySemantics::ExactlyOnce)
            .is_ok()
    }

    /// Compiles the textual filter syntax under this namespace's limits and schema.
    pub fn compile_filter(&self, expression: &Value) -> Result<Option<Filter>, RegistryError> {
        self.compiler.compile(expression)
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResult, RegistryError> {
        Ok(self.lifecycle.register(request).await?)
    }

    pub async fn get(&self, identity: &str) -> Result<RegistrationRecord, RegistryError> {
        self.resolver.get(identity).await
    }

    pub async fn enumerate(
        &self,
        request: EnumerateRequest,
    ) -> Result<EnumerateResult, RegistryError> {
        self.check_filter(request.filter.as_ref())?;
        let page = self
            .resolver
            .scan_page(request.filter.as_ref(), request.page, request.sort_by)
            .await?;
        Ok(EnumerateResult {
            identities: page
                .records
                .into_iter()
                .map(|record| IdentityView::from_record(record, request.include_metadata))
                .collect(),
            total_count: page.total_count,
            next_cursor: page.next_cursor,
        })
    }

    /// Fans `request.payload` out to every identity matching `request.filter` at call
    /// time. Per-target failures are reported in the result, never as an error.
    pub async fn multicast(
        &self,
        request: MulticastRequest,
    ) -> Result<MulticastResult, RegistryError> {
        self.check_filter(request.filter.as_ref())?;
        self.coordinator.multicast(request).await
    }

    /// Returns whether a live registration was removed. Unknown identities are not an
    /// error.
    pub async fn unregister(&self, identity: &str) -> Result<bool, RegistryError> {
        self.lifecycle.unregister(identity).await
    }

    /// Renews `identity`; `None` reuses the TTL it registered with.
    pub async fn heartbeat(
        &self,
        identity: &str,
        ttl: Option<Duration>,
    ) -> Result<RegistrationRecord, RegistryError> {
        self.lifecycle.heartbeat(identity, ttl).await
    }

    /// Runs one expiry sweep now.
    pub async fn sweep_expired(&self) -> Result<SweepReport, RegistryError> {
        self.sweeper.sweep_once().await
    }

    pub fn sweep_health(&self) -> SweepHealth {
        self.sweeper.health()
    }

    /// Starts the periodic expiry sweeper at the configured interval.
    pub fn start_sweeper(&self) -> BackgroundTaskHandle {
        self.sweeper.start(self.sweep_interval)
    }

    /// Drains one batch of queued deliveries. A no-op without a durability sink.
    pub async fn redeliver_pending(&self) -> Result<RedeliveryReport, RegistryError> {
        match &self.redelivery {
            Some(worker) => worker.drain_once().await,
            None => Ok(RedeliveryReport::default()),
        }
    }

    /// Starts the periodic redelivery worker; `None` without a durability sink.
    pub fn start_redelivery(&self) -> Option<BackgroundTaskHandle> {
        let worker = self.redelivery.clone()?;
        let namespace = self.namespace.clone();
        Some(spawn_periodic(
            "redelivery",
            self.redelivery_interval,
            move || {
                let worker = worker.clone();
                let namespace = namespace.clone();
                async move {
                    if let Err(err) = worker.drain_once().await {
                        warn!(
                            event = events::REDELIVERY_FAILED,
                            component = COMPONENT,
                            namespace = namespace.as_str(),
                            err = %err,
                            "redelivery pass failed"
                        );
                    }
                }
            },
        ))
    }

    /// Closes every bound slot. Background tasks are owned by their handles and must
    /// be stopped separately. Returns the first slot failure after attempting all.
    pub async fn close(&self) -> Result<(), RegistryError> {
        let mut first_error = None;
        let mut record = |slot: &str, result: Result<(), RegistryError>| {
            if let Err(err) = result {
                warn!(
                    event = events::SLOT_CLOSE_FAILED,
                    component = COMPONENT,
                    namespace = self.namespace.as_str(),
                    slot,
                    err = %err,
                    "failed to close backend slot"
                );
                first_error.get_or_insert(err);
            }
        };

        record("registry", self.store.close().await);
        record("messaging", self.messaging.close().await);
        if let Some(durability) = &self.durability {
            record("durability", durability.close().await);
        }

        info!(
            event = events::REGISTRY_CLOSED,
            component = COMPONENT,
            namespace = self.namespace.as_str(),
            "multicast registry closed"
        );
        first_error.map_or(Ok(()), Err)
    }

    fn check_filter(&self, filter: Option<&Filter>) -> Result<(), RegistryError> {
        match filter {
            Some(filter) => self.compiler.validate(filter),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EnumerateRequest, MulticastRegistry};
    use crate::backend::{InMemoryDurabilitySink, PageRequest, SortKey};
    use crate::clock::ManualClock;
    use crate::config::{DurabilitySinkConfig, NamespaceConfig};
    use crate::control_plane::RegisterRequest;
    use crate::data_plane::{DeliverySemantics, MulticastRequest};
    use crate::error::RegistryCode;
    use crate::filter::Filter;
    use crate::metadata::metadata;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn sensors(registry: &MulticastRegistry) {
        for (identity, zone) in [("svc-a", "1"), ("svc-b", "2")] {
            registry
                .register(RegisterRequest::new(
                    identity,
                    metadata([("type", "sensor".into()), ("zone", zone.into())]),
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn enumerate_and_multicast_select_by_filter() {
        let registry = MulticastRegistry::from_config(NamespaceConfig::new("devices")).unwrap();
        sensors(&registry).await;

        let listed = registry
            .enumerate(EnumerateRequest::new(Some(Filter::eq("type", "sensor"))))
            .await
            .unwrap();
        let result = registry
            .multicast(MulticastRequest::new(Some(Filter::eq("zone", "1")), b"hi".to_vec()))
            .await
            .unwrap();

        assert_eq!(listed.total_count, 2);
        assert!(listed.identities.iter().all(|view| view.metadata.is_none()));
        assert_eq!(result.target_count, 1);
        assert_eq!(result.statuses[0].identity, "svc-a");
    }

    #[tokio::test]
    async fn enumeration_pages_carry_metadata_on_request() {
        let registry = MulticastRegistry::from_config(NamespaceConfig::new("devices")).unwrap();
        sensors(&registry).await;

        let first = registry
            .enumerate(
                EnumerateRequest::new(None)
                    .with_page(PageRequest::first(1))
                    .with_metadata()
                    .sorted_by(SortKey::Identity),
            )
            .await
            .unwrap();
        let second = registry
            .enumerate(
                EnumerateRequest::new(None)
                    .with_page(PageRequest::after(first.next_cursor.clone().unwrap(), 1)),
            )
            .await
            .unwrap();

        assert_eq!(first.identities[0].identity, "svc-a");
        assert!(first.identities[0].metadata.is_some());
        assert_eq!(second.identities[0].identity, "svc-b");
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn programmatic_filters_obey_namespace_limits() {
        let mut config = NamespaceConfig::new("devices");
        config.limits.max_filter_clauses = 1;
        let registry = MulticastRegistry::from_config(config).unwrap();

        let err = registry
            .enumerate(EnumerateRequest::new(Some(Filter::and(vec![
                Filter::eq("a", "1"),
                Filter::eq("b", "2"),
            ]))))
            .await
            .unwrap_err();

        assert_eq!(err.code, RegistryCode::InvalidFilter);
    }

    #[test]
    fn compile_filter_uses_namespace_limits() {
        let registry = MulticastRegistry::from_config(NamespaceConfig::new("devices")).unwrap();

        let filter = registry
            .compile_filter(&json!({"zone": "1", "battery_level.lt": 20}))
            .unwrap();

        assert_eq!(filter.unwrap().clause_count(), 2);
    }

    #[test]
    fn exactly_once_default_on_plain_slots_fails_at_build() {
        let mut config = NamespaceConfig::new("devices");
        config.delivery.default_semantics = DeliverySemantics::ExactlyOnce;
        config.backend_slots.durability = Some(DurabilitySinkConfig::Memory { lease_ms: 1_000 });

        let err = MulticastRegistry::from_config(config).err().unwrap();

        assert_eq!(err.code, RegistryCode::InvalidConfiguration);
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op_without_durability() {
        let registry = MulticastRegistry::from_config(NamespaceConfig::new("devices")).unwrap();

        assert!(registry.start_redelivery().is_none());
        assert_eq!(registry.redeliver_pending().await.unwrap().attempted, 0);
    }

    #[tokio::test]
    async fn injected_clock_drives_expiry_and_sweeps() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = MulticastRegistry::builder(NamespaceConfig::new("devices"))
            .with_clock(clock.clone())
            .with_durability_sink(Arc::new(InMemoryDurabilitySink::new(clock.clone())))
            .build()
            .unwrap();
        registry
            .register(RegisterRequest::new("x", metadata([])).with_ttl(Duration::from_secs(1)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(2));

        assert_eq!(registry.get("x").await.unwrap_err().code, RegistryCode::NotFound);
        assert_eq!(registry.sweep_expired().await.unwrap().expired, 1);
        assert_eq!(registry.sweep_health().total_removed, 1);
        assert!(!registry.supports_exactly_once());
    }

    #[tokio::test]
    async fn closed_registry_reports_backend_unavailable() {
        let registry = MulticastRegistry::from_config(NamespaceConfig::new("devices")).unwrap();
        registry.close().await.unwrap();

        let err = registry
            .register(RegisterRequest::new("x", metadata([])))
            .await
            .unwrap_err();

        assert_eq!(err.code, RegistryCode::BackendUnavailable);
    }
}
