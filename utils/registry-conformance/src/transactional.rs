//! Wrappers that advertise transactional capability over the in-process slots.
//!
//! The in-memory bindings apply each call atomically but cannot couple a store
//! write with a durability enqueue. These wrappers let tests exercise the
//! exactly-once path without a real transactional backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use multicast_registry::backend::{
    DeleteCondition, DurabilitySink, FilterSupport, MulticastMessage, PendingDelivery, PutMode,
    PutOutcome, RegistrationRecord, RegistryStore, ScanPage, ScanRequest,
};
use multicast_registry::RegistryError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct TransactionalRegistryStore {
    inner: Arc<dyn RegistryStore>,
}

impl TransactionalRegistryStore {
    pub fn new(inner: Arc<dyn RegistryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RegistryStore for TransactionalRegistryStore {
    fn name(&self) -> &str {
        "transactional"
    }

    fn filter_support(&self) -> FilterSupport {
        self.inner.filter_support()
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    async fn put(
        &self,
        record: RegistrationRecord,
        mode: PutMode,
    ) -> Result<PutOutcome, RegistryError> {
        self.inner.put(record, mode).await
    }

    async fn get(&self, identity: &str) -> Result<RegistrationRecord, RegistryError> {
        self.inner.get(identity).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, RegistryError> {
        self.inner.scan(request).await
    }

    async fn delete(
        &self,
        identity: &str,
        condition: DeleteCondition,
    ) -> Result<bool, RegistryError> {
        self.inner.delete(identity, condition).await
    }

    async fn renew_expiry(
        &self,
        identity: &str,
        ttl: Duration,
    ) -> Result<RegistrationRecord, RegistryError> {
        self.inner.renew_expiry(identity, ttl).await
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RegistrationRecord>, RegistryError> {
        self.inner.list_expired(now, limit).await
    }

    async fn count(&self) -> Result<usize, RegistryError> {
        self.inner.count().await
    }

    async fn close(&self) -> Result<(), RegistryError> {
        self.inner.close().await
    }
}

pub struct TransactionalDurabilitySink {
    inner: Arc<dyn DurabilitySink>,
}

impl TransactionalDurabilitySink {
    pub fn new(inner: Arc<dyn DurabilitySink>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DurabilitySink for TransactionalDurabilitySink {
    fn name(&self) -> &str {
        "transactional"
    }

    fn is_transactional(&self) -> bool {
        true
    }

    async fn enqueue(
        &self,
        identity: &str,
        message: Arc<MulticastMessage>,
        leased: bool,
    ) -> Result<Uuid, RegistryError> {
        self.inner.enqueue(identity, message, leased).await
    }

    async fn dequeue(&self, limit: usize) -> Result<Vec<PendingDelivery>, RegistryError> {
        self.inner.dequeue(limit).await
    }

    async fn acknowledge(&self, entry_id: Uuid) -> Result<bool, RegistryError> {
        self.inner.acknowledge(entry_id).await
    }

    async fn requeue(&self, entry_id: Uuid) -> Result<bool, RegistryError> {
        self.inner.requeue(entry_id).await
    }

    async fn pending_count(&self) -> Result<usize, RegistryError> {
        self.inner.pending_count().await
    }

    async fn close(&self) -> Result<(), RegistryError> {
        self.inner.close().await
    }
}
