use async_trait::async_trait;
use chrono::{DateTime, Utc};
use multicast_registry::backend::{
    DeleteCondition, FilterSupport, PutMode, PutOutcome, RegistrationRecord, RegistryStore,
    ScanPage, ScanRequest,
};
use multicast_registry::RegistryError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const STORE_NAME: &str = "flaky";

/// Store wrapper whose next `n` reads fail with `BACKEND_UNAVAILABLE`.
///
/// Reads are `get`, `scan`, `list_expired`, and `count`. Writes always reach the
/// inner store.
pub struct FlakyRegistryStore {
    inner: Arc<dyn RegistryStore>,
    failing_reads: AtomicU32,
    failed_reads: AtomicU32,
}

impl FlakyRegistryStore {
    pub fn new(inner: Arc<dyn RegistryStore>) -> Self {
        Self {
            inner,
            failing_reads: AtomicU32::new(0),
            failed_reads: AtomicU32::new(0),
        }
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Reads refused so far.
    pub fn failed_reads(&self) -> u32 {
        self.failed_reads.load(Ordering::SeqCst)
    }

    fn check_read(&self, operation: &str) -> Result<(), RegistryError> {
        let refused = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            self.failed_reads.fetch_add(1, Ordering::SeqCst);
            debug!("{STORE_NAME}: refusing {operation}");
            return Err(RegistryError::backend_unavailable(
                STORE_NAME,
                format!("injected {operation} failure"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for FlakyRegistryStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn filter_support(&self) -> FilterSupport {
        self.inner.filter_support()
    }

    fn supports_transactions(&self) -> bool {
        self.inner.supports_transactions()
    }

    async fn put(
        &self,
        record: RegistrationRecord,
        mode: PutMode,
    ) -> Result<PutOutcome, RegistryError> {
        self.inner.put(record, mode).await
    }

    async fn get(&self, identity: &str) -> Result<RegistrationRecord, RegistryError> {
        self.check_read("get")?;
        self.inner.get(identity).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, RegistryError> {
        self.check_read("scan")?;
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
        self.check_read("list_expired")?;
        self.inner.list_expired(now, limit).await
    }

    async fn count(&self) -> Result<usize, RegistryError> {
        self.check_read("count")?;
        self.inner.count().await
    }

    async fn close(&self) -> Result<(), RegistryError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::FlakyRegistryStore;
    use multicast_registry::backend::{InMemoryRegistryStore, RegistryStore};
    use multicast_registry::clock::SystemClock;
    use multicast_registry::RegistryCode;
    use std::sync::Arc;

    #[tokio::test]
    async fn refuses_exactly_the_requested_number_of_reads() {
        let store = FlakyRegistryStore::new(Arc::new(InMemoryRegistryStore::new(Arc::new(
            SystemClock,
        ))));
        store.fail_next_reads(2);

        assert_eq!(
            store.count().await.unwrap_err().code,
            RegistryCode::BackendUnavailable
        );
        assert!(store.count().await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.failed_reads(), 2);
    }
}
