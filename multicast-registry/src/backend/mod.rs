//! Backend slot layer.
//!
//! Each slot is an async trait with one or more conforming bindings, selected per
//! namespace through [`crate::config::BackendSlotsConfig`]:
//!
//! - [`RegistryStore`]: persists identity records with expiry and versioning.
//! - [`MessagingSink`]: delivers a payload to one addressable identity.
//! - [`DurabilitySink`]: queues undelivered payloads for redelivery.
//!
//! ```
//! use std::sync::Arc;
//! use multicast_registry::backend::{InMemoryRegistryStore, PutMode, RegistrationRecord, RegistryStore};
//! use multicast_registry::clock::SystemClock;
//! use multicast_registry::metadata;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = InMemoryRegistryStore::new(Arc::new(SystemClock));
//! let record = RegistrationRecord::new("svc-a", metadata([("type", "sensor".into())]), chrono::Utc::now());
//!
//! let stored = store.put(record.clone(), PutMode::Create).await.unwrap();
//! assert_eq!(stored.record.version, 1);
//! assert!(store.put(record, PutMode::Create).await.is_err());
//! # });
//! ```

pub(crate) mod cursor;
pub(crate) mod factory;
pub mod key_value_store;
pub mod memory_durability;
pub mod memory_messaging;
pub mod memory_store;
pub(crate) mod page;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::filter::Filter;
use crate::metadata::Metadata;

pub use key_value_store::{InMemoryKeyValue, KeyValueBackend, KeyValueRegistryStore};
pub use memory_durability::InMemoryDurabilitySink;
pub use memory_messaging::InMemoryMessagingSink;
pub use memory_store::InMemoryRegistryStore;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 1000;

/// One registered identity as persisted by a [`RegistryStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub identity: String,
    pub metadata: Metadata,
    pub registered_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// TTL the identity registered with; heartbeats without an explicit TTL reuse it.
    pub ttl: Option<Duration>,
    pub version: u64,
}

impl RegistrationRecord {
    /// A record that never expires. Stores assign the version on write.
    pub fn new(identity: &str, metadata: Metadata, registered_at: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            metadata,
            registered_at,
            expires_at: None,
            ttl: None,
            version: 0,
        }
    }

    pub fn with_expiry(mut self, ttl: Duration, expires_at: DateTime<Utc>) -> Self {
        self.ttl = Some(ttl);
        self.expires_at = Some(expires_at);
        self
    }

    /// A record is expired once `now` has passed `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// How [`RegistryStore::put`] treats an existing live record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutMode {
    /// Fail with `ALREADY_EXISTS` when the identity is live.
    Create,
    /// Overwrite and bump the version. A set `expected_version` must match the live
    /// record's version or the write fails with `VERSION_CONFLICT`.
    Replace { expected_version: Option<u64> },
}

/// Result of an accepted write.
#[derive(Clone, Debug, PartialEq)]
pub struct PutOutcome {
    pub record: RegistrationRecord,
    /// `true` when a live record was overwritten.
    pub replaced: bool,
}

/// Guard evaluated atomically by [`RegistryStore::delete`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteCondition {
    Always,
    /// Only delete when the record is expired as of the given instant, so a renewal
    /// that landed after the caller's check keeps the record.
    ExpiredBy(DateTime<Utc>),
    /// Only delete the exact version written by the caller.
    Version(u64),
}

/// Sort order for scans and enumeration.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Identity,
    RegisteredAt,
    ExpiresAt,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Opaque token returned as `next_cursor` by the previous page.
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            cursor: None,
            limit: Some(limit),
        }
    }

    pub fn after(cursor: String, limit: usize) -> Self {
        Self {
            cursor: Some(cursor),
            limit: Some(limit),
        }
    }

    pub(crate) fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScanRequest {
    /// Ignored by stores reporting [`FilterSupport::EngineSide`]; callers must not
    /// pass one to them.
    pub filter: Option<Filter>,
    pub page: PageRequest,
    pub sort: SortKey,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanPage {
    pub records: Vec<RegistrationRecord>,
    pub next_cursor: Option<String>,
    /// Matching live records across all pages.
    pub total_count: usize,
}

/// Whether a store evaluates filters itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterSupport {
    Native,
    EngineSide,
}

/// Persistence slot for registration records.
///
/// Every mutation is atomic per identity. Records whose `expires_at` has passed but
/// that the sweeper has not yet removed are treated as absent by `get`, `scan`,
/// `renew_expiry` and `put` in [`PutMode::Create`].
#[async_trait]
pub trait RegistryStore: Send + Sync {
    fn name(&self) -> &str;

    fn filter_support(&self) -> FilterSupport;

    /// Whether writes can be coupled to a durability enqueue in one transaction.
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn put(&self, record: RegistrationRecord, mode: PutMode)
        -> Result<PutOutcome, RegistryError>;

    async fn get(&self, identity: &str) -> Result<RegistrationRecord, RegistryError>;

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, RegistryError>;

    /// Returns `true` when a live record was removed.
    async fn delete(&self, identity: &str, condition: DeleteCondition)
        -> Result<bool, RegistryError>;

    /// Moves `expires_at` to now + `ttl`. Fails with `NOT_FOUND` for absent or
    /// expired identities. Does not change the version.
    async fn renew_expiry(
        &self,
        identity: &str,
        ttl: Duration,
    ) -> Result<RegistrationRecord, RegistryError>;

    /// Records expired as of `now`, oldest expiry first.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RegistrationRecord>, RegistryError>;

    /// Number of live records.
    async fn count(&self) -> Result<usize, RegistryError>;

    async fn close(&self) -> Result<(), RegistryError>;
}

/// One payload fanned out by a multicast call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastMessage {
    pub message_id: Uuid,
    pub payload: Vec<u8>,
    pub content_type: String,
}

impl MulticastMessage {
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            payload,
            content_type: content_type.into(),
        }
    }
}

/// Delivery slot addressing one identity at a time.
#[async_trait]
pub trait MessagingSink: Send + Sync {
    fn name(&self) -> &str;

    /// `true` when an identity needs a subscription before it can be delivered to.
    fn requires_subscription(&self) -> bool;

    async fn subscribe(&self, identity: &str) -> Result<(), RegistryError>;

    /// Idempotent: removing a missing subscription succeeds.
    async fn unsubscribe(&self, identity: &str) -> Result<(), RegistryError>;

    async fn deliver(
        &self,
        identity: &str,
        message: Arc<MulticastMessage>,
    ) -> Result<(), RegistryError>;

    async fn close(&self) -> Result<(), RegistryError>;
}

/// A queued delivery awaiting (re)delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingDelivery {
    pub entry_id: Uuid,
    pub identity: String,
    pub message: Arc<MulticastMessage>,
    /// Redelivery attempts made so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Retry queue slot for deliveries that did not complete in the request path.
///
/// Dequeued entries are leased: they stay invisible to other consumers until they
/// are acknowledged, requeued, or their lease lapses.
#[async_trait]
pub trait DurabilitySink: Send + Sync {
    fn name(&self) -> &str;

    fn is_transactional(&self) -> bool {
        false
    }

    /// Persists one delivery. A `leased` entry is held for the caller as if it had
    /// just been dequeued.
    async fn enqueue(
        &self,
        identity: &str,
        message: Arc<MulticastMessage>,
        leased: bool,
    ) -> Result<Uuid, RegistryError>;

    async fn dequeue(&self, limit: usize) -> Result<Vec<PendingDelivery>, RegistryError>;

    /// Removes an entry for good. Returns `false` for unknown ids.
    async fn acknowledge(&self, entry_id: Uuid) -> Result<bool, RegistryError>;

    /// Releases a leased entry back to the queue and counts one attempt.
    async fn requeue(&self, entry_id: Uuid) -> Result<bool, RegistryError>;

    /// Entries held, leased or not.
    async fn pending_count(&self) -> Result<usize, RegistryError>;

    async fn close(&self) -> Result<(), RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::{PageRequest, RegistrationRecord, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
    use crate::metadata::Metadata;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    #[test]
    fn record_expires_strictly_after_deadline() {
        let now = Utc::now();
        let record = RegistrationRecord::new("svc-a", Metadata::new(), now)
            .with_expiry(Duration::from_secs(1), now + ChronoDuration::seconds(1));

        assert!(!record.is_expired(now));
        assert!(!record.is_expired(now + ChronoDuration::seconds(1)));
        assert!(record.is_expired(now + ChronoDuration::milliseconds(1001)));
    }

    #[test]
    fn page_limit_defaults_and_clamps() {
        assert_eq!(PageRequest::default().effective_limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(PageRequest::first(0).effective_limit(), 1);
        assert_eq!(PageRequest::first(50_000).effective_limit(), MAX_PAGE_SIZE);
    }
}
