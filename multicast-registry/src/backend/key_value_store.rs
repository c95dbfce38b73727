//! [`RegistryStore`] adapter over a minimal key/value backend.
//!
//! Records are stored as JSON under `multicast:registry:<identity>`, with every
//! metadata value tagged by its type so timestamps read back as timestamps. The
//! backend offers only point reads, compare-and-set, and prefix scans, so filters
//! are evaluated engine-side: `scan` returns every live record and the routing layer
//! post-filters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::page::paginate;
use super::{
    DeleteCondition, FilterSupport, PutMode, PutOutcome, RegistrationRecord, RegistryStore,
    ScanPage, ScanRequest,
};
use crate::clock::{to_chrono, Clock};
use crate::error::RegistryError;
use crate::metadata::{Metadata, MetadataValue};

pub const DEFAULT_KEY_PREFIX: &str = "multicast:registry:";
const STORE_NAME: &str = "key_value";

/// Minimal byte-oriented key/value contract.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError>;

    /// Writes `value` (or deletes when `None`) only if the current value equals
    /// `expected`. Returns `false` when the precondition did not hold.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Option<Vec<u8>>,
    ) -> Result<bool, RegistryError>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, RegistryError>;
}

/// Ordered in-process [`KeyValueBackend`].
#[derive(Default)]
pub struct InMemoryKeyValue {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryKeyValue {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Option<Vec<u8>>,
    ) -> Result<bool, RegistryError> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        match value {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(true)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, RegistryError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Persisted form of one metadata value. The plain JSON form cannot tell an RFC
/// 3339 string from a timestamp, so every value carries its type.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum StoredValue {
    Bool(bool),
    Number(f64),
    String(String),
    StringArray(Vec<String>),
    Map(BTreeMap<String, StoredValue>),
    Timestamp(DateTime<Utc>),
}

impl From<&MetadataValue> for StoredValue {
    fn from(value: &MetadataValue) -> Self {
        match value {
            MetadataValue::Bool(value) => StoredValue::Bool(*value),
            MetadataValue::Number(value) => StoredValue::Number(*value),
            MetadataValue::String(value) => StoredValue::String(value.clone()),
            MetadataValue::StringArray(values) => StoredValue::StringArray(values.clone()),
            MetadataValue::Map(fields) => StoredValue::Map(stored_fields(fields)),
            MetadataValue::Timestamp(at) => StoredValue::Timestamp(*at),
        }
    }
}

impl From<StoredValue> for MetadataValue {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Bool(value) => MetadataValue::Bool(value),
            StoredValue::Number(value) => MetadataValue::Number(value),
            StoredValue::String(value) => MetadataValue::String(value),
            StoredValue::StringArray(values) => MetadataValue::StringArray(values),
            StoredValue::Map(fields) => MetadataValue::Map(metadata_fields(fields)),
            StoredValue::Timestamp(at) => MetadataValue::Timestamp(at),
        }
    }
}

fn stored_fields(metadata: &Metadata) -> BTreeMap<String, StoredValue> {
    metadata
        .iter()
        .map(|(name, value)| (name.clone(), StoredValue::from(value)))
        .collect()
}

fn metadata_fields(fields: BTreeMap<String, StoredValue>) -> Metadata {
    fields
        .into_iter()
        .map(|(name, value)| (name, MetadataValue::from(value)))
        .collect()
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    identity: String,
    metadata: BTreeMap<String, StoredValue>,
    registered_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    ttl: Option<Duration>,
    version: u64,
}

impl From<&RegistrationRecord> for StoredRecord {
    fn from(record: &RegistrationRecord) -> Self {
        Self {
            identity: record.identity.clone(),
            metadata: stored_fields(&record.metadata),
            registered_at: record.registered_at,
            expires_at: record.expires_at,
            ttl: record.ttl,
            version: record.version,
        }
    }
}

impl From<StoredRecord> for RegistrationRecord {
    fn from(stored: StoredRecord) -> Self {
        Self {
            identity: stored.identity,
            metadata: metadata_fields(stored.metadata),
            registered_at: stored.registered_at,
            expires_at: stored.expires_at,
            ttl: stored.ttl,
            version: stored.version,
        }
    }
}

/// Registry records persisted through a [`KeyValueBackend`].
///
/// Every mutation is a read followed by compare-and-set; losing a race surfaces as
/// `VERSION_CONFLICT` rather than being retried here.
pub struct KeyValueRegistryStore {
    backend: Arc<dyn KeyValueBackend>,
    prefix: String,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl KeyValueRegistryStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::with_prefix(backend, clock, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(
        backend: Arc<dyn KeyValueBackend>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            clock,
            closed: AtomicBool::new(false),
        }
    }

    fn key(&self, identity: &str) -> String {
        format!("{}{identity}", self.prefix)
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            Err(RegistryError::backend_unavailable(STORE_NAME, "store is closed"))
        } else {
            Ok(())
        }
    }

    fn encode(record: &RegistrationRecord) -> Result<Vec<u8>, RegistryError> {
        serde_json::to_vec(&StoredRecord::from(record))
            .map_err(|err| RegistryError::backend_unavailable(STORE_NAME, err))
    }

    fn decode(raw: &[u8]) -> Result<RegistrationRecord, RegistryError> {
        serde_json::from_slice::<StoredRecord>(raw)
            .map(RegistrationRecord::from)
            .map_err(|err| {
                RegistryError::backend_unavailable(STORE_NAME, format!("corrupt record: {err}"))
            })
    }

    async fn load(
        &self,
        identity: &str,
    ) -> Result<Option<(Vec<u8>, RegistrationRecord)>, RegistryError> {
        match self.backend.get(&self.key(identity)).await? {
            Some(raw) => {
                let record = Self::decode(&raw)?;
                Ok(Some((raw, record)))
            }
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<RegistrationRecord>, RegistryError> {
        self.backend
            .scan_prefix(&self.prefix)
            .await?
            .iter()
            .map(|(_, raw)| Self::decode(raw))
            .collect()
    }

    async fn swap(
        &self,
        identity: &str,
        expected: Option<&[u8]>,
        next: Option<Vec<u8>>,
    ) -> Result<(), RegistryError> {
        if self
            .backend
            .compare_and_set(&self.key(identity), expected, next)
            .await?
        {
            Ok(())
        } else {
            Err(RegistryError::fail_with_code(
                crate::error::RegistryCode::VersionConflict,
                format!("identity '{identity}' changed concurrently"),
            ))
        }
    }
}

#[async_trait]
impl RegistryStore for KeyValueRegistryStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn filter_support(&self) -> FilterSupport {
        FilterSupport::EngineSide
    }

    async fn put(
        &self,
        mut record: RegistrationRecord,
        mode: PutMode,
    ) -> Result<PutOutcome, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let current = self.load(&record.identity).await?;
        let live_version = current
            .as_ref()
            .filter(|(_, existing)| !existing.is_expired(now))
            .map(|(_, existing)| existing.version);

        match (mode, live_version) {
            (PutMode::Create, Some(_)) => {
                return Err(RegistryError::already_exists(&record.identity));
            }
            (PutMode::Replace { expected_version: Some(expected) }, actual)
                if actual != Some(expected) =>
            {
                return Err(RegistryError::version_conflict(
                    &record.identity,
                    expected,
                    actual.unwrap_or(0),
                ));
            }
            _ => {}
        }

        // An expired, unswept record still holds the sequence so a stale
        // `expected_version` cannot match the next incarnation.
        record.version = current
            .as_ref()
            .map_or(1, |(_, existing)| existing.version + 1);
        let encoded = Self::encode(&record)?;
        self.swap(
            &record.identity,
            current.as_ref().map(|(raw, _)| raw.as_slice()),
            Some(encoded),
        )
        .await?;

        Ok(PutOutcome {
            record,
            replaced: live_version.is_some(),
        })
    }

    async fn get(&self, identity: &str) -> Result<RegistrationRecord, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        match self.load(identity).await? {
            Some((_, record)) if !record.is_expired(now) => Ok(record),
            _ => Err(RegistryError::not_found(identity)),
        }
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, RegistryError> {
        self.ensure_open()?;
        if request.filter.is_some() {
            return Err(RegistryError::invalid_argument(
                "key_value store does not evaluate filters; scan without one and post-filter",
            ));
        }
        let now = self.clock.now();
        let live = self
            .load_all()
            .await?
            .into_iter()
            .filter(|record| !record.is_expired(now))
            .collect();
        paginate(live, &request.page, request.sort)
    }

    async fn delete(
        &self,
        identity: &str,
        condition: DeleteCondition,
    ) -> Result<bool, RegistryError> {
        self.ensure_open()?;
        let Some((raw, record)) = self.load(identity).await? else {
            return Ok(false);
        };

        let removed_live = match condition {
            DeleteCondition::Always => !record.is_expired(self.clock.now()),
            DeleteCondition::ExpiredBy(at) if record.is_expired(at) => true,
            DeleteCondition::Version(version) if record.version == version => true,
            _ => return Ok(false),
        };

        // A concurrent writer changed the record since it was read; the guard
        // evaluated above no longer describes it.
        if !self
            .backend
            .compare_and_set(&self.key(identity), Some(&raw), None)
            .await?
        {
            return Ok(false);
        }
        Ok(removed_live)
    }

    async fn renew_expiry(
        &self,
        identity: &str,
        ttl: Duration,
    ) -> Result<RegistrationRecord, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(to_chrono(ttl))
            .ok_or_else(|| RegistryError::invalid_argument("ttl is out of range"))?;

        let Some((raw, mut record)) = self.load(identity).await? else {
            return Err(RegistryError::not_found(identity));
        };
        if record.is_expired(now) {
            return Err(RegistryError::not_found(identity));
        }

        record.expires_at = Some(expires_at);
        record.ttl = Some(ttl);
        let encoded = Self::encode(&record)?;
        self.swap(identity, Some(&raw), Some(encoded)).await?;
        Ok(record)
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RegistrationRecord>, RegistryError> {
        self.ensure_open()?;
        let mut expired: Vec<RegistrationRecord> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|record| record.is_expired(now))
            .collect();
        expired.sort_by(|left, right| left.expires_at.cmp(&right.expires_at));
        expired.truncate(limit);
        Ok(expired)
    }

    async fn count(&self) -> Result<usize, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        Ok(self
            .load_all()
            .await?
            .iter()
            .filter(|record| !record.is_expired(now))
            .count())
    }

    async fn close(&self) -> Result<(), RegistryError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryKeyValue, KeyValueBackend, KeyValueRegistryStore, DEFAULT_KEY_PREFIX};
    use crate::backend::{
        DeleteCondition, FilterSupport, PageRequest, PutMode, RegistrationRecord, RegistryStore,
        ScanRequest,
    };
    use crate::clock::{Clock, ManualClock};
    use crate::error::RegistryCode;
    use crate::filter::{Filter, Operator};
    use crate::metadata::{metadata, MetadataValue};
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn fixture() -> (Arc<InMemoryKeyValue>, Arc<ManualClock>, KeyValueRegistryStore) {
        let backend = Arc::new(InMemoryKeyValue::new());
        let clock = Arc::new(ManualClock::starting_now());
        let store = KeyValueRegistryStore::new(backend.clone(), clock.clone());
        (backend, clock, store)
    }

    #[tokio::test]
    async fn records_land_under_the_registry_prefix_as_json() {
        let (backend, clock, store) = fixture();
        let record = RegistrationRecord::new(
            "svc-a",
            metadata([("type", "sensor".into())]),
            clock.now(),
        );
        store.put(record, PutMode::Create).await.unwrap();

        let raw = backend
            .get(&format!("{DEFAULT_KEY_PREFIX}svc-a"))
            .await
            .unwrap()
            .expect("record stored");
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["metadata"]["type"]["type"], "string");
        assert_eq!(json["metadata"]["type"]["value"], "sensor");
        assert_eq!(json["version"], 1);
    }

    #[tokio::test]
    async fn timestamps_read_back_as_timestamps() {
        let (_, clock, store) = fixture();
        let seen: DateTime<Utc> = "2026-05-01T00:00:00Z".parse().unwrap();
        let record = RegistrationRecord::new(
            "svc-t",
            metadata([
                ("seen", MetadataValue::Timestamp(seen)),
                ("label", "2026-05-01T00:00:00Z".into()),
                (
                    "location",
                    MetadataValue::Map(metadata([("since", MetadataValue::Timestamp(seen))])),
                ),
            ]),
            clock.now(),
        );
        store.put(record.clone(), PutMode::Create).await.unwrap();

        let stored = store.get("svc-t").await.unwrap();

        assert_eq!(stored.metadata, record.metadata);
        assert!(Filter::eq("seen", "2026-05-01T02:00:00+02:00").matches(&stored.metadata));
        assert!(!Filter::compare("seen", Operator::Lt, "2026-05-01T01:00:00+02:00")
            .matches(&stored.metadata));
    }

    #[tokio::test]
    async fn version_sequence_survives_an_unswept_expiry() {
        let (_, clock, store) = fixture();
        let ttl = Duration::from_secs(1);
        let record = RegistrationRecord::new("svc-a", Default::default(), clock.now())
            .with_expiry(ttl, clock.now() + chrono::Duration::seconds(1));
        store.put(record, PutMode::Create).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let recreated = store
            .put(
                RegistrationRecord::new("svc-a", Default::default(), clock.now()),
                PutMode::Create,
            )
            .await
            .unwrap();

        assert_eq!(recreated.record.version, 2);
        assert!(!recreated.replaced);
    }

    #[tokio::test]
    async fn filters_are_left_to_the_engine() {
        let (_, _, store) = fixture();

        assert_eq!(store.filter_support(), FilterSupport::EngineSide);
        let err = store
            .scan(ScanRequest {
                filter: Some(Filter::eq("type", "sensor")),
                page: PageRequest::default(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, RegistryCode::InvalidArgument);
    }

    #[tokio::test]
    async fn lifecycle_operations_match_memory_semantics() {
        let (_, clock, store) = fixture();
        let ttl = Duration::from_secs(5);
        let record = RegistrationRecord::new("svc-a", Default::default(), clock.now())
            .with_expiry(ttl, clock.now() + chrono::Duration::seconds(5));
        store.put(record.clone(), PutMode::Create).await.unwrap();

        assert_eq!(
            store.put(record, PutMode::Create).await.unwrap_err().code,
            RegistryCode::AlreadyExists
        );

        clock.advance(Duration::from_secs(4));
        store.renew_expiry("svc-a", ttl).await.unwrap();
        clock.advance(Duration::from_secs(4));
        assert!(store.get("svc-a").await.is_ok());

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store
            .delete("svc-a", DeleteCondition::ExpiredBy(clock.now()))
            .await
            .unwrap());
        assert!(!store.delete("svc-a", DeleteCondition::Always).await.unwrap());
    }

    #[tokio::test]
    async fn scan_pages_through_live_records() {
        let (_, clock, store) = fixture();
        for identity in ["a", "b", "c"] {
            let record = RegistrationRecord::new(identity, Default::default(), clock.now());
            store.put(record, PutMode::Create).await.unwrap();
        }

        let first = store
            .scan(ScanRequest {
                page: PageRequest::first(2),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(first.total_count, 3);
        assert_eq!(first.records.len(), 2);
        assert!(first.next_cursor.is_some());
    }
}
