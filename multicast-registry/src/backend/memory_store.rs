//! Reference in-process [`RegistryStore`] with native filter evaluation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::page::paginate;
use super::{
    DeleteCondition, FilterSupport, PutMode, PutOutcome, RegistrationRecord, RegistryStore,
    ScanPage, ScanRequest,
};
use crate::clock::{to_chrono, Clock};
use crate::error::RegistryError;
use crate::filter::{Filter, Operand, Operator, Predicate};
use crate::metadata::MetadataValue;
use crate::observability::events;

const COMPONENT: &str = "memory_store";
const STORE_NAME: &str = "memory";

/// Hashable form of the scalar values the secondary index covers.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum IndexKey {
    Text(String),
    Number(u64),
    Bool(bool),
}

impl IndexKey {
    fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::String(text) => Some(IndexKey::Text(text.clone())),
            // -0.0 and 0.0 compare equal, so they share a key.
            MetadataValue::Number(number) => Some(IndexKey::Number((number + 0.0).to_bits())),
            MetadataValue::Bool(flag) => Some(IndexKey::Bool(*flag)),
            _ => None,
        }
    }
}

/// Secondary index over one metadata field.
#[derive(Default)]
struct FieldIndex {
    by_value: HashMap<IndexKey, BTreeSet<String>>,
    /// Identities whose value cannot be keyed (timestamps, arrays, maps). They are
    /// always candidates and left to residual evaluation.
    unkeyed: BTreeSet<String>,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<String, RegistrationRecord>,
    indexes: HashMap<String, FieldIndex>,
}

impl StoreState {
    fn live(&self, identity: &str, now: DateTime<Utc>) -> Option<&RegistrationRecord> {
        self.records
            .get(identity)
            .filter(|record| !record.is_expired(now))
    }

    fn index_record(&mut self, record: &RegistrationRecord) {
        for (field, index) in self.indexes.iter_mut() {
            let Some(value) = record.metadata.get(field) else {
                continue;
            };
            match IndexKey::from_value(value) {
                Some(key) => {
                    index
                        .by_value
                        .entry(key)
                        .or_default()
                        .insert(record.identity.clone());
                }
                None => {
                    index.unkeyed.insert(record.identity.clone());
                }
            }
        }
    }

    fn unindex_record(&mut self, record: &RegistrationRecord) {
        for (field, index) in self.indexes.iter_mut() {
            let Some(value) = record.metadata.get(field) else {
                continue;
            };
            match IndexKey::from_value(value) {
                Some(key) => {
                    if let Some(identities) = index.by_value.get_mut(&key) {
                        identities.remove(&record.identity);
                        if identities.is_empty() {
                            index.by_value.remove(&key);
                        }
                    }
                }
                None => {
                    index.unkeyed.remove(&record.identity);
                }
            }
        }
    }

    fn insert(&mut self, record: RegistrationRecord) {
        if let Some(previous) = self.records.remove(&record.identity) {
            self.unindex_record(&previous);
        }
        self.index_record(&record);
        self.records.insert(record.identity.clone(), record);
    }

    fn remove(&mut self, identity: &str) -> Option<RegistrationRecord> {
        let removed = self.records.remove(identity)?;
        self.unindex_record(&removed);
        Some(removed)
    }

    /// Candidate identities for `filter` from the secondary indexes, or `None` when
    /// the filter has no indexable conjunct and a full scan is needed.
    fn plan(&self, filter: &Filter) -> Option<HashSet<String>> {
        match filter {
            Filter::Predicate(predicate) => self.lookup(predicate),
            Filter::And(children) => children
                .iter()
                .filter_map(|child| self.plan(child))
                .reduce(|left, right| left.intersection(&right).cloned().collect()),
            Filter::Or(_) | Filter::Not(_) => None,
        }
    }

    fn lookup(&self, predicate: &Predicate) -> Option<HashSet<String>> {
        let [field] = predicate.path.as_slice() else {
            return None;
        };
        let index = self.indexes.get(field)?;
        let operands: Vec<&MetadataValue> = match (&predicate.op, &predicate.operand) {
            (Operator::Eq, Operand::Value(value)) => vec![value],
            (Operator::In, Operand::List(values)) => values.iter().collect(),
            _ => return None,
        };

        let mut candidates: HashSet<String> = index.unkeyed.iter().cloned().collect();
        for operand in operands {
            // A string operand may equal a timestamp value; those live in `unkeyed`.
            let key = IndexKey::from_value(operand)?;
            if let Some(identities) = index.by_value.get(&key) {
                candidates.extend(identities.iter().cloned());
            }
        }
        Some(candidates)
    }
}

/// Thread-safe in-memory registry keyed by identity.
///
/// Fields named at construction are indexed; equality and `in` predicates on them
/// narrow the candidate set before the full filter is evaluated on each candidate.
pub struct InMemoryRegistryStore {
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState>,
    closed: AtomicBool,
}

impl InMemoryRegistryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_indexed_fields(clock, std::iter::empty::<String>())
    }

    pub fn with_indexed_fields<I, S>(clock: Arc<dyn Clock>, indexed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let indexes = indexed_fields
            .into_iter()
            .map(|field| (field.into(), FieldIndex::default()))
            .collect();
        Self {
            clock,
            state: RwLock::new(StoreState {
                records: HashMap::new(),
                indexes,
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            Err(RegistryError::backend_unavailable(STORE_NAME, "store is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn filter_support(&self) -> FilterSupport {
        FilterSupport::Native
    }

    async fn put(
        &self,
        mut record: RegistrationRecord,
        mode: PutMode,
    ) -> Result<PutOutcome, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let current_version = state.live(&record.identity, now).map(|live| live.version);
        match (mode, current_version) {
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
        record.version = state
            .records
            .get(&record.identity)
            .map_or(1, |stored| stored.version + 1);
        state.insert(record.clone());
        Ok(PutOutcome {
            record,
            replaced: current_version.is_some(),
        })
    }

    async fn get(&self, identity: &str) -> Result<RegistrationRecord, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        self.state
            .read()
            .await
            .live(identity, now)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(identity))
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let state = self.state.read().await;

        let planned = request.filter.as_ref().and_then(|filter| state.plan(filter));
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                event = events::STORE_SCAN_PLANNED,
                component = COMPONENT,
                indexed = planned.is_some(),
                candidates = planned.as_ref().map_or(state.records.len(), HashSet::len),
                "planned registry scan"
            );
        }

        let is_match = |record: &&RegistrationRecord| {
            !record.is_expired(now) && crate::filter::matches(request.filter.as_ref(), &record.metadata)
        };
        let matching: Vec<RegistrationRecord> = match planned {
            Some(candidates) => candidates
                .iter()
                .filter_map(|identity| state.records.get(identity))
                .filter(is_match)
                .cloned()
                .collect(),
            None => state.records.values().filter(is_match).cloned().collect(),
        };
        drop(state);

        paginate(matching, &request.page, request.sort)
    }

    async fn delete(
        &self,
        identity: &str,
        condition: DeleteCondition,
    ) -> Result<bool, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let Some(record) = state.records.get(identity) else {
            return Ok(false);
        };
        match condition {
            DeleteCondition::Always => {
                let was_live = !record.is_expired(now);
                state.remove(identity);
                Ok(was_live)
            }
            DeleteCondition::ExpiredBy(at) => {
                if record.is_expired(at) {
                    state.remove(identity);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            DeleteCondition::Version(version) => {
                if record.version == version {
                    state.remove(identity);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
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

        let mut state = self.state.write().await;
        match state.records.get_mut(identity) {
            Some(record) if !record.is_expired(now) => {
                record.expires_at = Some(expires_at);
                record.ttl = Some(ttl);
                Ok(record.clone())
            }
            _ => Err(RegistryError::not_found(identity)),
        }
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RegistrationRecord>, RegistryError> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let mut expired: Vec<RegistrationRecord> = state
            .records
            .values()
            .filter(|record| record.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by(|left, right| left.expires_at.cmp(&right.expires_at));
        expired.truncate(limit);
        Ok(expired)
    }

    async fn count(&self) -> Result<usize, RegistryError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
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
    use super::InMemoryRegistryStore;
    use crate::backend::{
        DeleteCondition, PageRequest, PutMode, RegistrationRecord, RegistryStore, ScanRequest,
    };
    use crate::clock::{Clock, ManualClock};
    use crate::error::RegistryCode;
    use crate::filter::Filter;
    use crate::metadata::{metadata, MetadataValue};
    use std::sync::Arc;
    use std::time::Duration;

    fn store(clock: Arc<ManualClock>) -> InMemoryRegistryStore {
        InMemoryRegistryStore::with_indexed_fields(clock, ["type", "zone"])
    }

    fn record(clock: &ManualClock, identity: &str, zone: &str) -> RegistrationRecord {
        RegistrationRecord::new(
            identity,
            metadata([("type", "sensor".into()), ("zone", zone.into())]),
            clock.now(),
        )
    }

    async fn scan_ids(store: &InMemoryRegistryStore, filter: Option<Filter>) -> Vec<String> {
        store
            .scan(ScanRequest {
                filter,
                page: PageRequest::first(100),
                ..Default::default()
            })
            .await
            .unwrap()
            .records
            .into_iter()
            .map(|record| record.identity)
            .collect()
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_replace_bumps_version() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());

        let first = store.put(record(&clock, "svc-a", "1"), PutMode::Create).await.unwrap();
        assert_eq!(first.record.version, 1);
        assert!(!first.replaced);

        let err = store
            .put(record(&clock, "svc-a", "2"), PutMode::Create)
            .await
            .unwrap_err();
        assert_eq!(err.code, RegistryCode::AlreadyExists);

        let replaced = store
            .put(
                record(&clock, "svc-a", "2"),
                PutMode::Replace {
                    expected_version: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(replaced.record.version, 2);
        assert!(replaced.replaced);
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_conflict() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());
        store.put(record(&clock, "svc-a", "1"), PutMode::Create).await.unwrap();

        let err = store
            .put(
                record(&clock, "svc-a", "2"),
                PutMode::Replace {
                    expected_version: Some(7),
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.code, RegistryCode::VersionConflict);
        assert_eq!(
            store.get("svc-a").await.unwrap().metadata["zone"],
            MetadataValue::from("1")
        );
    }

    #[tokio::test]
    async fn index_updates_follow_replace_and_delete() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());
        store.put(record(&clock, "svc-a", "1"), PutMode::Create).await.unwrap();
        store.put(record(&clock, "svc-b", "2"), PutMode::Create).await.unwrap();

        assert_eq!(scan_ids(&store, Some(Filter::eq("zone", "1"))).await, vec!["svc-a"]);

        store
            .put(
                record(&clock, "svc-a", "2"),
                PutMode::Replace {
                    expected_version: None,
                },
            )
            .await
            .unwrap();
        assert!(scan_ids(&store, Some(Filter::eq("zone", "1"))).await.is_empty());
        assert_eq!(
            scan_ids(&store, Some(Filter::one_of("zone", ["2"]))).await,
            vec!["svc-a", "svc-b"]
        );

        store.delete("svc-b", DeleteCondition::Always).await.unwrap();
        assert_eq!(scan_ids(&store, Some(Filter::eq("zone", "2"))).await, vec!["svc-a"]);
    }

    #[tokio::test]
    async fn indexed_lookup_still_matches_timestamp_values() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = InMemoryRegistryStore::with_indexed_fields(clock.clone(), ["seen"]);
        let at = chrono::DateTime::parse_from_rfc3339("2026-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let timestamped = RegistrationRecord::new(
            "svc-t",
            metadata([("seen", MetadataValue::Timestamp(at))]),
            clock.now(),
        );
        store.put(timestamped, PutMode::Create).await.unwrap();

        let ids = scan_ids(&store, Some(Filter::eq("seen", "2026-05-01T00:00:00Z"))).await;

        assert_eq!(ids, vec!["svc-t"]);
    }

    #[tokio::test]
    async fn expired_records_are_absent_until_conditionally_deleted() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());
        let ttl = Duration::from_secs(1);
        let expiring = record(&clock, "svc-a", "1")
            .with_expiry(ttl, clock.now() + chrono::Duration::seconds(1));
        store.put(expiring, PutMode::Create).await.unwrap();

        clock.advance(Duration::from_secs(2));

        assert_eq!(store.get("svc-a").await.unwrap_err().code, RegistryCode::NotFound);
        assert!(scan_ids(&store, None).await.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.list_expired(clock.now(), 10).await.unwrap().len(), 1);
        assert_eq!(
            store.renew_expiry("svc-a", ttl).await.unwrap_err().code,
            RegistryCode::NotFound
        );

        assert!(store
            .delete("svc-a", DeleteCondition::ExpiredBy(clock.now()))
            .await
            .unwrap());
        assert!(store.list_expired(clock.now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conditional_delete_spares_renewed_record() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());
        let ttl = Duration::from_secs(10);
        let expiring = record(&clock, "svc-a", "1")
            .with_expiry(ttl, clock.now() + chrono::Duration::seconds(10));
        store.put(expiring, PutMode::Create).await.unwrap();

        let sweep_started = clock.now() + chrono::Duration::seconds(11);
        clock.advance(Duration::from_secs(9));
        let renewed = store.renew_expiry("svc-a", ttl).await.unwrap();

        assert_eq!(renewed.version, 1);
        assert!(!store
            .delete("svc-a", DeleteCondition::ExpiredBy(clock.now()))
            .await
            .unwrap());
        assert!(!renewed.is_expired(sweep_started));
    }

    #[tokio::test]
    async fn version_guarded_delete_only_removes_that_version() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());
        store.put(record(&clock, "svc-a", "1"), PutMode::Create).await.unwrap();
        store
            .put(
                record(&clock, "svc-a", "2"),
                PutMode::Replace {
                    expected_version: None,
                },
            )
            .await
            .unwrap();

        assert!(!store.delete("svc-a", DeleteCondition::Version(1)).await.unwrap());
        assert!(store.delete("svc-a", DeleteCondition::Version(2)).await.unwrap());
    }

    #[tokio::test]
    async fn closed_store_reports_backend_unavailable() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock);
        store.close().await.unwrap();

        assert_eq!(
            store.count().await.unwrap_err().code,
            RegistryCode::BackendUnavailable
        );
    }
}
