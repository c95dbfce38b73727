//! Behavioral contract every [`RegistryStore`] binding must satisfy.
//!
//! [`check_store_contract`] panics with the binding name on the first violation,
//! so a caller can loop over [`crate::store_bindings`] inside one test.

use multicast_registry::backend::{
    DeleteCondition, PageRequest, PutMode, RegistrationRecord, RegistryStore, ScanRequest,
};
use multicast_registry::clock::{Clock, ManualClock};
use multicast_registry::{metadata, RegistryCode};
use std::sync::Arc;
use std::time::Duration;

use crate::equivalence::StoreBinding;

fn record(clock: &ManualClock, identity: &str, zone: &str) -> RegistrationRecord {
    RegistrationRecord::new(
        identity,
        metadata([("type", "sensor".into()), ("zone", zone.into())]),
        clock.now(),
    )
}

fn expiring(clock: &ManualClock, identity: &str, ttl: Duration) -> RegistrationRecord {
    let expires_at = clock.now() + chrono::Duration::seconds(ttl.as_secs() as i64);
    record(clock, identity, "1").with_expiry(ttl, expires_at)
}

pub async fn check_store_contract(binding: &StoreBinding) {
    let clock = Arc::new(ManualClock::starting_now());
    let store = binding.build(clock.clone());

    check_create_and_replace(binding.name, &clock, store.as_ref()).await;
    check_expiry(binding.name, &clock, store.as_ref()).await;
    check_renewal_and_conditional_delete(binding.name, &clock, store.as_ref()).await;
    check_pagination(binding.name, &clock, store.as_ref()).await;

    store.close().await.unwrap();
    let closed = store.get("svc-a").await.unwrap_err();
    assert_eq!(
        closed.code,
        RegistryCode::BackendUnavailable,
        "{}: closed store must refuse reads",
        binding.name
    );
}

async fn check_create_and_replace(name: &str, clock: &ManualClock, store: &dyn RegistryStore) {
    let created = store
        .put(record(clock, "svc-a", "1"), PutMode::Create)
        .await
        .unwrap();
    assert_eq!(created.record.version, 1, "{name}: first write is version 1");
    assert!(!created.replaced, "{name}: first write replaces nothing");

    let duplicate = store
        .put(record(clock, "svc-a", "2"), PutMode::Create)
        .await
        .unwrap_err();
    assert_eq!(duplicate.code, RegistryCode::AlreadyExists, "{name}");

    let replaced = store
        .put(
            record(clock, "svc-a", "2"),
            PutMode::Replace {
                expected_version: Some(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(replaced.record.version, 2, "{name}: replace bumps the version");
    assert!(replaced.replaced, "{name}");

    let stale = store
        .put(
            record(clock, "svc-a", "3"),
            PutMode::Replace {
                expected_version: Some(1),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(stale.code, RegistryCode::VersionConflict, "{name}");

    let current = store.get("svc-a").await.unwrap();
    assert_eq!(current.metadata.get("zone"), Some(&"2".into()), "{name}");

    let missing = store.get("missing").await.unwrap_err();
    assert_eq!(missing.code, RegistryCode::NotFound, "{name}");
}

async fn check_expiry(name: &str, clock: &ManualClock, store: &dyn RegistryStore) {
    let live_before = store.count().await.unwrap();
    store
        .put(expiring(clock, "short", Duration::from_secs(5)), PutMode::Create)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(6));

    let gone = store.get("short").await.unwrap_err();
    assert_eq!(gone.code, RegistryCode::NotFound, "{name}: expired reads as absent");
    assert_eq!(store.count().await.unwrap(), live_before, "{name}");
    let renewed = store.renew_expiry("short", Duration::from_secs(5)).await;
    assert_eq!(
        renewed.unwrap_err().code,
        RegistryCode::NotFound,
        "{name}: expired records cannot be renewed"
    );

    let expired = store.list_expired(clock.now(), 10).await.unwrap();
    assert!(
        expired.iter().any(|record| record.identity == "short"),
        "{name}: list_expired must report the lapsed record"
    );

    let recreated = store
        .put(record(clock, "short", "1"), PutMode::Create)
        .await
        .unwrap();
    assert!(
        !recreated.replaced,
        "{name}: creating over an expired record replaces nothing"
    );
    assert_eq!(
        recreated.record.version, 2,
        "{name}: the version sequence continues past an unswept record"
    );
    let stale = store
        .put(
            record(clock, "short", "2"),
            PutMode::Replace {
                expected_version: Some(1),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        stale.code,
        RegistryCode::VersionConflict,
        "{name}: a version from the previous incarnation must not match"
    );
    assert!(store.delete("short", DeleteCondition::Always).await.unwrap());
}

async fn check_renewal_and_conditional_delete(
    name: &str,
    clock: &ManualClock,
    store: &dyn RegistryStore,
) {
    let written = store
        .put(expiring(clock, "ttl", Duration::from_secs(5)), PutMode::Create)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3));

    let renewed = store
        .renew_expiry("ttl", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(
        renewed.version, written.record.version,
        "{name}: renewal keeps the version"
    );
    assert_eq!(
        renewed.expires_at,
        Some(clock.now() + chrono::Duration::seconds(30)),
        "{name}"
    );

    let at = clock.now();
    assert!(!store.delete("ttl", DeleteCondition::Version(99)).await.unwrap(), "{name}");
    assert!(
        !store.delete("ttl", DeleteCondition::ExpiredBy(at)).await.unwrap(),
        "{name}: a renewed record survives an expiry-guarded delete"
    );
    assert!(store
        .delete("ttl", DeleteCondition::Version(renewed.version))
        .await
        .unwrap());
    assert!(
        !store.delete("ttl", DeleteCondition::Always).await.unwrap(),
        "{name}: deleting twice reports nothing removed"
    );
}

async fn check_pagination(name: &str, clock: &ManualClock, store: &dyn RegistryStore) {
    for index in 0..5 {
        store
            .put(record(clock, &format!("page-{index}"), "9"), PutMode::Create)
            .await
            .unwrap();
    }
    let live = store.count().await.unwrap();

    let mut seen = Vec::new();
    let mut page = PageRequest::first(2);
    loop {
        let scanned = store
            .scan(ScanRequest {
                filter: None,
                page,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(scanned.total_count, live, "{name}: total spans all pages");
        assert!(scanned.records.len() <= 2, "{name}: page limit honored");
        seen.extend(scanned.records.into_iter().map(|record| record.identity));
        match scanned.next_cursor {
            Some(cursor) => page = PageRequest::after(cursor, 2),
            None => break,
        }
    }

    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(seen, sorted, "{name}: pages are ordered and disjoint");
    assert_eq!(seen.len(), live, "{name}");

    let malformed = store
        .scan(ScanRequest {
            filter: None,
            page: PageRequest::after("%%%".to_string(), 2),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(malformed.code, RegistryCode::InvalidArgument, "{name}");
}
