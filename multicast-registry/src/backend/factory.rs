//! Binds configured slot variants to concrete implementations.

use std::sync::Arc;
use std::time::Duration;

use super::{
    DurabilitySink, InMemoryDurabilitySink, InMemoryKeyValue, InMemoryMessagingSink,
    InMemoryRegistryStore, KeyValueRegistryStore, MessagingSink, RegistryStore,
};
use crate::clock::Clock;
use crate::config::{DurabilitySinkConfig, MessagingSinkConfig, RegistryStoreConfig};
use crate::schema::IdentitySchema;

pub(crate) fn build_registry_store(
    config: &RegistryStoreConfig,
    schema: Option<&IdentitySchema>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn RegistryStore> {
    match config {
        RegistryStoreConfig::Memory => {
            let indexed: Vec<String> = schema
                .map(|schema| schema.indexed_fields().map(str::to_string).collect())
                .unwrap_or_default();
            Arc::new(InMemoryRegistryStore::with_indexed_fields(clock, indexed))
        }
        RegistryStoreConfig::KeyValue { prefix } => Arc::new(KeyValueRegistryStore::with_prefix(
            Arc::new(InMemoryKeyValue::new()),
            clock,
            prefix.clone(),
        )),
    }
}

pub(crate) fn build_messaging_sink(config: &MessagingSinkConfig) -> Arc<dyn MessagingSink> {
    match config {
        MessagingSinkConfig::Memory {
            topic_prefix,
            require_subscription,
            mailbox_capacity,
        } => Arc::new(InMemoryMessagingSink::new(
            topic_prefix.clone(),
            *require_subscription,
            *mailbox_capacity,
        )),
    }
}

pub(crate) fn build_durability_sink(
    config: &DurabilitySinkConfig,
    clock: Arc<dyn Clock>,
) -> Arc<dyn DurabilitySink> {
    match config {
        DurabilitySinkConfig::Memory { lease_ms } => Arc::new(InMemoryDurabilitySink::with_lease(
            clock,
            Duration::from_millis(*lease_ms),
        )),
    }
}
