//! Native, engine-side, and in-process evaluation must select the same identities.
//!
//! Each run seeds two registries over fresh instances of one store binding, one
//! with `filter_evaluation = auto` and one forced to `engine_side`, pages through
//! `enumerate` on both, and compares the result with [`Filter::matches`] applied
//! to the raw dataset.

use multicast_registry::backend::{
    InMemoryKeyValue, InMemoryRegistryStore, KeyValueRegistryStore, PageRequest, RegistryStore,
};
use multicast_registry::clock::{Clock, ManualClock};
use multicast_registry::config::FilterEvaluation;
use multicast_registry::{
    EnumerateRequest, Filter, Metadata, MulticastRegistry, NamespaceConfig, RegisterRequest,
    RegistryError,
};
use std::sync::Arc;

/// Small pages force multi-page walks on both the scan and the enumerate side.
pub const CONFORMANCE_PAGE_SIZE: usize = 3;

/// One way of constructing a [`RegistryStore`].
#[derive(Clone, Copy)]
pub struct StoreBinding {
    pub name: &'static str,
    make: fn(Arc<dyn Clock>) -> Arc<dyn RegistryStore>,
}

impl StoreBinding {
    pub fn build(&self, clock: Arc<dyn Clock>) -> Arc<dyn RegistryStore> {
        (self.make)(clock)
    }
}

impl std::fmt::Debug for StoreBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Every registry store binding shipped with the registry.
pub fn store_bindings() -> Vec<StoreBinding> {
    vec![
        StoreBinding {
            name: "memory",
            make: |clock| Arc::new(InMemoryRegistryStore::new(clock)),
        },
        StoreBinding {
            name: "memory_indexed",
            make: |clock| {
                Arc::new(InMemoryRegistryStore::with_indexed_fields(
                    clock,
                    ["type", "zone", "active"],
                ))
            },
        },
        StoreBinding {
            name: "key_value",
            make: |clock| Arc::new(KeyValueRegistryStore::new(Arc::new(InMemoryKeyValue::new()), clock)),
        },
    ]
}

/// Identities selected by each evaluation path, in enumeration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluations {
    pub expected: Vec<String>,
    pub auto: Vec<String>,
    pub engine_side: Vec<String>,
}

impl Evaluations {
    pub fn agree(&self) -> bool {
        self.auto == self.expected && self.engine_side == self.expected
    }
}

/// Builds a registry over a fresh instance of `binding` holding `dataset`.
pub async fn seeded_registry(
    binding: &StoreBinding,
    evaluation: FilterEvaluation,
    dataset: &[(String, Metadata)],
) -> Result<MulticastRegistry, RegistryError> {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let mut config = NamespaceConfig::new(format!("conformance-{}", binding.name));
    config.filter_evaluation = evaluation;
    config.scan_page_size = CONFORMANCE_PAGE_SIZE;

    let registry = MulticastRegistry::builder(config)
        .with_clock(clock.clone())
        .with_registry_store(binding.build(clock))
        .build()?;
    for (identity, metadata) in dataset {
        registry
            .register(RegisterRequest::new(identity.as_str(), metadata.clone()))
            .await?;
    }
    Ok(registry)
}

/// Walks every page of `enumerate(filter)` and returns the identities in order.
pub async fn enumerate_identities(
    registry: &MulticastRegistry,
    filter: Option<&Filter>,
    page_size: usize,
) -> Result<Vec<String>, RegistryError> {
    let mut identities = Vec::new();
    let mut page = PageRequest::first(page_size);
    loop {
        let result = registry
            .enumerate(EnumerateRequest::new(filter.cloned()).with_page(page))
            .await?;
        identities.extend(result.identities.into_iter().map(|view| view.identity));
        match result.next_cursor {
            Some(cursor) => page = PageRequest::after(cursor, page_size),
            None => return Ok(identities),
        }
    }
}

/// Identities [`Filter::matches`] selects from the raw dataset, sorted.
pub fn expected_identities(dataset: &[(String, Metadata)], filter: Option<&Filter>) -> Vec<String> {
    let mut identities: Vec<String> = dataset
        .iter()
        .filter(|(_, metadata)| multicast_registry::filter::matches(filter, metadata))
        .map(|(identity, _)| identity.clone())
        .collect();
    identities.sort();
    identities
}

pub async fn evaluate_everywhere(
    binding: &StoreBinding,
    dataset: &[(String, Metadata)],
    filter: Option<&Filter>,
) -> Result<Evaluations, RegistryError> {
    let auto = seeded_registry(binding, FilterEvaluation::Auto, dataset).await?;
    let engine_side = seeded_registry(binding, FilterEvaluation::EngineSide, dataset).await?;

    Ok(Evaluations {
        expected: expected_identities(dataset, filter),
        auto: enumerate_identities(&auto, filter, CONFORMANCE_PAGE_SIZE).await?,
        engine_side: enumerate_identities(&engine_side, filter, CONFORMANCE_PAGE_SIZE).await?,
    })
}
