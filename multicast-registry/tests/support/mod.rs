use multicast_registry::backend::MessagingSink;
use multicast_registry::clock::ManualClock;
use multicast_registry::{
    metadata, EnumerateRequest, Filter, MulticastRegistry, NamespaceConfig, RegisterRequest,
    RegisterResult,
};
use serde_json::Value;
use std::sync::Arc;

/// Namespace config with delivery retries fast enough for tests.
pub(crate) fn test_config(name: &str) -> NamespaceConfig {
    let mut config = NamespaceConfig::new(name);
    config.delivery.retry_delay_ms = 1;
    config.delivery.default_timeout_ms = 2_000;
    config
}

pub(crate) fn make_registry(name: &str) -> MulticastRegistry {
    MulticastRegistry::from_config(test_config(name)).expect("registry creation should succeed")
}

#[allow(dead_code)]
pub(crate) fn make_registry_with(
    config: NamespaceConfig,
    clock: Arc<ManualClock>,
    messaging: Arc<dyn MessagingSink>,
) -> MulticastRegistry {
    MulticastRegistry::builder(config)
        .with_clock(clock)
        .with_messaging_sink(messaging)
        .build()
        .expect("registry creation should succeed")
}

#[allow(dead_code)]
pub(crate) async fn register_ok(
    registry: &MulticastRegistry,
    identity: &str,
    zone: &str,
) -> RegisterResult {
    registry
        .register(RegisterRequest::new(
            identity,
            metadata([("type", "sensor".into()), ("zone", zone.into())]),
        ))
        .await
        .expect("registration should succeed")
}

#[allow(dead_code)]
pub(crate) fn filter(registry: &MulticastRegistry, expression: Value) -> Option<Filter> {
    registry
        .compile_filter(&expression)
        .expect("filter should compile")
}

#[allow(dead_code)]
pub(crate) async fn listed_identities(
    registry: &MulticastRegistry,
    filter: Option<Filter>,
) -> Vec<String> {
    registry
        .enumerate(EnumerateRequest::new(filter))
        .await
        .expect("enumerate should succeed")
        .identities
        .into_iter()
        .map(|view| view.identity)
        .collect()
}

#[allow(dead_code)]
pub(crate) fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_now())
}
