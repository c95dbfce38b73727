//! Data-plane layer.
//!
//! Owns multicast fan-out: resolving targets, delivering concurrently under a
//! deadline, accounting per-target outcomes, and draining the durability queue.
//! Per-target failures never fail the call; they show up in the statuses.
//!
//! ```
//! use multicast_registry::{metadata, Filter, MulticastRegistry, MulticastRequest, NamespaceConfig, RegisterRequest};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = MulticastRegistry::from_config(NamespaceConfig::new("doc")).unwrap();
//! registry
//!     .register(RegisterRequest::new("svc-a", metadata([("zone", "1".into())])))
//!     .await
//!     .unwrap();
//!
//! let result = registry
//!     .multicast(MulticastRequest::new(Some(Filter::eq("zone", "1")), b"ping".to_vec()))
//!     .await
//!     .unwrap();
//! assert_eq!(result.target_count, 1);
//! assert_eq!(result.delivered_count, 1);
//! # });
//! ```

pub(crate) mod delivery;
pub(crate) mod multicast_coordinator;
pub(crate) mod redelivery;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::filter::Filter;

pub use redelivery::RedeliveryReport;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Delivery guarantee requested for one multicast.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliverySemantics {
    /// One attempt per target, no retry.
    #[default]
    #[serde(alias = "at_most_once")]
    AtMostOnce,
    /// Retries in the request; leftovers are queued for redelivery. Duplicates are
    /// possible.
    #[serde(alias = "at_least_once")]
    AtLeastOnce,
    /// Queued before delivery and acknowledged after; needs transactional slots.
    #[serde(alias = "exactly_once")]
    ExactlyOnce,
}

/// Outcome class of one target.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Delivered,
    /// Not delivered in the request but held by the durability sink for redelivery.
    Pending,
    Failed,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub identity: String,
    pub status: DeliveryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Delivery attempts made in the request path.
    pub attempts: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastResult {
    pub target_count: usize,
    pub delivered_count: usize,
    pub statuses: Vec<DeliveryStatus>,
}

impl MulticastResult {
    pub fn count(&self, state: DeliveryState) -> usize {
        self.statuses
            .iter()
            .filter(|status| status.status == state)
            .count()
    }

    pub fn status_of(&self, identity: &str) -> Option<&DeliveryStatus> {
        self.statuses
            .iter()
            .find(|status| status.identity == identity)
    }
}

/// One multicast call.
#[derive(Clone, Debug, PartialEq)]
pub struct MulticastRequest {
    /// `None` targets every registered identity.
    pub filter: Option<Filter>,
    pub payload: Vec<u8>,
    pub content_type: String,
    /// Falls back to the namespace default.
    pub semantics: Option<DeliverySemantics>,
    /// Falls back to the namespace default.
    pub timeout: Option<Duration>,
}

impl MulticastRequest {
    pub fn new(filter: Option<Filter>, payload: Vec<u8>) -> Self {
        Self {
            filter,
            payload,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            semantics: None,
            timeout: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_semantics(mut self, semantics: DeliverySemantics) -> Self {
        self.semantics = Some(semantics);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{DeliverySemantics, DeliveryState, DeliveryStatus, MulticastResult};

    #[test]
    fn semantics_accept_wire_and_config_spellings() {
        let wire: DeliverySemantics = serde_json::from_str("\"AT_LEAST_ONCE\"").unwrap();
        let config: DeliverySemantics = serde_json::from_str("\"exactly_once\"").unwrap();

        assert_eq!(wire, DeliverySemantics::AtLeastOnce);
        assert_eq!(config, DeliverySemantics::ExactlyOnce);
        assert_eq!(
            serde_json::to_string(&DeliverySemantics::AtMostOnce).unwrap(),
            "\"AT_MOST_ONCE\""
        );
    }

    #[test]
    fn result_helpers_count_and_find_statuses() {
        let result = MulticastResult {
            target_count: 2,
            delivered_count: 1,
            statuses: vec![
                DeliveryStatus {
                    identity: "a".into(),
                    status: DeliveryState::Delivered,
                    error: None,
                    attempts: 1,
                },
                DeliveryStatus {
                    identity: "b".into(),
                    status: DeliveryState::Timeout,
                    error: None,
                    attempts: 0,
                },
            ],
        };

        assert_eq!(result.count(DeliveryState::Timeout), 1);
        assert_eq!(result.status_of("a").unwrap().status, DeliveryState::Delivered);
        assert!(result.status_of("c").is_none());
    }
}
