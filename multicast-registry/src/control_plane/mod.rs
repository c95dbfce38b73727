//! Control-plane layer.
//!
//! Owns the registration lifecycle: create, replace, renew, unregister, and expire.
//! Writes that also need a messaging subscription are rolled back when the
//! subscription cannot be created, and expiry deletes are conditional so a renewal
//! racing a sweep always wins.
//!
//! ```
//! use std::time::Duration;
//! use multicast_registry::{metadata, MulticastRegistry, NamespaceConfig, RegisterRequest, RegistryCode};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = MulticastRegistry::from_config(NamespaceConfig::new("control-plane-doc")).unwrap();
//! let request = RegisterRequest::new("x", metadata([])).with_ttl(Duration::from_secs(1));
//!
//! registry.register(request.clone()).await.unwrap();
//! let duplicate = registry.register(request).await.unwrap_err();
//! assert_eq!(duplicate.code, RegistryCode::AlreadyExists);
//!
//! // Unregister stays idempotent.
//! assert!(registry.unregister("x").await.unwrap());
//! assert!(!registry.unregister("x").await.unwrap());
//! # });
//! ```

pub(crate) mod expiry_sweeper;
pub(crate) mod registration_lifecycle;

pub use expiry_sweeper::{SweepHealth, SweepReport};
pub use registration_lifecycle::{RegisterRequest, RegisterResult};
