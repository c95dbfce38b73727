/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! # multicast-registry
//!
//! `multicast-registry` lets callers register named identities with structured
//! metadata and an optional TTL, enumerate them by metadata filter, and multicast a
//! payload to every identity matching a filter with per-target delivery accounting.
//!
//! Typical usage is API-first and centered on [`MulticastRegistry`], built per
//! namespace from a [`NamespaceConfig`].
//!
//! ## Quick start
//!
//! ```
//! use multicast_registry::{
//!     metadata, DeliveryState, EnumerateRequest, MulticastRegistry, MulticastRequest,
//!     NamespaceConfig, RegisterRequest,
//! };
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = MulticastRegistry::from_config(NamespaceConfig::new("quick-start")).unwrap();
//!
//! for (identity, zone) in [("svc-a", "1"), ("svc-b", "2")] {
//!     registry
//!         .register(RegisterRequest::new(
//!             identity,
//!             metadata([("type", "sensor".into()), ("zone", zone.into())]),
//!         ))
//!         .await
//!         .unwrap();
//! }
//!
//! let sensors = registry.compile_filter(&json!({"type": "sensor"})).unwrap();
//! let listed = registry.enumerate(EnumerateRequest::new(sensors)).await.unwrap();
//! assert_eq!(listed.total_count, 2);
//!
//! let zone_one = registry.compile_filter(&json!({"zone": "1"})).unwrap();
//! let result = registry
//!     .multicast(MulticastRequest::new(zone_one, b"reboot".to_vec()))
//!     .await
//!     .unwrap();
//! assert_eq!(result.target_count, 1);
//! assert_eq!(result.statuses[0].identity, "svc-a");
//! assert_eq!(result.statuses[0].status, DeliveryState::Delivered);
//! # });
//! ```
//!
//! ## Filter contract
//!
//! Filters compile from a JSON-like syntax: bare `field: value` pairs are equality,
//! `field.op` keys apply an operator (`lt`, `lte`, `gt`, `gte`, `ne`, `in`,
//! `startswith`, `endswith`, `contains`, `exists`), and `$and` / `$or` / `$not`
//! combine sub-filters. Compilation enforces the namespace's depth and clause limits.
//!
//! ```
//! use multicast_registry::{MulticastRegistry, NamespaceConfig, RegistryCode};
//! use serde_json::json;
//!
//! let registry = MulticastRegistry::from_config(NamespaceConfig::new("limits")).unwrap();
//!
//! let mut nested = json!({"zone": "1"});
//! for _ in 0..6 {
//!     nested = json!({"$and": [nested]});
//! }
//! let err = registry.compile_filter(&nested).unwrap_err();
//! assert_eq!(err.code, RegistryCode::InvalidFilter);
//! ```
//!
//! ## Internal architecture map
//!
//! - API facade: [`MulticastRegistry`] and the [`RpcDispatcher`] envelope
//! - Filter engine: compilation, limits, and pure evaluation
//! - Backend slots: registry store, messaging sink, optional durability sink
//! - Control plane: registration lifecycle and expiry sweeping
//! - Routing: native or engine-side target resolution and pagination
//! - Data plane: multicast fan-out and redelivery
//! - Runtime: bounded retries and owned background tasks
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events.
//! Library code emits events and does not initialize a global subscriber.
//! Binaries and tests are responsible for one-time `tracing_subscriber`
//! initialization at process boundaries.

pub mod backend;
pub mod clock;
pub mod config;
mod control_plane;
mod data_plane;
pub mod error;
pub mod filter;
pub mod metadata;
#[doc(hidden)]
pub mod observability;
mod registry;
mod routing;
pub mod rpc;
mod runtime;
pub mod schema;

pub use config::NamespaceConfig;
pub use control_plane::{RegisterRequest, RegisterResult, SweepHealth, SweepReport};
pub use data_plane::{
    DeliverySemantics, DeliveryState, DeliveryStatus, MulticastRequest, MulticastResult,
    RedeliveryReport, DEFAULT_CONTENT_TYPE,
};
pub use error::{RegistryCode, RegistryError};
pub use filter::{Filter, FilterCompiler, FilterLimits, Operator};
pub use metadata::{metadata, metadata_from_json, Metadata, MetadataValue};
pub use registry::{
    EnumerateRequest, EnumerateResult, IdentityView, MulticastRegistry, MulticastRegistryBuilder,
};
pub use routing::EvaluationStrategy;
pub use rpc::RpcDispatcher;
pub use runtime::background::BackgroundTaskHandle;
pub use runtime::retry::RetryPolicy;
pub use schema::{FieldSpec, FieldType, IdentitySchema};
