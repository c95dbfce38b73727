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

//! Conformance suite and test doubles shared by every registry store binding.
//!
//! - [`store_contract`] checks the `RegistryStore` contract on one binding.
//! - [`equivalence`] compares native, engine-side, and in-process filter evaluation.
//! - [`strategies`] generates datasets and filters for property-based runs.
//! - The doubles inject failures, latency, and transactional capability into the
//!   slots a registry is built from.

mod failing_subscription_sink;
pub use failing_subscription_sink::FailingSubscriptionSink;
mod flaky_registry_store;
pub use flaky_registry_store::FlakyRegistryStore;
mod scripted_messaging_sink;
pub use scripted_messaging_sink::ScriptedMessagingSink;
mod transactional;
pub use transactional::{TransactionalDurabilitySink, TransactionalRegistryStore};

pub mod equivalence;
pub mod fixtures;
pub mod store_contract;
pub mod strategies;

pub use equivalence::{evaluate_everywhere, store_bindings, Evaluations, StoreBinding};

/// Installs a fmt subscriber honoring `RUST_LOG`, once per process.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
