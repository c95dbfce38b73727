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

//! Hosts one [`MulticastRegistry`] per configured namespace behind the JSON-lines
//! RPC endpoint in [`server`].

pub mod config;
pub mod server;

pub use config::ServerConfig;
pub use server::RegistryServer;

use multicast_registry::{BackgroundTaskHandle, MulticastRegistry, RegistryError};
use std::sync::Arc;
use tracing::warn;

/// Builds every namespace's registry from its own config section.
pub fn build_registries(config: &ServerConfig) -> Result<Vec<Arc<MulticastRegistry>>, RegistryError> {
    config
        .namespaces
        .iter()
        .cloned()
        .map(|namespace| MulticastRegistry::from_config(namespace).map(Arc::new))
        .collect()
}

/// Starts the expiry sweeper of each registry, plus its redelivery worker when it
/// has a durability sink.
pub fn start_background_tasks(registries: &[Arc<MulticastRegistry>]) -> Vec<BackgroundTaskHandle> {
    let mut handles = Vec::new();
    for registry in registries {
        handles.push(registry.start_sweeper());
        handles.extend(registry.start_redelivery());
    }
    handles
}

/// Stops background tasks, then closes every registry's slots.
pub async fn shut_down(registries: &[Arc<MulticastRegistry>], handles: Vec<BackgroundTaskHandle>) {
    for handle in handles {
        handle.stop().await;
    }
    for registry in registries {
        if let Err(err) = registry.close().await {
            warn!(
                namespace = registry.namespace(),
                err = %err,
                "failed to close registry"
            );
        }
    }
}
