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

use multicast_registry::{NamespaceConfig, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7410";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub namespaces: Vec<NamespaceConfig>,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl ServerConfig {
    pub fn from_json5_str(contents: &str) -> Result<Self, RegistryError> {
        let config: Self = json5::from_str(contents).map_err(|err| {
            RegistryError::invalid_configuration(format!("unable to parse server config: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            RegistryError::invalid_configuration(format!(
                "unable to read config file {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json5_str(&contents)
    }

    /// Every namespace must be valid on its own and uniquely named.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.namespaces.is_empty() {
            return Err(RegistryError::invalid_configuration(
                "server config declares no namespaces",
            ));
        }
        let mut seen = HashSet::new();
        for namespace in &self.namespaces {
            namespace.validate()?;
            if !seen.insert(namespace.name.as_str()) {
                return Err(RegistryError::invalid_configuration(format!(
                    "duplicate namespace name found: {}",
                    namespace.name
                )));
            }
        }
        Ok(())
    }
}
