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

use clap::Parser;
use multicast_registry::{RegistryError, RpcDispatcher};
use registry_server::{
    build_registries, shut_down, start_background_tasks, RegistryServer, ServerConfig,
};
use tracing::info;

#[derive(Parser)]
#[command()]
struct ServerArgs {
    #[arg(short, long, value_name = "FILE")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), RegistryError> {
    let _ = tracing_subscriber::fmt::try_init();

    info!("Started registry-server");

    let args = ServerArgs::parse();
    let config = ServerConfig::load(&args.config)?;

    let registries = build_registries(&config)?;
    let handles = start_background_tasks(&registries);
    let dispatcher = RpcDispatcher::new(registries.iter().cloned());

    let server = RegistryServer::bind(&config.listen_addr, dispatcher)
        .await
        .map_err(|err| {
            RegistryError::invalid_configuration(format!(
                "unable to listen on {}: {err}",
                config.listen_addr
            ))
        })?;
    info!(
        listen_addr = %config.listen_addr,
        namespaces = registries.len(),
        "registry server listening"
    );

    server
        .serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    info!("shutting down registry-server");
    shut_down(&registries, handles).await;
    Ok(())
}
