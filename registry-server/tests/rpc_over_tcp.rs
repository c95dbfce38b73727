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

use multicast_registry::RpcDispatcher;
use registry_server::{build_registries, shut_down, start_background_tasks, RegistryServer, ServerConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

const CONFIG: &str = r#"{
    listen_addr: "127.0.0.1:0",
    namespaces: [
        { name: "devices" },
        { name: "services", backend_slots: { registry: { type: "key_value" } } },
    ],
}"#;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr)
            .await
            .expect("connect should succeed")
            .into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn call_raw(&mut self, line: &str) -> Value {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        let reply = self
            .lines
            .next_line()
            .await
            .unwrap()
            .expect("server should answer every line");
        serde_json::from_str(&reply).unwrap()
    }

    async fn call(&mut self, request: Value) -> Value {
        self.call_raw(&request.to_string()).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_the_rpc_surface_per_namespace() {
    registry_conformance::init_logging();
    let config = ServerConfig::from_json5_str(CONFIG).unwrap();
    let registries = build_registries(&config).unwrap();
    let handles = start_background_tasks(&registries);
    let server = RegistryServer::bind(&config.listen_addr, RpcDispatcher::new(registries.iter().cloned()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_until(async {
        let _ = stop_rx.await;
    }));

    let mut client = Client::connect(addr).await;

    for (identity, zone) in [("svc-a", "1"), ("svc-b", "2")] {
        let reply = client
            .call(json!({
                "namespace": "devices",
                "op": "register",
                "identity": identity,
                "metadata": {"type": "sensor", "zone": zone},
                "ttl_seconds": 60,
            }))
            .await;
        assert_eq!(reply["ok"]["success"], json!(true));
        assert_eq!(reply["ok"]["version"], json!(1));
    }

    let duplicate = client
        .call(json!({"namespace": "devices", "op": "register", "identity": "svc-a"}))
        .await;
    assert_eq!(duplicate["error"]["code"], json!("ALREADY_EXISTS"));

    let listed = client
        .call(json!({
            "namespace": "devices",
            "op": "enumerate",
            "filter": {"type": "sensor"},
            "include_metadata": true,
        }))
        .await;
    assert_eq!(listed["ok"]["total_count"], json!(2));
    assert_eq!(listed["ok"]["identities"][0]["identity"], json!("svc-a"));
    assert_eq!(listed["ok"]["identities"][0]["metadata"]["zone"], json!("1"));

    let multicast = client
        .call(json!({
            "namespace": "devices",
            "op": "multicast",
            "filter": {"zone": "1"},
            "payload": "cmVib290",
        }))
        .await;
    assert_eq!(multicast["ok"]["target_count"], json!(1));
    assert_eq!(multicast["ok"]["statuses"][0]["identity"], json!("svc-a"));
    assert_eq!(multicast["ok"]["statuses"][0]["status"], json!("DELIVERED"));

    let heartbeat = client
        .call(json!({"namespace": "devices", "op": "heartbeat", "identity": "svc-b"}))
        .await;
    assert_eq!(heartbeat["ok"]["success"], json!(true));
    assert!(heartbeat["ok"]["expires_at"].is_string());

    let removed = client
        .call(json!({"namespace": "devices", "op": "unregister", "identity": "svc-a"}))
        .await;
    assert_eq!(removed["ok"]["found"], json!(true));
    let removed_again = client
        .call(json!({"namespace": "devices", "op": "unregister", "identity": "svc-a"}))
        .await;
    assert_eq!(removed_again["ok"]["found"], json!(false));

    // Namespaces are isolated: the same identity is free in another one.
    let other = client
        .call(json!({"namespace": "services", "op": "register", "identity": "svc-b"}))
        .await;
    assert_eq!(other["ok"]["success"], json!(true));

    let unknown = client
        .call(json!({"namespace": "nowhere", "op": "unregister", "identity": "svc-a"}))
        .await;
    assert_eq!(unknown["error"]["code"], json!("NOT_FOUND"));

    let malformed = client.call_raw("{not json").await;
    assert_eq!(malformed["error"]["code"], json!("INVALID_ARGUMENT"));

    let _ = stop_tx.send(());
    serving.await.unwrap();
    shut_down(&registries, handles).await;
}
