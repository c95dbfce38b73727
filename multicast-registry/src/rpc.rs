//! Transport-neutral RPC envelope: one JSON request in, one JSON response out.
//!
//! ```
//! use std::sync::Arc;
//! use multicast_registry::{MulticastRegistry, NamespaceConfig, RpcDispatcher};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = MulticastRegistry::from_config(NamespaceConfig::new("devices")).unwrap();
//! let dispatcher = RpcDispatcher::new([Arc::new(registry)]);
//!
//! let reply = dispatcher
//!     .handle_line(r#"{"namespace":"devices","op":"register","identity":"svc-a","metadata":{"zone":"1"}}"#)
//!     .await;
//! assert!(reply.starts_with(r#"{"ok":{"success":true"#));
//! # });
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Level};

use crate::backend::{PageRequest, RegistrationRecord, SortKey};
use crate::control_plane::{RegisterRequest, RegisterResult};
use crate::data_plane::{DeliverySemantics, MulticastRequest, MulticastResult};
use crate::error::{RegistryCode, RegistryError};
use crate::metadata::metadata_from_json;
use crate::observability::events;
use crate::registry::{EnumerateRequest, EnumerateResult, MulticastRegistry};

const COMPONENT: &str = "rpc";

/// One request addressed to a namespace.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RpcRequest {
    pub namespace: String,
    #[serde(flatten)]
    pub operation: RpcOperation,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcOperation {
    Register {
        identity: String,
        #[serde(default)]
        metadata: Value,
        ttl_seconds: Option<u64>,
        #[serde(default)]
        replace: bool,
        expected_version: Option<u64>,
    },
    Enumerate {
        #[serde(default)]
        filter: Value,
        cursor: Option<String>,
        limit: Option<usize>,
        #[serde(default)]
        include_metadata: bool,
        #[serde(default)]
        sort_by: SortKey,
    },
    Multicast {
        #[serde(default)]
        filter: Value,
        /// Base64 (standard alphabet, padded).
        #[serde(default)]
        payload: String,
        content_type: Option<String>,
        delivery_semantics: Option<DeliverySemantics>,
        timeout_ms: Option<u64>,
    },
    Unregister {
        identity: String,
    },
    Heartbeat {
        identity: String,
        ttl_seconds: Option<u64>,
    },
}

impl RpcOperation {
    pub fn name(&self) -> &'static str {
        match self {
            RpcOperation::Register { .. } => "register",
            RpcOperation::Enumerate { .. } => "enumerate",
            RpcOperation::Multicast { .. } => "multicast",
            RpcOperation::Unregister { .. } => "unregister",
            RpcOperation::Heartbeat { .. } => "heartbeat",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegisterReply {
    pub success: bool,
    #[serde(flatten)]
    pub result: RegisterResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnregisterReply {
    pub success: bool,
    /// Whether a live registration existed.
    pub found: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HeartbeatReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RegistrationRecord> for HeartbeatReply {
    fn from(record: RegistrationRecord) -> Self {
        Self {
            success: true,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Register(RegisterReply),
    Enumerate(EnumerateResult),
    Multicast(MulticastResult),
    Unregister(UnregisterReply),
    Heartbeat(HeartbeatReply),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RpcErrorBody {
    pub code: RegistryCode,
    pub message: String,
}

impl From<RegistryError> for RpcErrorBody {
    fn from(err: RegistryError) -> Self {
        Self {
            code: err.code,
            message: err.message,
        }
    }
}

/// `{"ok": ...}` or `{"error": {"code": ..., "message": ...}}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponse {
    Ok(RpcReply),
    Error(RpcErrorBody),
}

impl From<Result<RpcReply, RegistryError>> for RpcResponse {
    fn from(result: Result<RpcReply, RegistryError>) -> Self {
        match result {
            Ok(reply) => RpcResponse::Ok(reply),
            Err(err) => RpcResponse::Error(err.into()),
        }
    }
}

/// Routes requests to the registry serving their namespace.
#[derive(Clone, Default)]
pub struct RpcDispatcher {
    registries: HashMap<String, Arc<MulticastRegistry>>,
}

impl RpcDispatcher {
    pub fn new(registries: impl IntoIterator<Item = Arc<MulticastRegistry>>) -> Self {
        Self {
            registries: registries
                .into_iter()
                .map(|registry| (registry.namespace().to_string(), registry))
                .collect(),
        }
    }

    pub fn registry(&self, namespace: &str) -> Option<&Arc<MulticastRegistry>> {
        self.registries.get(namespace)
    }

    pub fn registries(&self) -> impl Iterator<Item = &Arc<MulticastRegistry>> {
        self.registries.values()
    }

    /// Parses one JSON request and renders its JSON response, without a trailing
    /// newline.
    pub async fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(err) => RpcResponse::Error(RpcErrorBody::from(RegistryError::invalid_argument(
                format!("malformed request: {err}"),
            ))),
        };
        serde_json::to_string(&response).unwrap_or_else(|err| {
            format!(
                r#"{{"error":{{"code":"INVALID_ARGUMENT","message":"unserializable response: {err}"}}}}"#
            )
        })
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let operation = request.operation.name();
        let result = match self.registries.get(&request.namespace) {
            Some(registry) => dispatch(registry, request.operation).await,
            None => Err(RegistryError::fail_with_code(
                RegistryCode::NotFound,
                format!("namespace '{}' is not served here", request.namespace),
            )),
        };

        if let Err(err) = &result {
            if tracing::enabled!(Level::DEBUG) {
                debug!(
                    event = events::RPC_REQUEST_FAILED,
                    component = COMPONENT,
                    namespace = request.namespace.as_str(),
                    operation,
                    err = %err,
                    "rpc request failed"
                );
            }
        }
        result.into()
    }
}

async fn dispatch(
    registry: &MulticastRegistry,
    operation: RpcOperation,
) -> Result<RpcReply, RegistryError> {
    match operation {
        RpcOperation::Register {
            identity,
            metadata,
            ttl_seconds,
            replace,
            expected_version,
        } => {
            let mut request = RegisterRequest::new(identity, metadata_from_json(metadata)?);
            request.ttl = ttl_seconds.map(Duration::from_secs);
            request.replace = replace;
            request.expected_version = expected_version;
            let result = registry.register(request).await?;
            Ok(RpcReply::Register(RegisterReply {
                success: true,
                result,
            }))
        }
        RpcOperation::Enumerate {
            filter,
            cursor,
            limit,
            include_metadata,
            sort_by,
        } => {
            let request = EnumerateRequest {
                filter: registry.compile_filter(&filter)?,
                page: PageRequest { cursor, limit },
                include_metadata,
                sort_by,
            };
            Ok(RpcReply::Enumerate(registry.enumerate(request).await?))
        }
        RpcOperation::Multicast {
            filter,
            payload,
            content_type,
            delivery_semantics,
            timeout_ms,
        } => {
            let payload = BASE64.decode(payload.as_bytes()).map_err(|err| {
                RegistryError::invalid_argument(format!("payload is not valid base64: {err}"))
            })?;
            let mut request = MulticastRequest::new(registry.compile_filter(&filter)?, payload);
            if let Some(content_type) = content_type {
                request = request.with_content_type(content_type);
            }
            request.semantics = delivery_semantics;
            request.timeout = timeout_ms.map(Duration::from_millis);
            Ok(RpcReply::Multicast(registry.multicast(request).await?))
        }
        RpcOperation::Unregister { identity } => {
            let found = registry.unregister(&identity).await?;
            Ok(RpcReply::Unregister(UnregisterReply {
                success: true,
                found,
            }))
        }
        RpcOperation::Heartbeat {
            identity,
            ttl_seconds,
        } => {
            let record = registry
                .heartbeat(&identity, ttl_seconds.map(Duration::from_secs))
                .await?;
            Ok(RpcReply::Heartbeat(record.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RpcDispatcher, RpcOperation, RpcRequest};
    use crate::backend::SortKey;
    use crate::config::NamespaceConfig;
    use crate::registry::MulticastRegistry;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn dispatcher() -> RpcDispatcher {
        let registry = MulticastRegistry::from_config(NamespaceConfig::new("devices")).unwrap();
        RpcDispatcher::new([Arc::new(registry)])
    }

    async fn call(dispatcher: &RpcDispatcher, request: Value) -> Value {
        let line = dispatcher.handle_line(&request.to_string()).await;
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn requests_parse_with_flattened_operation() {
        let request: RpcRequest = serde_json::from_value(json!({
            "namespace": "devices",
            "op": "enumerate",
            "filter": {"type": "sensor"},
            "sort_by": "registered_at",
        }))
        .unwrap();

        assert_eq!(request.namespace, "devices");
        match request.operation {
            RpcOperation::Enumerate {
                sort_by, limit, ..
            } => {
                assert_eq!(sort_by, SortKey::RegisteredAt);
                assert_eq!(limit, None);
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_enumerate_multicast_unregister_round_trip() {
        let dispatcher = dispatcher();
        for (identity, zone) in [("svc-a", "1"), ("svc-b", "2")] {
            let reply = call(
                &dispatcher,
                json!({
                    "namespace": "devices",
                    "op": "register",
                    "identity": identity,
                    "metadata": {"type": "sensor", "zone": zone},
                    "ttl_seconds": 60,
                }),
            )
            .await;
            assert_eq!(reply["ok"]["success"], json!(true));
            assert!(reply["ok"]["expires_at"].is_string());
        }

        let listed = call(
            &dispatcher,
            json!({"namespace": "devices", "op": "enumerate", "filter": {"type": "sensor"}}),
        )
        .await;
        assert_eq!(listed["ok"]["total_count"], json!(2));

        let sent = call(
            &dispatcher,
            json!({
                "namespace": "devices",
                "op": "multicast",
                "filter": {"zone": "1"},
                "payload": "aGVsbG8=",
                "delivery_semantics": "AT_MOST_ONCE",
            }),
        )
        .await;
        assert_eq!(sent["ok"]["target_count"], json!(1));
        assert_eq!(sent["ok"]["statuses"][0]["identity"], json!("svc-a"));
        assert_eq!(sent["ok"]["statuses"][0]["status"], json!("DELIVERED"));

        let removed = call(
            &dispatcher,
            json!({"namespace": "devices", "op": "unregister", "identity": "svc-a"}),
        )
        .await;
        let again = call(
            &dispatcher,
            json!({"namespace": "devices", "op": "unregister", "identity": "svc-a"}),
        )
        .await;
        assert_eq!(removed["ok"], json!({"success": true, "found": true}));
        assert_eq!(again["ok"], json!({"success": true, "found": false}));
    }

    #[tokio::test]
    async fn failures_carry_wire_codes() {
        let dispatcher = dispatcher();

        let unknown_namespace = call(
            &dispatcher,
            json!({"namespace": "other", "op": "unregister", "identity": "x"}),
        )
        .await;
        let bad_filter = call(
            &dispatcher,
            json!({"namespace": "devices", "op": "enumerate", "filter": {"$where": "1"}}),
        )
        .await;
        let bad_payload = call(
            &dispatcher,
            json!({"namespace": "devices", "op": "multicast", "payload": "***"}),
        )
        .await;
        let malformed = dispatcher.handle_line("{not json").await;

        assert_eq!(unknown_namespace["error"]["code"], json!("NOT_FOUND"));
        assert_eq!(bad_filter["error"]["code"], json!("INVALID_FILTER"));
        assert_eq!(bad_payload["error"]["code"], json!("INVALID_ARGUMENT"));
        assert!(malformed.contains("INVALID_ARGUMENT"));
    }

    #[tokio::test]
    async fn heartbeat_reports_new_expiry() {
        let dispatcher = dispatcher();
        call(
            &dispatcher,
            json!({"namespace": "devices", "op": "register", "identity": "x", "ttl_seconds": 5}),
        )
        .await;

        let renewed = call(
            &dispatcher,
            json!({"namespace": "devices", "op": "heartbeat", "identity": "x"}),
        )
        .await;
        let missing = call(
            &dispatcher,
            json!({"namespace": "devices", "op": "heartbeat", "identity": "y"}),
        )
        .await;

        assert!(renewed["ok"]["expires_at"].is_string());
        assert_eq!(missing["error"]["code"], json!("NOT_FOUND"));
    }
}
