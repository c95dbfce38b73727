//! Canonical structured event names used across `multicast-registry`.

// Registration lifecycle events.
pub const REGISTER_OK: &str = "register_ok";
pub const REGISTER_REJECTED: &str = "register_rejected";
pub const REGISTER_ROLLBACK: &str = "register_rollback";
pub const REGISTER_ROLLBACK_FAILED: &str = "register_rollback_failed";
pub const UNREGISTER_OK: &str = "unregister_ok";
pub const UNSUBSCRIBE_FAILED: &str = "unsubscribe_failed";
pub const SUBSCRIPTION_RESTORED: &str = "subscription_restored";
pub const SUBSCRIPTION_RESTORE_FAILED: &str = "subscription_restore_failed";
pub const HEARTBEAT_OK: &str = "heartbeat_ok";
pub const EXPIRE_OK: &str = "expire_ok";
pub const EXPIRE_SKIPPED_RENEWED: &str = "expire_skipped_renewed";

// Expiry sweeper events.
pub const SWEEP_COMPLETE: &str = "sweep_complete";
pub const SWEEP_FAILED: &str = "sweep_failed";

// Routing and store events.
pub const STORE_SCAN_PLANNED: &str = "store_scan_planned";
pub const STORE_RETRY: &str = "store_retry";
pub const TARGETS_RESOLVED: &str = "targets_resolved";

// Multicast fan-out events.
pub const MULTICAST_START: &str = "multicast_start";
pub const MULTICAST_COMPLETE: &str = "multicast_complete";
pub const DELIVERY_OK: &str = "delivery_ok";
pub const DELIVERY_FAILED: &str = "delivery_failed";
pub const DELIVERY_TIMEOUT: &str = "delivery_timeout";
pub const DELIVERY_ENQUEUED: &str = "delivery_enqueued";
pub const DELIVERY_ENQUEUE_FAILED: &str = "delivery_enqueue_failed";
pub const DELIVERY_ACK_FAILED: &str = "delivery_ack_failed";

// Redelivery worker events.
pub const REDELIVERY_COMPLETE: &str = "redelivery_complete";
pub const REDELIVERY_FAILED: &str = "redelivery_failed";
pub const REDELIVERY_DROPPED: &str = "redelivery_dropped";

// Runtime and facade events.
pub const BACKGROUND_TASK_START: &str = "background_task_start";
pub const BACKGROUND_TASK_STOP: &str = "background_task_stop";
pub const BACKGROUND_TASK_JOIN_FAILED: &str = "background_task_join_failed";
pub const REGISTRY_BUILT: &str = "registry_built";
pub const REGISTRY_CLOSED: &str = "registry_closed";
pub const SLOT_CLOSE_FAILED: &str = "slot_close_failed";

// RPC surface events.
pub const RPC_REQUEST_FAILED: &str = "rpc_request_failed";
pub const RPC_CONNECTION_OPEN: &str = "rpc_connection_open";
pub const RPC_CONNECTION_CLOSED: &str = "rpc_connection_closed";
