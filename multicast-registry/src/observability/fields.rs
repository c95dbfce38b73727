//! Canonical structured field keys and value-format helpers.

use crate::filter::Filter;

pub const EVENT: &str = "event";
pub const COMPONENT: &str = "component";
pub const NAMESPACE: &str = "namespace";
pub const IDENTITY: &str = "identity";
pub const VERSION: &str = "version";

pub const MSG_ID: &str = "msg_id";
pub const TARGET_COUNT: &str = "target_count";
pub const DELIVERED_COUNT: &str = "delivered_count";
pub const PENDING_COUNT: &str = "pending_count";
pub const SEMANTICS: &str = "semantics";
pub const ATTEMPTS: &str = "attempts";
pub const FILTER: &str = "filter";

pub const REASON: &str = "reason";
pub const ERR: &str = "err";

pub const NONE: &str = "none";
pub const MATCH_ALL: &str = "match_all";

/// Renders an optional filter for log fields.
pub fn format_filter(filter: Option<&Filter>) -> String {
    filter
        .map(|filter| filter.to_string())
        .unwrap_or_else(|| MATCH_ALL.to_string())
}

/// Renders an optional error for log fields.
pub fn format_optional_error(error: Option<&str>) -> &str {
    error.unwrap_or(NONE)
}
