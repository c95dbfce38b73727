//! Bounded exponential backoff for idempotent store reads.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::RegistryError;
use crate::observability::events;

const COMPONENT: &str = "store_retry";

/// Retry budget for `get` and `scan`. Mutations are never retried.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    200
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub(crate) fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent.
pub(crate) async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, RegistryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    event = events::STORE_RETRY,
                    component = COMPONENT,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    err = %err,
                    "transient store failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
