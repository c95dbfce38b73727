//! Per-target delivery with in-request retries.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{MessagingSink, MulticastMessage};
use crate::error::RegistryError;

/// What one target's delivery attempts came to.
#[derive(Debug)]
pub(crate) struct AttemptOutcome {
    pub(crate) result: Result<(), RegistryError>,
    pub(crate) attempts: u32,
}

/// Delivers `message` to `identity`, trying up to `max_attempts` times with
/// `retry_delay` between attempts.
pub(crate) async fn deliver_with_retry(
    messaging: &dyn MessagingSink,
    identity: &str,
    message: Arc<MulticastMessage>,
    max_attempts: u32,
    retry_delay: Duration,
) -> AttemptOutcome {
    let max_attempts = max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match messaging.deliver(identity, message.clone()).await {
            Ok(()) => {
                return AttemptOutcome {
                    result: Ok(()),
                    attempts,
                }
            }
            Err(err) if attempts >= max_attempts => {
                return AttemptOutcome {
                    result: Err(err),
                    attempts,
                }
            }
            Err(_) => tokio::time::sleep(retry_delay).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::deliver_with_retry;
    use crate::backend::{MessagingSink, MulticastMessage};
    use crate::error::RegistryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FailsFirst {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessagingSink for FailsFirst {
        fn name(&self) -> &str {
            "fails_first"
        }

        fn requires_subscription(&self) -> bool {
            false
        }

        async fn subscribe(&self, _identity: &str) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn unsubscribe(&self, _identity: &str) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn deliver(
            &self,
            _identity: &str,
            _message: Arc<MulticastMessage>,
        ) -> Result<(), RegistryError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(RegistryError::backend_unavailable("messaging", "flaky"))
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    fn message() -> Arc<MulticastMessage> {
        Arc::new(MulticastMessage::new(vec![1], "application/octet-stream"))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_within_budget() {
        let sink = FailsFirst {
            failures: 2,
            calls: AtomicU32::new(0),
        };

        let outcome =
            deliver_with_retry(&sink, "svc-a", message(), 3, Duration::from_millis(10)).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_budget_never_retries() {
        let sink = FailsFirst {
            failures: 1,
            calls: AtomicU32::new(0),
        };

        let outcome =
            deliver_with_retry(&sink, "svc-a", message(), 1, Duration::from_millis(10)).await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }
}
