use async_trait::async_trait;
use multicast_registry::backend::{InMemoryMessagingSink, MessagingSink, MulticastMessage};
use multicast_registry::RegistryError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Messaging sink whose per-identity behavior is scripted up front.
///
/// Identities without a script are delivered through an inner
/// [`InMemoryMessagingSink`], so their mailboxes can be inspected.
pub struct ScriptedMessagingSink {
    name: String,
    inner: InMemoryMessagingSink,
    failing: HashSet<String>,
    slow: HashMap<String, Duration>,
    failures_left: Mutex<HashMap<String, u32>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedMessagingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: InMemoryMessagingSink::default(),
            failing: HashSet::new(),
            slow: HashMap::new(),
            failures_left: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Every delivery to `identity` fails.
    pub fn failing(mut self, identity: &str) -> Self {
        self.failing.insert(identity.to_string());
        self
    }

    /// The first `failures` deliveries to `identity` fail, later ones succeed.
    pub fn failing_first(mut self, identity: &str, failures: u32) -> Self {
        self.failures_left
            .get_mut()
            .insert(identity.to_string(), failures);
        self
    }

    /// Deliveries to `identity` wait `delay` before completing.
    pub fn slow(mut self, identity: &str, delay: Duration) -> Self {
        self.slow.insert(identity.to_string(), delay);
        self
    }

    /// Delivery attempts seen for `identity`, successful or not.
    pub async fn attempts(&self, identity: &str) -> u32 {
        self.attempts
            .lock()
            .await
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    pub async fn delivered(&self, identity: &str) -> Vec<Arc<MulticastMessage>> {
        self.inner.delivered(identity).await
    }

    async fn take_scripted_failure(&self, identity: &str) -> bool {
        if self.failing.contains(identity) {
            return true;
        }
        let mut failures_left = self.failures_left.lock().await;
        match failures_left.get_mut(identity) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessagingSink for ScriptedMessagingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_subscription(&self) -> bool {
        false
    }

    async fn subscribe(&self, identity: &str) -> Result<(), RegistryError> {
        self.inner.subscribe(identity).await
    }

    async fn unsubscribe(&self, identity: &str) -> Result<(), RegistryError> {
        self.inner.unsubscribe(identity).await
    }

    async fn deliver(
        &self,
        identity: &str,
        message: Arc<MulticastMessage>,
    ) -> Result<(), RegistryError> {
        *self
            .attempts
            .lock()
            .await
            .entry(identity.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.slow.get(identity) {
            debug!("{}: stalling delivery to {identity} for {delay:?}", self.name);
            tokio::time::sleep(*delay).await;
        }
        if self.take_scripted_failure(identity).await {
            debug!("{}: failing delivery to {identity}", self.name);
            return Err(RegistryError::backend_unavailable(
                &self.name,
                format!("scripted delivery failure for '{identity}'"),
            ));
        }
        self.inner.deliver(identity, message).await
    }

    async fn close(&self) -> Result<(), RegistryError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptedMessagingSink;
    use multicast_registry::backend::{MessagingSink, MulticastMessage};
    use std::sync::Arc;

    #[tokio::test]
    async fn failing_first_recovers_after_the_scripted_failures() {
        let sink = ScriptedMessagingSink::new("scripted").failing_first("a", 2);
        let message = Arc::new(MulticastMessage::new(b"x".to_vec(), "text/plain"));

        assert!(sink.deliver("a", message.clone()).await.is_err());
        assert!(sink.deliver("a", message.clone()).await.is_err());
        assert!(sink.deliver("a", message).await.is_ok());

        assert_eq!(sink.attempts("a").await, 3);
        assert_eq!(sink.delivered("a").await.len(), 1);
    }

    #[tokio::test]
    async fn failing_identity_never_delivers() {
        let sink = ScriptedMessagingSink::new("scripted").failing("b");
        let message = Arc::new(MulticastMessage::new(b"x".to_vec(), "text/plain"));

        for _ in 0..3 {
            assert!(sink.deliver("b", message.clone()).await.is_err());
        }
        assert!(sink.delivered("b").await.is_empty());
    }
}
