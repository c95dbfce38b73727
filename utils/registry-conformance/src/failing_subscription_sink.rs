use async_trait::async_trait;
use multicast_registry::backend::{MessagingSink, MulticastMessage};
use multicast_registry::RegistryError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Messaging sink that requires subscriptions and refuses every one of them.
pub struct FailingSubscriptionSink {
    name: Arc<String>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl FailingSubscriptionSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::new(name.to_string()),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        }
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingSink for FailingSubscriptionSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_subscription(&self) -> bool {
        true
    }

    async fn subscribe(&self, identity: &str) -> Result<(), RegistryError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        debug!("{}: refusing subscription for {identity}", self.name);
        Err(RegistryError::backend_unavailable(
            &self.name,
            "failing to create subscription",
        ))
    }

    async fn unsubscribe(&self, identity: &str) -> Result<(), RegistryError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        debug!("{}: unsubscribing {identity}", self.name);
        Ok(())
    }

    async fn deliver(
        &self,
        identity: &str,
        message: Arc<MulticastMessage>,
    ) -> Result<(), RegistryError> {
        debug!(
            "{}: delivering {} to {identity}",
            self.name, message.message_id
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}
