//! In-process [`MessagingSink`] with one broadcast mailbox per topic.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use super::{MessagingSink, MulticastMessage};
use crate::error::RegistryError;

pub const DEFAULT_TOPIC_PREFIX: &str = "prism.multicast.";
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;
const SINK_NAME: &str = "memory";

struct Mailbox {
    sender: broadcast::Sender<Arc<MulticastMessage>>,
    retained: VecDeque<Arc<MulticastMessage>>,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            retained: VecDeque::with_capacity(capacity),
        }
    }
}

/// Topic-addressed delivery inside one process.
///
/// Each identity maps to the topic `topic_prefix + identity`. Delivered messages are
/// broadcast to live receivers and the most recent `mailbox_capacity` are retained
/// for inspection.
pub struct InMemoryMessagingSink {
    topic_prefix: String,
    require_subscription: bool,
    mailbox_capacity: usize,
    mailboxes: Mutex<HashMap<String, Mailbox>>,
    closed: AtomicBool,
}

impl Default for InMemoryMessagingSink {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX, false, DEFAULT_MAILBOX_CAPACITY)
    }
}

impl InMemoryMessagingSink {
    pub fn new(
        topic_prefix: impl Into<String>,
        require_subscription: bool,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            require_subscription,
            mailbox_capacity: mailbox_capacity.max(1),
            mailboxes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Sink that refuses delivery to identities without a subscription.
    pub fn with_subscriptions() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX, true, DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn topic_for(&self, identity: &str) -> String {
        format!("{}{identity}", self.topic_prefix)
    }

    /// Live receiver for messages delivered to `identity` from now on.
    pub async fn mailbox(&self, identity: &str) -> broadcast::Receiver<Arc<MulticastMessage>> {
        let topic = self.topic_for(identity);
        let mut mailboxes = self.mailboxes.lock().await;
        mailboxes
            .entry(topic)
            .or_insert_with(|| Mailbox::new(self.mailbox_capacity))
            .sender
            .subscribe()
    }

    /// Messages retained for `identity`, oldest first.
    pub async fn delivered(&self, identity: &str) -> Vec<Arc<MulticastMessage>> {
        let topic = self.topic_for(identity);
        self.mailboxes
            .lock()
            .await
            .get(&topic)
            .map(|mailbox| mailbox.retained.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_subscribed(&self, identity: &str) -> bool {
        let topic = self.topic_for(identity);
        self.mailboxes.lock().await.contains_key(&topic)
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            Err(RegistryError::backend_unavailable(SINK_NAME, "messaging sink is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessagingSink for InMemoryMessagingSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn requires_subscription(&self) -> bool {
        self.require_subscription
    }

    async fn subscribe(&self, identity: &str) -> Result<(), RegistryError> {
        self.ensure_open()?;
        let topic = self.topic_for(identity);
        self.mailboxes
            .lock()
            .await
            .entry(topic)
            .or_insert_with(|| Mailbox::new(self.mailbox_capacity));
        Ok(())
    }

    async fn unsubscribe(&self, identity: &str) -> Result<(), RegistryError> {
        self.ensure_open()?;
        let topic = self.topic_for(identity);
        self.mailboxes.lock().await.remove(&topic);
        Ok(())
    }

    async fn deliver(
        &self,
        identity: &str,
        message: Arc<MulticastMessage>,
    ) -> Result<(), RegistryError> {
        self.ensure_open()?;
        let topic = self.topic_for(identity);
        let mut mailboxes = self.mailboxes.lock().await;

        if self.require_subscription && !mailboxes.contains_key(&topic) {
            return Err(RegistryError::backend_unavailable(
                SINK_NAME,
                format!("no subscription for topic '{topic}'"),
            ));
        }
        let mailbox = mailboxes
            .entry(topic)
            .or_insert_with(|| Mailbox::new(self.mailbox_capacity));

        if mailbox.retained.len() == self.mailbox_capacity {
            mailbox.retained.pop_front();
        }
        mailbox.retained.push_back(message.clone());
        // No live receivers is not a failure: the message is retained.
        let _ = mailbox.sender.send(message);
        Ok(())
    }

    async fn close(&self) -> Result<(), RegistryError> {
        self.closed.store(true, Ordering::Release);
        self.mailboxes.lock().await.clear();
        Ok(())
    }
}
