//! In-process [`DurabilitySink`] with leased dequeue.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DurabilitySink, MulticastMessage, PendingDelivery};
use crate::clock::{to_chrono, Clock};
use crate::error::RegistryError;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);
const SINK_NAME: &str = "memory";

struct Lease {
    entry: PendingDelivery,
    until: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<PendingDelivery>,
    leased: HashMap<Uuid, Lease>,
}

impl QueueState {
    // Expired leases go back to the front so they are retried first.
    fn reclaim_expired(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let lapsed: Vec<Uuid> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.until <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in lapsed {
            if let Some(lease) = self.leased.remove(&id) {
                self.ready.push_front(lease.entry);
            }
        }
    }
}

/// FIFO retry queue held in memory. Not transactional.
pub struct InMemoryDurabilitySink {
    clock: Arc<dyn Clock>,
    lease: Duration,
    state: Mutex<QueueState>,
    closed: AtomicBool,
}

impl InMemoryDurabilitySink {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_lease(clock, DEFAULT_LEASE)
    }

    pub fn with_lease(clock: Arc<dyn Clock>, lease: Duration) -> Self {
        Self {
            clock,
            lease,
            state: Mutex::new(QueueState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Snapshot of entries not currently leased.
    pub async fn ready_entries(&self) -> Vec<PendingDelivery> {
        self.state.lock().await.ready.iter().cloned().collect()
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            Err(RegistryError::backend_unavailable(SINK_NAME, "durability sink is closed"))
        } else {
            Ok(())
        }
    }

    fn lease_until(&self) -> chrono::DateTime<chrono::Utc> {
        let now = self.clock.now();
        now.checked_add_signed(to_chrono(self.lease)).unwrap_or(now)
    }
}

#[async_trait]
impl DurabilitySink for InMemoryDurabilitySink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn enqueue(
        &self,
        identity: &str,
        message: Arc<MulticastMessage>,
        leased: bool,
    ) -> Result<Uuid, RegistryError> {
        self.ensure_open()?;
        let entry = PendingDelivery {
            entry_id: Uuid::new_v4(),
            identity: identity.to_string(),
            message,
            attempts: 0,
            enqueued_at: self.clock.now(),
        };
        let entry_id = entry.entry_id;

        let mut state = self.state.lock().await;
        if leased {
            let until = self.lease_until();
            state.leased.insert(entry_id, Lease { entry, until });
        } else {
            state.ready.push_back(entry);
        }
        Ok(entry_id)
    }

    async fn dequeue(&self, limit: usize) -> Result<Vec<PendingDelivery>, RegistryError> {
        self.ensure_open()?;
        let until = self.lease_until();
        let mut state = self.state.lock().await;
        state.reclaim_expired(self.clock.now());

        let take = limit.min(state.ready.len());
        let batch: Vec<PendingDelivery> = state.ready.drain(..take).collect();
        for entry in &batch {
            state.leased.insert(
                entry.entry_id,
                Lease {
                    entry: entry.clone(),
                    until,
                },
            );
        }
        Ok(batch)
    }

    async fn acknowledge(&self, entry_id: Uuid) -> Result<bool, RegistryError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.leased.remove(&entry_id).is_some() {
            return Ok(true);
        }
        let before = state.ready.len();
        state.ready.retain(|entry| entry.entry_id != entry_id);
        Ok(state.ready.len() != before)
    }

    async fn requeue(&self, entry_id: Uuid) -> Result<bool, RegistryError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        match state.leased.remove(&entry_id) {
            Some(Lease { mut entry, .. }) => {
                entry.attempts += 1;
                state.ready.push_back(entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_count(&self) -> Result<usize, RegistryError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok(state.ready.len() + state.leased.len())
    }

    async fn close(&self) -> Result<(), RegistryError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
