//! Owned periodic background tasks with an explicit stop handle.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::observability::events;

const COMPONENT: &str = "background_task";

/// Handle to a running periodic task. Dropping it leaves the task running until the
/// runtime shuts down; call [`BackgroundTaskHandle::stop`] to end it.
#[derive(Debug)]
pub struct BackgroundTaskHandle {
    name: &'static str,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BackgroundTaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signals the loop and waits for the in-flight tick to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(
                event = events::BACKGROUND_TASK_JOIN_FAILED,
                component = COMPONENT,
                task = self.name,
                err = %err,
                "background task ended abnormally"
            );
        }
    }
}

/// Spawns a loop that runs `tick` every `interval` until stopped. The first tick
/// runs one full interval after start.
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut tick: F,
) -> BackgroundTaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            event = events::BACKGROUND_TASK_START,
            component = COMPONENT,
            task = name,
            interval_ms = interval.as_millis() as u64,
            "background task started"
        );

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => tick().await,
            }
        }

        info!(
            event = events::BACKGROUND_TASK_STOP,
            component = COMPONENT,
            task = name,
            "background task stopped"
        );
    });

    BackgroundTaskHandle {
        name,
        stop: Some(stop_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::spawn_periodic;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let handle = spawn_periodic("test", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(handle.is_running());
        handle.stop().await;

        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 3);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
