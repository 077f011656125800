//! Simulated delivery completion.
//!
//! Each scheduled completion is its own task that sleeps for the configured
//! delay and then hands the tracking number to the completion worker. Pending
//! completions can be cancelled by tracking number.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use store::SagaStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::delivery::DeliveryOrchestrator;

/// Schedules simulated courier completions.
#[derive(Clone)]
pub struct CompletionScheduler {
    delay: Duration,
    tx: mpsc::UnboundedSender<String>,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl CompletionScheduler {
    /// Returns the scheduler and the receiver the completion worker drains.
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            delay,
            tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
        };
        (scheduler, rx)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules completion of `tracking_number` after the delay.
    ///
    /// Scheduling the same tracking number again replaces the earlier timer.
    pub fn schedule(&self, tracking_number: &str) {
        let mut pending = self.lock();

        let delay = self.delay;
        let tx = self.tx.clone();
        let registry = self.pending.clone();
        let key = tracking_number.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            if tx.send(key).is_err() {
                tracing::warn!("completion worker gone, dropping simulated completion");
            }
        });

        if let Some(previous) = pending.insert(tracking_number.to_string(), handle) {
            previous.abort();
        }
        tracing::debug!(%tracking_number, ?delay, "simulated completion scheduled");
    }

    /// Cancels a pending completion. Returns false if none was pending.
    pub fn cancel(&self, tracking_number: &str) -> bool {
        match self.lock().remove(tracking_number) {
            Some(handle) => {
                handle.abort();
                tracing::debug!(%tracking_number, "simulated completion cancelled");
                true
            }
            None => false,
        }
    }

    /// Number of completions still waiting on their timer.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Completes deliveries whose simulated timer fired, until shutdown.
pub async fn run_completion_worker<S: SagaStore + 'static>(
    orchestrator: Arc<DeliveryOrchestrator<S>>,
    mut completions: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("simulated completion worker started");
    loop {
        tokio::select! {
            next = completions.recv() => {
                let Some(tracking_number) = next else { break };
                if let Err(e) = orchestrator.complete_delivery(&tracking_number).await {
                    tracing::error!(%tracking_number, error = %e, "simulated completion failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!("simulated completion worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (scheduler, mut rx) = CompletionScheduler::new(Duration::from_secs(2));
        scheduler.schedule("TEST-AAAA0001");
        assert_eq!(scheduler.pending(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, "TEST-AAAA0001");
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_completion() {
        let (scheduler, mut rx) = CompletionScheduler::new(Duration::from_secs(2));
        scheduler.schedule("TEST-AAAA0002");
        scheduler.schedule("TEST-AAAA0003");

        assert!(scheduler.cancel("TEST-AAAA0002"));
        assert!(!scheduler.cancel("TEST-AAAA0002"));

        assert_eq!(rx.recv().await.unwrap(), "TEST-AAAA0003");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
