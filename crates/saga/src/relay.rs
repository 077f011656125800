//! Outbox relay.
//!
//! Publishes unprocessed outbox rows to the broker and marks them processed.
//! A publish that fails leaves the row for the next tick, so delivery is at
//! least once and consumers must tolerate duplicates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::OrderId;
use store::SagaStore;
use tokio::sync::watch;

use crate::broker::{BrokerMessage, MessageBroker};
use crate::error::Result;

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Delay between ticks when the broker is healthy.
    pub interval: Duration,
    /// Rows fetched per tick.
    pub batch_size: usize,
    /// Decode failures after which a row is treated as poisoned.
    pub max_attempts: i32,
    /// Upper bound on the delay while the broker keeps failing.
    pub max_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
            max_attempts: 10,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    /// Rows whose payload could not be decoded this tick.
    pub malformed: usize,
    /// Malformed rows that reached the attempt limit this tick.
    pub poisoned: usize,
    /// Rows held back because an earlier row of the same order failed.
    pub skipped: usize,
    /// Whether the tick stopped on a broker failure.
    pub broker_failure: bool,
}

/// Periodic outbox-to-broker publisher.
pub struct OutboxRelay<S: SagaStore> {
    store: Arc<S>,
    broker: Arc<dyn MessageBroker>,
    config: RelayConfig,
}

impl<S: SagaStore> OutboxRelay<S> {
    pub fn new(store: Arc<S>, broker: Arc<dyn MessageBroker>, config: RelayConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Publishes one batch of unprocessed rows in write order.
    pub async fn run_once(&self) -> Result<RelayReport> {
        let events = self
            .store
            .fetch_unprocessed(self.config.batch_size, self.config.max_attempts)
            .await?;

        let mut report = RelayReport::default();
        let mut blocked: HashSet<OrderId> = HashSet::new();

        for event in events {
            if blocked.contains(&event.order_id) {
                report.skipped += 1;
                continue;
            }

            if let Err(e) = event.decode() {
                let attempts = self.store.record_failure(event.id, &e.to_string()).await?;
                report.malformed += 1;
                blocked.insert(event.order_id);

                if attempts >= self.config.max_attempts {
                    report.poisoned += 1;
                    metrics::counter!("outbox_poisoned_total").increment(1);
                    tracing::error!(
                        event_id = %event.id,
                        order_id = %event.order_id,
                        event_type = %event.event_type,
                        attempts,
                        error = %e,
                        "outbox event poisoned, giving up"
                    );
                } else {
                    tracing::warn!(
                        event_id = %event.id,
                        order_id = %event.order_id,
                        attempts,
                        error = %e,
                        "malformed outbox payload"
                    );
                }
                continue;
            }

            let message = BrokerMessage::new(
                event.event_type.clone(),
                event.order_id.to_string(),
                event.payload.clone(),
            );
            if let Err(e) = self.broker.publish(message).await {
                metrics::counter!("outbox_publish_failures_total").increment(1);
                tracing::warn!(event_id = %event.id, error = %e, "publish failed, will retry");
                report.broker_failure = true;
                break;
            }

            self.store.mark_processed(event.id, Utc::now()).await?;
            metrics::counter!("outbox_events_published_total").increment(1);
            tracing::debug!(
                event_id = %event.id,
                order_id = %event.order_id,
                event_type = %event.event_type,
                "outbox event published"
            );
            report.published += 1;
        }

        Ok(report)
    }

    /// Runs ticks until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.config.interval, "outbox relay started");
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let healthy = match self.run_once().await {
                Ok(report) => {
                    if report.published > 0 || report.malformed > 0 {
                        tracing::info!(?report, "outbox relay tick");
                    }
                    !report.broker_failure
                }
                Err(e) => {
                    tracing::error!(error = %e, "outbox relay tick failed");
                    false
                }
            };

            failures = if healthy { 0 } else { failures.saturating_add(1) };
            let delay = self.delay_after(failures);

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox relay stopped");
    }

    /// `interval * 2^failures`, capped at `max_backoff`.
    fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.config.interval;
        }
        let factor = 2u32.saturating_pow(failures.min(16));
        self.config
            .interval
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ItemId, OutboxEventId};
    use domain::{CustomerContact, DeliveryStartData, SagaMessage};
    use store::{InMemoryStore, OutboxEvent};

    use crate::broker::InMemoryBroker;

    fn start_event(order_id: OrderId) -> OutboxEvent {
        let message = SagaMessage::DeliveryStart(DeliveryStartData {
            order_id,
            item_ids: vec![ItemId::new()],
            address: "12 Main St".to_string(),
            contact: CustomerContact::new("Ada", "+100000"),
            requested_at: Utc::now(),
        });
        OutboxEvent::from_message(&message, Utc::now()).unwrap()
    }

    fn garbage_event(order_id: OrderId) -> OutboxEvent {
        OutboxEvent {
            id: OutboxEventId::new(),
            payload: serde_json::json!({"garbage": true}),
            ..start_event(order_id)
        }
    }

    fn relay(store: &Arc<InMemoryStore>, broker: &InMemoryBroker) -> OutboxRelay<InMemoryStore> {
        let config = RelayConfig {
            max_attempts: 2,
            ..RelayConfig::default()
        };
        OutboxRelay::new(store.clone(), Arc::new(broker.clone()), config)
    }

    #[tokio::test]
    async fn test_publishes_with_order_key_and_marks_processed() {
        let store = Arc::new(InMemoryStore::new());
        let broker = InMemoryBroker::recording();
        let order_id = OrderId::new();
        store.push_outbox_event(start_event(order_id)).await;

        let report = relay(&store, &broker).run_once().await.unwrap();
        assert_eq!(report.published, 1);

        let published = broker.published();
        assert_eq!(published[0].key, order_id.to_string());
        assert_eq!(published[0].topic, "delivery.start");
        assert!(store.outbox_events().await[0].processed);

        let again = relay(&store, &broker).run_once().await.unwrap();
        assert_eq!(again.published, 0);
    }

    #[tokio::test]
    async fn test_broker_outage_leaves_rows_unprocessed() {
        let store = Arc::new(InMemoryStore::new());
        let broker = InMemoryBroker::recording();
        store.push_outbox_event(start_event(OrderId::new())).await;
        store.push_outbox_event(start_event(OrderId::new())).await;

        broker.set_unavailable(true);
        let report = relay(&store, &broker).run_once().await.unwrap();
        assert!(report.broker_failure);
        assert_eq!(report.published, 0);
        assert!(store.outbox_events().await.iter().all(|e| !e.processed));

        broker.set_unavailable(false);
        let report = relay(&store, &broker).run_once().await.unwrap();
        assert_eq!(report.published, 2);
    }

    #[tokio::test]
    async fn test_malformed_row_blocks_its_order_until_poisoned() {
        let store = Arc::new(InMemoryStore::new());
        let broker = InMemoryBroker::recording();
        let stuck = OrderId::new();
        let other = OrderId::new();
        store.push_outbox_event(garbage_event(stuck)).await;
        store.push_outbox_event(start_event(stuck)).await;
        store.push_outbox_event(start_event(other)).await;
        let relay = relay(&store, &broker);

        let first = relay.run_once().await.unwrap();
        assert_eq!(first.malformed, 1);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.published, 1);
        assert_eq!(first.poisoned, 0);

        let second = relay.run_once().await.unwrap();
        assert_eq!(second.poisoned, 1);
        assert_eq!(second.published, 0);

        // The poisoned row is no longer fetched, so the order moves on.
        let third = relay.run_once().await.unwrap();
        assert_eq!(third.published, 1);
        assert_eq!(broker.published_to("delivery.start").len(), 2);

        let events = store.outbox_events().await;
        assert!(!events[0].processed);
        assert_eq!(events[0].attempts, 2);
        assert!(events[0].last_error.is_some());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let relay = OutboxRelay::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryBroker::recording()),
            RelayConfig::default(),
        );
        assert_eq!(relay.delay_after(0), Duration::from_secs(5));
        assert_eq!(relay.delay_after(1), Duration::from_secs(10));
        assert_eq!(relay.delay_after(2), Duration::from_secs(20));
        assert_eq!(relay.delay_after(10), Duration::from_secs(60));
    }
}
