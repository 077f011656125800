//! Broker consumers with retry, backoff and dead-lettering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{SagaMessage, topics};
use serde_json::json;
use tokio::sync::{mpsc, watch};

use crate::broker::{BrokerMessage, MessageBroker};
use crate::error::Result;

/// Trait for handling decoded saga messages.
///
/// Messages arrive at least once, so handlers must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &SagaMessage) -> Result<()>;
}

/// Retry policy for one subscription.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Handling attempts before the message is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// How a message left the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Handled { attempts: u32 },
    /// Conflict; logged and acknowledged without retrying.
    Skipped { reason: String },
    /// Republished to `<topic>.dlq`.
    DeadLettered { attempts: u32, error: String },
}

/// Drives one subscription through a handler.
///
/// Messages are handled one at a time in arrival order, which keeps the
/// per-order ordering the broker provides.
pub struct ConsumerRunner {
    handler: Arc<dyn MessageHandler>,
    broker: Arc<dyn MessageBroker>,
    config: ConsumerConfig,
}

impl ConsumerRunner {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        broker: Arc<dyn MessageBroker>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            handler,
            broker,
            config,
        }
    }

    /// Handles one message, retrying with backoff.
    pub async fn process(&self, message: &BrokerMessage) -> ConsumeOutcome {
        let decoded = match SagaMessage::decode(&message.topic, &message.payload) {
            Ok(decoded) => decoded,
            Err(e) => return self.dead_letter(message, &e.to_string(), 0).await,
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handler.handle(&decoded).await {
                Ok(()) => return ConsumeOutcome::Handled { attempts: attempt },
                Err(e) if e.is_conflict() => {
                    tracing::warn!(
                        consumer = self.handler.name(),
                        topic = %message.topic,
                        key = %message.key,
                        error = %e,
                        "conflicting transition, message acknowledged"
                    );
                    return ConsumeOutcome::Skipped {
                        reason: e.to_string(),
                    };
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    metrics::counter!("consumer_retries_total", "topic" => message.topic.clone())
                        .increment(1);
                    tracing::warn!(
                        consumer = self.handler.name(),
                        topic = %message.topic,
                        key = %message.key,
                        attempt,
                        ?delay,
                        error = %e,
                        "message handling failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return self.dead_letter(message, &e.to_string(), attempt).await,
            }
        }
    }

    /// Consumes `messages` until the channel closes or shutdown is signalled.
    ///
    /// On shutdown, messages already queued are handled before returning. The
    /// relay has marked them processed, so dropping them would lose them.
    pub async fn run(
        self,
        mut messages: mpsc::UnboundedReceiver<BrokerMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(consumer = self.handler.name(), "consumer started");
        loop {
            tokio::select! {
                next = messages.recv() => {
                    let Some(message) = next else { break };
                    self.consume(&message).await;
                }
                _ = shutdown.changed() => {
                    self.drain(&mut messages).await;
                    break;
                }
            }
        }
        tracing::info!(consumer = self.handler.name(), "consumer stopped");
    }

    async fn drain(&self, messages: &mut mpsc::UnboundedReceiver<BrokerMessage>) {
        let mut drained = 0usize;
        while let Ok(message) = messages.try_recv() {
            self.consume(&message).await;
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(consumer = self.handler.name(), drained, "queued messages handled before shutdown");
        }
    }

    async fn consume(&self, message: &BrokerMessage) {
        let outcome = self.process(message).await;
        tracing::debug!(consumer = self.handler.name(), topic = %message.topic, ?outcome, "message consumed");
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.config
            .base_backoff
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }

    async fn dead_letter(&self, message: &BrokerMessage, error: &str, attempts: u32) -> ConsumeOutcome {
        let topic = topics::dead_letter(&message.topic);
        let payload = json!({
            "original": {
                "topic": message.topic,
                "key": message.key,
                "payload": message.payload,
            },
            "error": error,
            "attempts": attempts,
        });

        metrics::counter!("consumer_dead_lettered_total", "topic" => message.topic.clone())
            .increment(1);
        tracing::error!(
            consumer = self.handler.name(),
            topic = %message.topic,
            key = %message.key,
            attempts,
            error,
            "message dead-lettered"
        );

        let dead = BrokerMessage::new(topic, message.key.clone(), payload);
        if let Err(e) = self.broker.publish(dead).await {
            tracing::error!(topic = %message.topic, key = %message.key, error = %e, "dead-letter publish failed");
        }

        ConsumeOutcome::DeadLettered {
            attempts,
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;
    use common::{DeliveryId, OrderId};
    use domain::{DeliveryRegisteredData, OrderError, OrderStatus};

    use crate::broker::InMemoryBroker;
    use crate::error::SagaError;

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        conflict: bool,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                conflict: false,
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _message: &SagaMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.conflict {
                return Err(SagaError::Order(OrderError::InvalidTransition {
                    current_state: OrderStatus::Cancelled,
                    action: "mark paid",
                }));
            }
            if call <= self.failures {
                return Err(SagaError::Broker("downstream unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn registered() -> BrokerMessage {
        let message = SagaMessage::DeliveryRegistered(DeliveryRegisteredData {
            order_id: OrderId::new(),
            delivery_id: DeliveryId::new(),
            tracking_number: "TEST-AB12CD34".to_string(),
            courier_name: "simulated".to_string(),
            registered_at: Utc::now(),
        });
        BrokerMessage::new(
            message.topic(),
            message.order_id().to_string(),
            message.to_payload().unwrap(),
        )
    }

    fn runner(handler: Arc<Flaky>, broker: &InMemoryBroker) -> ConsumerRunner {
        ConsumerRunner::new(handler, Arc::new(broker.clone()), ConsumerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let broker = InMemoryBroker::recording();
        let handler = Arc::new(Flaky::new(2));

        let outcome = runner(handler.clone(), &broker).process(&registered()).await;
        assert_eq!(outcome, ConsumeOutcome::Handled { attempts: 3 });
        assert!(broker.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letters_after_max_attempts() {
        let broker = InMemoryBroker::recording();
        let handler = Arc::new(Flaky::new(u32::MAX));
        let message = registered();

        let outcome = runner(handler.clone(), &broker).process(&message).await;
        assert!(matches!(outcome, ConsumeOutcome::DeadLettered { attempts: 5, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);

        let dead = broker.published_to("delivery.registered.dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key, message.key);
        assert_eq!(dead[0].payload["attempts"], 5);
        assert_eq!(dead[0].payload["original"]["payload"], message.payload);
    }

    #[tokio::test]
    async fn test_conflict_is_not_retried() {
        let broker = InMemoryBroker::recording();
        let handler = Arc::new(Flaky {
            conflict: true,
            ..Flaky::new(0)
        });

        let outcome = runner(handler.clone(), &broker).process(&registered()).await;
        assert!(matches!(outcome, ConsumeOutcome::Skipped { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_message_goes_straight_to_dlq() {
        let broker = InMemoryBroker::recording();
        let handler = Arc::new(Flaky::new(0));
        let message = BrokerMessage::new("delivery.completed", "k", json!({"nope": 1}));

        let outcome = runner(handler.clone(), &broker).process(&message).await;
        assert!(matches!(outcome, ConsumeOutcome::DeadLettered { attempts: 0, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.published_to("delivery.completed.dlq").len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_handles_queued_messages_first() {
        let broker = InMemoryBroker::recording();
        let handler = Arc::new(Flaky::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..3 {
            tx.send(registered()).unwrap();
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        runner(handler.clone(), &broker).run(rx, shutdown_rx).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_curve() {
        let runner = runner(Arc::new(Flaky::new(0)), &InMemoryBroker::recording());
        assert_eq!(runner.backoff(1), Duration::from_millis(200));
        assert_eq!(runner.backoff(2), Duration::from_millis(400));
        assert_eq!(runner.backoff(4), Duration::from_millis(1600));
        assert_eq!(runner.backoff(20), Duration::from_secs(10));
    }
}
