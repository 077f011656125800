//! Message broker abstraction.
//!
//! The relay publishes outbox rows here and the consumers subscribe by topic.
//! Messages carry the order id as routing key; a single subscriber per topic
//! receives messages in publish order, which keeps per-order ordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SagaError;

/// A message as it travels over the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    /// Routing key; always the order id.
    pub key: String,
    pub payload: serde_json::Value,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }
}

/// Trait for publishing to the broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: BrokerMessage) -> Result<(), SagaError>;
}

#[derive(Default)]
struct BrokerState {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<BrokerMessage>>>,
    /// Kept only by a recording broker.
    published: Option<Vec<BrokerMessage>>,
    unavailable: bool,
}

/// In-process broker backed by unbounded channels.
///
/// A broker built with [`InMemoryBroker::recording`] keeps a history of
/// everything published so tests can assert on it; the one the process runs
/// on keeps nothing. Either can be switched to unavailable to exercise the
/// relay's retry path.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that remembers every published message.
    pub fn recording() -> Self {
        let broker = Self::default();
        broker.lock().published = Some(Vec::new());
        broker
    }

    /// Subscribes one receiver to every topic in `topics`.
    pub fn subscribe(&self, topics: &[&str]) -> mpsc::UnboundedReceiver<BrokerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for topic in topics {
            state
                .subscribers
                .entry((*topic).to_string())
                .or_default()
                .push(tx.clone());
        }
        rx
    }

    /// Makes every publish fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Everything published so far, in order. Empty unless recording.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.lock().published.clone().unwrap_or_default()
    }

    pub fn published_to(&self, topic: &str) -> Vec<BrokerMessage> {
        self.lock()
            .published
            .iter()
            .flatten()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<(), SagaError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(SagaError::Broker("broker unavailable".to_string()));
        }

        if let Some(subscribers) = state.subscribers.get_mut(&message.topic) {
            // Dropped receivers are pruned.
            subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        }
        tracing::debug!(topic = %message.topic, key = %message.key, "message published");
        if let Some(published) = state.published.as_mut() {
            published.push(message);
        }
        Ok(())
    }
}
