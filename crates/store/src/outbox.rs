use chrono::{DateTime, Utc};
use common::{OrderId, OutboxEventId};
use domain::{MessageError, SagaMessage};
use serde::{Deserialize, Serialize};

/// A notification written in the same transaction as the mutation it describes.
///
/// The relay publishes unprocessed rows to the broker under `order_id` and then
/// flips `processed`. `attempts` only counts payloads that failed to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub order_id: OrderId,
    /// Broker topic, e.g. `delivery.start`.
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Builds an unprocessed outbox row for `message`.
    pub fn from_message(message: &SagaMessage, now: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            id: OutboxEventId::new(),
            order_id: message.order_id(),
            event_type: message.topic().to_string(),
            payload: message.to_payload()?,
            processed: false,
            attempts: 0,
            last_error: None,
            created_at: now,
            processed_at: None,
        })
    }

    /// Decodes the stored payload back into a message.
    pub fn decode(&self) -> Result<SagaMessage, MessageError> {
        SagaMessage::decode(&self.event_type, &self.payload)
    }
}
