//! Saga message contracts.
//!
//! These are the payloads written to the outbox and relayed over the broker.
//! Every message is routed by its order id so that messages of one order are
//! consumed in the order they were written.

use chrono::{DateTime, Utc};
use common::{DeliveryId, ItemId, OrderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::CustomerContact;

/// Logical broker topics.
pub mod topics {
    /// Order side asks the delivery side to ship physical items.
    pub const DELIVERY_START: &str = "delivery.start";

    /// A courier accepted the shipment.
    pub const DELIVERY_REGISTERED: &str = "delivery.registered";

    /// The courier reported the shipment delivered.
    pub const DELIVERY_COMPLETED: &str = "delivery.completed";

    /// Suffix of the dead-letter topic for a given topic.
    pub const DEAD_LETTER_SUFFIX: &str = ".dlq";

    /// Returns the dead-letter topic for `topic`.
    pub fn dead_letter(topic: &str) -> String {
        format!("{topic}{DEAD_LETTER_SUFFIX}")
    }
}

/// Errors decoding a message from its topic and payload.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Unknown message topic: {0}")]
    UnknownTopic(String),

    #[error("Malformed {topic} payload: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Payload of `delivery.start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStartData {
    pub order_id: OrderId,
    /// Physical items to ship; digital items never appear here.
    pub item_ids: Vec<ItemId>,
    pub address: String,
    pub contact: CustomerContact,
    pub requested_at: DateTime<Utc>,
}

/// Payload of `delivery.registered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRegisteredData {
    pub order_id: OrderId,
    pub delivery_id: DeliveryId,
    pub tracking_number: String,
    pub courier_name: String,
    pub registered_at: DateTime<Utc>,
}

/// Payload of `delivery.completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCompletedData {
    pub order_id: OrderId,
    pub delivery_id: DeliveryId,
    pub item_ids: Vec<ItemId>,
    pub completed_at: DateTime<Utc>,
}

/// A message exchanged between the order side and the delivery side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaMessage {
    DeliveryStart(DeliveryStartData),
    DeliveryRegistered(DeliveryRegisteredData),
    DeliveryCompleted(DeliveryCompletedData),
}

impl SagaMessage {
    /// Returns the topic this message is published under.
    pub fn topic(&self) -> &'static str {
        match self {
            SagaMessage::DeliveryStart(_) => topics::DELIVERY_START,
            SagaMessage::DeliveryRegistered(_) => topics::DELIVERY_REGISTERED,
            SagaMessage::DeliveryCompleted(_) => topics::DELIVERY_COMPLETED,
        }
    }

    /// Returns the order the message belongs to; used as the routing key.
    pub fn order_id(&self) -> OrderId {
        match self {
            SagaMessage::DeliveryStart(data) => data.order_id,
            SagaMessage::DeliveryRegistered(data) => data.order_id,
            SagaMessage::DeliveryCompleted(data) => data.order_id,
        }
    }

    /// Serializes the payload (without the topic).
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            SagaMessage::DeliveryStart(data) => serde_json::to_value(data),
            SagaMessage::DeliveryRegistered(data) => serde_json::to_value(data),
            SagaMessage::DeliveryCompleted(data) => serde_json::to_value(data),
        }
    }

    /// Decodes a message from its topic and payload.
    pub fn decode(topic: &str, payload: &serde_json::Value) -> Result<Self, MessageError> {
        let malformed = |source| MessageError::Malformed {
            topic: topic.to_string(),
            source,
        };
        match topic {
            topics::DELIVERY_START => serde_json::from_value(payload.clone())
                .map(SagaMessage::DeliveryStart)
                .map_err(malformed),
            topics::DELIVERY_REGISTERED => serde_json::from_value(payload.clone())
                .map(SagaMessage::DeliveryRegistered)
                .map_err(malformed),
            topics::DELIVERY_COMPLETED => serde_json::from_value(payload.clone())
                .map(SagaMessage::DeliveryCompleted)
                .map_err(malformed),
            other => Err(MessageError::UnknownTopic(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_message() -> SagaMessage {
        SagaMessage::DeliveryStart(DeliveryStartData {
            order_id: OrderId::new(),
            item_ids: vec![ItemId::new()],
            address: "5 Oak Ave".to_string(),
            contact: CustomerContact::new("Ada", "+100000"),
            requested_at: Utc::now(),
        })
    }

    #[test]
    fn test_topics() {
        assert_eq!(start_message().topic(), "delivery.start");
        assert_eq!(topics::dead_letter("delivery.start"), "delivery.start.dlq");
    }

    #[test]
    fn test_decode_matches_topic() {
        let message = start_message();
        let decoded = SagaMessage::decode(message.topic(), &message.to_payload().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.order_id(), message.order_id());
    }

    #[test]
    fn test_decode_rejects_unknown_topic() {
        let result = SagaMessage::decode("order.exploded", &serde_json::json!({}));
        assert!(matches!(result, Err(MessageError::UnknownTopic(_))));
    }

    #[test]
    fn test_decode_rejects_payload_of_another_topic() {
        let message = start_message();
        let result = SagaMessage::decode(topics::DELIVERY_COMPLETED, &message.to_payload().unwrap());
        assert!(matches!(result, Err(MessageError::Malformed { .. })));
    }
}
