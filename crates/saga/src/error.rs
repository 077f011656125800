//! Saga error types.

use std::time::Duration;

use common::OrderId;
use domain::{DeliveryError, MessageError, OrderError, ProductType};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// No delivery matches the given reference (id, order or tracking number).
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(String),

    /// The catalog has no price for the product.
    #[error("Product not found: {product_type} {product_id}")]
    ProductNotFound {
        product_type: ProductType,
        product_id: String,
    },

    /// The courier rejected or failed the registration call.
    #[error("Courier error: {0}")]
    Courier(String),

    /// The courier registration call did not answer in time.
    #[error("Courier registration timed out after {0:?}")]
    CourierTimeout(Duration),

    /// The message broker refused a publish.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The digital-fulfillment collaborator failed to unlock an item.
    #[error("Digital fulfillment error: {0}")]
    DigitalFulfillment(String),

    /// Webhook signature missing, malformed, stale or wrong.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Authenticated webhook body that cannot be parsed.
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Order domain error.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Delivery domain error.
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Message decoding error.
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Illegal state transitions. Logged and absorbed, never retried.
    pub fn is_conflict(&self) -> bool {
        match self {
            SagaError::Order(e) => e.is_conflict(),
            SagaError::Delivery(e) => matches!(e, DeliveryError::InvalidTransition { .. }),
            _ => false,
        }
    }

    /// Failures that may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Store(e) => {
                matches!(e, StoreError::ConcurrencyConflict { .. } | StoreError::Database(_))
            }
            SagaError::Courier(_)
            | SagaError::CourierTimeout(_)
            | SagaError::Broker(_)
            | SagaError::DigitalFulfillment(_) => true,
            _ => false,
        }
    }

    /// Bad input from the caller.
    pub fn is_validation(&self) -> bool {
        match self {
            SagaError::Order(e) => e.is_validation(),
            SagaError::Delivery(DeliveryError::NoItems) => true,
            SagaError::InvalidPayload(_) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SagaError::OrderNotFound(_)
                | SagaError::DeliveryNotFound(_)
                | SagaError::ProductNotFound { .. }
                | SagaError::Order(OrderError::ItemNotFound { .. })
                | SagaError::Store(StoreError::NotFound { .. })
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
