//! Delivery aggregate: one courier shipment of an order's physical items.

mod aggregate;
mod state;

pub use aggregate::{Delivery, DeliveryParts};
pub use state::DeliveryStatus;

use common::DeliveryId;
use thiserror::Error;

/// Errors that can occur during delivery operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Delivery is not in a state that allows the requested transition.
    #[error("Invalid delivery transition for {delivery_id}: cannot {action} from {current_state}")]
    InvalidTransition {
        delivery_id: DeliveryId,
        current_state: DeliveryStatus,
        action: &'static str,
    },

    /// A delivery must ship at least one item.
    #[error("Delivery has no items")]
    NoItems,
}
