//! Order aggregate and related types.

mod aggregate;
mod commands;
mod item;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderParts};
pub use commands::{CreateOrder, NewOrderItem};
pub use item::OrderItem;
pub use state::{ItemStatus, OrderStatus};
pub use value_objects::{CustomerContact, Money, PaymentMethod, ProductType};

use common::ItemId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An order with a physical item needs somewhere to ship it.
    #[error("Delivery address is required for orders containing physical items")]
    MissingDeliveryAddress,

    /// Digital goods cannot be paid for in cash.
    #[error("Payment method {method} is not allowed for orders containing digital items")]
    InvalidPaymentMethod { method: PaymentMethod },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: i64 },

    /// Order is not in a state that allows the requested transition.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// Item is not in a state that allows the requested transition.
    #[error("Invalid item transition for {item_id}: {from} -> {to}")]
    InvalidItemTransition {
        item_id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// Item not found in order.
    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: ItemId },

    /// The operation only applies to physical or only to digital items.
    #[error("Item {item_id} is a {product_type} item and cannot be {action}")]
    WrongProductType {
        item_id: ItemId,
        product_type: ProductType,
        action: &'static str,
    },

    /// Delivery was requested for an order with nothing to ship.
    #[error("Order has no physical items to deliver")]
    NothingToDeliver,
}

impl OrderError {
    /// Returns true for validation failures raised at order creation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::MissingDeliveryAddress
                | OrderError::InvalidPaymentMethod { .. }
                | OrderError::NoItems
                | OrderError::InvalidQuantity { .. }
                | OrderError::InvalidPrice { .. }
        )
    }

    /// Returns true for illegal state transitions.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OrderError::InvalidTransition { .. }
                | OrderError::InvalidItemTransition { .. }
                | OrderError::WrongProductType { .. }
                | OrderError::NothingToDeliver
        )
    }
}
