//! Order line items.

use common::{ItemId, OrderId};
use serde::{Deserialize, Serialize};

use crate::transition::Transition;

use super::{ItemStatus, Money, OrderError, ProductType};

/// A line item in an order, with its own fulfillment status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: ItemId,
    pub order_id: OrderId,
    pub product_type: ProductType,
    /// Reference into the product catalog.
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub status: ItemStatus,
}

impl OrderItem {
    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    pub fn is_physical(&self) -> bool {
        self.product_type.is_physical()
    }

    pub fn is_digital(&self) -> bool {
        self.product_type.is_digital()
    }

    /// Moves the item to `next`.
    ///
    /// Re-applying the current state is a no-op; any other move must be an
    /// allowed edge of the item state machine.
    pub(crate) fn transition_to(&mut self, next: ItemStatus) -> Result<Transition, OrderError> {
        if self.status == next {
            return Ok(Transition::Unchanged);
        }
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidItemTransition {
                item_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(Transition::Applied)
    }
}
