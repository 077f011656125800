//! Order creation command.

use common::{OrderId, UserId};

use super::{CustomerContact, Money, PaymentMethod, ProductType};

/// A priced line of a new order.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_type: ProductType,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl NewOrderItem {
    pub fn new(
        product_type: ProductType,
        product_id: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_type,
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }
}

/// Command to create a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// The order ID to create.
    pub order_id: OrderId,

    /// The buyer placing the order.
    pub user_id: UserId,

    /// Shipping address; may be absent for all-digital orders.
    pub delivery_address: Option<String>,

    /// Contact handed to the courier.
    pub contact: Option<CustomerContact>,

    pub payment_method: PaymentMethod,

    pub items: Vec<NewOrderItem>,
}

impl CreateOrder {
    /// Creates a new CreateOrder command with a generated order ID.
    pub fn for_user(user_id: UserId, payment_method: PaymentMethod) -> Self {
        Self {
            order_id: OrderId::new(),
            user_id,
            delivery_address: None,
            contact: None,
            payment_method,
            items: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.delivery_address = Some(address.into());
        self
    }

    pub fn with_contact(mut self, contact: CustomerContact) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn with_item(mut self, item: NewOrderItem) -> Self {
        self.items.push(item);
        self
    }
}
