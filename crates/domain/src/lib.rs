//! Domain layer for the order fulfillment saga.
//!
//! This crate holds the pure, I/O-free parts of the system:
//! - Order aggregate with its item-level state machine
//! - Delivery aggregate with the courier lifecycle
//! - Message contracts exchanged over the broker
//!
//! Every transition returns a [`Transition`] so callers can tell a real state
//! change from an idempotent re-application.

pub mod delivery;
pub mod messages;
pub mod order;
mod transition;

pub use delivery::{Delivery, DeliveryError, DeliveryParts, DeliveryStatus};
pub use messages::{
    DeliveryCompletedData, DeliveryRegisteredData, DeliveryStartData, MessageError, SagaMessage,
    topics,
};
pub use order::{
    CreateOrder, CustomerContact, ItemStatus, Money, NewOrderItem, Order, OrderError, OrderItem,
    OrderParts, OrderStatus, PaymentMethod, ProductType,
};
pub use transition::Transition;
