//! Shared identifiers for the order fulfillment services.

mod types;
mod version;

pub use types::{DeliveryId, ItemId, OrderId, OutboxEventId, UserId};
pub use version::Version;
