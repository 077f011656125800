//! HTTP route handlers.

pub mod courier;
pub mod health;
pub mod internal;
pub mod metrics;
pub mod orders;
pub mod payment;

use common::{ItemId, OrderId};

use crate::error::ApiError;

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}

pub(crate) fn parse_item_id(id: &str) -> Result<ItemId, ApiError> {
    ItemId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid item ID: {e}")))
}
