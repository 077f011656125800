//! Checkout and order lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::UserId;
use domain::{CustomerContact, Order, OrderItem, PaymentMethod};
use saga::{Checkout, CheckoutLine};
use serde::{Deserialize, Serialize};
use store::SagaStore;

use crate::AppState;
use crate::error::ApiError;

use super::parse_order_id;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Option<String>,
    pub delivery_address: Option<String>,
    pub contact: Option<CustomerContact>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub items: Vec<CheckoutLine>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub payment_method: String,
    pub delivery_address: Option<String>,
    pub tracking_number: Option<String>,
    pub total_cents: i64,
    pub items: Vec<OrderItemResponse>,
    pub created_at: String,
    pub version: i64,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub id: String,
    pub product_type: String,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub status: String,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            id: item.id.to_string(),
            product_type: item.product_type.to_string(),
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
            status: item.status.to_string(),
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            status: order.status().to_string(),
            payment_method: order.payment_method().to_string(),
            delivery_address: order.delivery_address().map(String::from),
            tracking_number: order.tracking_number().map(String::from),
            total_cents: order.total().cents(),
            items: order.items().iter().map(OrderItemResponse::from).collect(),
            created_at: order.created_at().to_rfc3339(),
            version: order.version().as_i64(),
        }
    }
}

// -- Handlers --

/// POST /orders: price, validate and store a new PENDING order.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id = match req.user_id.as_deref() {
        Some(id) => UserId::parse(id)
            .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?,
        None => UserId::new(),
    };

    let order = state
        .orders
        .create_order(Checkout {
            user_id,
            delivery_address: req.delivery_address,
            contact: req.contact,
            payment_method: req.payment_method,
            items: req.items,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}: the order with its items and tracking number.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}
