//! Internal order-mutation endpoints for the co-located orchestration layer.
//!
//! Not meant for the public internet. Every endpoint returns the order after
//! the transition and whether anything changed; illegal transitions are 409.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use saga::OrderUpdate;
use serde::{Deserialize, Serialize};
use store::SagaStore;

use crate::AppState;
use crate::error::ApiError;

use super::orders::OrderResponse;
use super::{parse_item_id, parse_order_id};

#[derive(Serialize)]
pub struct OrderUpdateResponse {
    pub order: OrderResponse,
    pub changed: bool,
}

impl From<OrderUpdate> for OrderUpdateResponse {
    fn from(update: OrderUpdate) -> Self {
        Self {
            order: OrderResponse::from(&update.order),
            changed: update.transition.is_applied(),
        }
    }
}

#[derive(Deserialize)]
pub struct ItemsRequest {
    pub item_ids: Vec<String>,
}

type UpdateResult = Result<Json<OrderUpdateResponse>, ApiError>;

/// POST /internal/orders/{id}/mark-paid
#[tracing::instrument(skip(state))]
pub async fn mark_paid<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> UpdateResult {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.mark_paid(order_id).await?.into()))
}

/// POST /internal/orders/{id}/mark-failed
#[tracing::instrument(skip(state))]
pub async fn mark_failed<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> UpdateResult {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.mark_failed(order_id).await?.into()))
}

/// POST /internal/orders/{id}/mark-cancelled
#[tracing::instrument(skip(state))]
pub async fn mark_cancelled<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> UpdateResult {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.mark_cancelled(order_id).await?.into()))
}

/// POST /internal/orders/{id}/items/{item_id}/mark-shipped
#[tracing::instrument(skip(state))]
pub async fn mark_item_shipped<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, item_id)): Path<(String, String)>,
) -> UpdateResult {
    let order_id = parse_order_id(&id)?;
    let item_id = parse_item_id(&item_id)?;
    Ok(Json(
        state.orders.mark_item_shipped(order_id, item_id).await?.into(),
    ))
}

/// POST /internal/orders/{id}/items/{item_id}/mark-delivered
#[tracing::instrument(skip(state))]
pub async fn mark_item_delivered<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, item_id)): Path<(String, String)>,
) -> UpdateResult {
    let order_id = parse_order_id(&id)?;
    let item_id = parse_item_id(&item_id)?;
    Ok(Json(
        state
            .orders
            .mark_item_delivered(order_id, item_id)
            .await?
            .into(),
    ))
}

/// POST /internal/orders/{id}/mark-items-delivered
#[tracing::instrument(skip(state, req))]
pub async fn mark_items_delivered<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ItemsRequest>,
) -> UpdateResult {
    let order_id = parse_order_id(&id)?;
    let item_ids = req
        .item_ids
        .iter()
        .map(|item_id| parse_item_id(item_id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(
        state
            .orders
            .mark_items_delivered(order_id, &item_ids)
            .await?
            .into(),
    ))
}

/// POST /internal/orders/{id}/start-delivery
///
/// Writes `delivery.start` for cash-on-delivery orders, or to retry a
/// delivery whose courier registration failed.
#[tracing::instrument(skip(state))]
pub async fn start_delivery<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> UpdateResult {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.request_delivery(order_id).await?.into()))
}
