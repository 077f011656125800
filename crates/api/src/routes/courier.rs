//! Courier delivery-status webhook.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use store::SagaStore;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierStatusRequest {
    pub tracking_number: String,
    pub status: String,
    #[serde(default)]
    pub delivered_at: Option<String>,
}

#[derive(Serialize)]
pub struct CourierStatusResponse {
    pub received: bool,
    pub action: &'static str,
}

/// What a courier status means for the delivery.
fn action_for(status: &str) -> &'static str {
    match status.trim().to_ascii_uppercase().as_str() {
        "DELIVERED" => "completed",
        "IN_TRANSIT" | "PICKED_UP" | "SHIPPED" => "in_transit",
        _ => "ignored",
    }
}

/// POST /courier/webhook/delivery-completed
///
/// Acknowledged with 200 whatever the status, including unknown tracking
/// numbers. Only a failure to record a delivered status returns 500, so the
/// courier sends it again.
#[tracing::instrument(skip(state), fields(tracking_number = %req.tracking_number, status = %req.status))]
pub async fn delivery_status<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CourierStatusRequest>,
) -> Result<Json<CourierStatusResponse>, ApiError> {
    let action = action_for(&req.status);
    metrics::counter!("courier_webhooks_total", "action" => action).increment(1);

    let result = match action {
        "completed" => state
            .deliveries
            .complete_delivery(&req.tracking_number)
            .await
            .map(|_| ()),
        "in_transit" => state
            .deliveries
            .mark_in_transit(&req.tracking_number)
            .await
            .map(|_| ()),
        _ => {
            tracing::info!(delivered_at = ?req.delivered_at, "courier status acknowledged without change");
            Ok(())
        }
    };

    match result {
        Ok(()) => {}
        Err(e) if e.is_not_found() || e.is_conflict() => {
            tracing::warn!(error = %e, "courier webhook acknowledged without change");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Json(CourierStatusResponse {
        received: true,
        action,
    }))
}
