//! Payment gateway webhook.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use saga::{SIGNATURE_HEADER, WebhookOutcome};
use serde::Serialize;
use store::SagaStore;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
}

/// POST /payment/webhook
///
/// 400 on a missing or bad signature, 500 when nothing could be recorded so
/// the gateway retries, 200 for everything else.
#[tracing::instrument(skip_all)]
pub async fn receive<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.payment_webhook.handle(signature, &body).await?;
    let outcome = match outcome {
        WebhookOutcome::Processed { .. } => "processed",
        WebhookOutcome::Absorbed { .. } => "absorbed",
        WebhookOutcome::Ignored { .. } => "ignored",
    };

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}
