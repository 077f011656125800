use std::sync::Arc;

use chrono::Utc;
use common::OrderId;
use domain::{OrderItem, Transition};
use serde::Deserialize;
use store::SagaStore;

use crate::error::{Result, SagaError};
use crate::order_service::OrderService;
use crate::services::DigitalFulfillment;

use super::SignatureVerifier;

/// Gateway event types the handler acts on.
pub mod event_types {
    pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
    pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
    pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
    pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";
}

/// A gateway callback body.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: EventObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventObject {
    #[serde(default)]
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    pub order_id: Option<String>,
}

impl PaymentEvent {
    /// The order id carried in the callback metadata, if it parses.
    pub fn order_id(&self) -> Option<OrderId> {
        self.data
            .object
            .metadata
            .order_id
            .as_deref()
            .and_then(|id| OrderId::parse(id).ok())
    }
}

/// What the handler did with an authenticated callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A transition function ran.
    Processed {
        order_id: OrderId,
        action: &'static str,
        transition: Transition,
        /// Digital items unlocked by this callback.
        unlocked: usize,
    },
    /// Recognized but not acted on; logged and acknowledged.
    Absorbed { reason: String },
    /// Event type the handler does not act on.
    Ignored { event_type: String },
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed { .. } => "processed",
            WebhookOutcome::Absorbed { .. } => "absorbed",
            WebhookOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// Receives signed payment-gateway callbacks and drives order transitions.
///
/// Gateways redeliver, so every path is safe to run twice: the order state
/// machine absorbs the duplicate and nothing is written the second time.
pub struct PaymentWebhookHandler<S: SagaStore> {
    orders: Arc<OrderService<S>>,
    digital: Arc<dyn DigitalFulfillment>,
    verifier: SignatureVerifier,
}

impl<S: SagaStore> PaymentWebhookHandler<S> {
    pub fn new(
        orders: Arc<OrderService<S>>,
        digital: Arc<dyn DigitalFulfillment>,
        verifier: SignatureVerifier,
    ) -> Self {
        Self {
            orders,
            digital,
            verifier,
        }
    }

    /// Verifies and dispatches one callback.
    ///
    /// Returns `InvalidSignature` before touching any state when the signature
    /// does not check out. Conflicts and unknown orders are acknowledged;
    /// store failures are returned so the gateway redelivers.
    #[tracing::instrument(skip_all)]
    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> Result<WebhookOutcome> {
        let verified = signature
            .ok_or_else(|| SagaError::InvalidSignature("missing signature header".to_string()))
            .and_then(|header| self.verifier.verify(header, body, Utc::now()));
        if let Err(e) = verified {
            metrics::counter!("payment_webhooks_total", "outcome" => "rejected").increment(1);
            tracing::warn!(error = %e, "payment webhook rejected");
            return Err(e);
        }

        let event: PaymentEvent = serde_json::from_slice(body)
            .map_err(|e| SagaError::InvalidPayload(e.to_string()))?;

        let outcome = match self.dispatch(&event).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_conflict() || e.is_not_found() => {
                tracing::warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "payment webhook absorbed");
                WebhookOutcome::Absorbed {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                metrics::counter!("payment_webhooks_total", "outcome" => "error").increment(1);
                tracing::error!(event_id = %event.id, event_type = %event.event_type, error = %e, "payment webhook failed");
                return Err(e);
            }
        };

        metrics::counter!("payment_webhooks_total", "outcome" => outcome.label()).increment(1);
        tracing::info!(event_id = %event.id, event_type = %event.event_type, ?outcome, "payment webhook handled");
        Ok(outcome)
    }

    async fn dispatch(&self, event: &PaymentEvent) -> Result<WebhookOutcome> {
        let action = match event.event_type.as_str() {
            event_types::CHECKOUT_COMPLETED | event_types::PAYMENT_SUCCEEDED => "payment_succeeded",
            event_types::PAYMENT_FAILED => "payment_failed",
            event_types::CHECKOUT_EXPIRED => "checkout_expired",
            other => {
                return Ok(WebhookOutcome::Ignored {
                    event_type: other.to_string(),
                });
            }
        };

        let Some(order_id) = event.order_id() else {
            return Ok(WebhookOutcome::Absorbed {
                reason: "missing or invalid order id in metadata".to_string(),
            });
        };

        let (transition, unlocked) = match action {
            "payment_succeeded" => {
                let update = self.orders.confirm_payment(order_id).await?;
                let items: Vec<OrderItem> = update
                    .order
                    .digital_items_awaiting_unlock()
                    .into_iter()
                    .cloned()
                    .collect();
                let unlocked = self.unlock_digital(order_id, update.order.user_id(), &items).await;
                (update.transition, unlocked)
            }
            "payment_failed" => (self.orders.mark_failed(order_id).await?.transition, 0),
            _ => (self.orders.mark_cancelled(order_id).await?.transition, 0),
        };

        Ok(WebhookOutcome::Processed {
            order_id,
            action,
            transition,
            unlocked,
        })
    }

    /// Unlocks digital items still waiting in PAID. Failures are left for the
    /// gateway's redelivery, which finds the same items still waiting.
    async fn unlock_digital(
        &self,
        order_id: OrderId,
        user_id: common::UserId,
        items: &[OrderItem],
    ) -> usize {
        let mut unlocked = 0;
        for item in items {
            if let Err(e) = self.digital.unlock(user_id, item).await {
                tracing::warn!(%order_id, item_id = %item.id, error = %e, "digital unlock failed");
                continue;
            }
            match self.orders.unlock_digital_item(order_id, item.id).await {
                Ok(_) => unlocked += 1,
                Err(e) => {
                    tracing::warn!(%order_id, item_id = %item.id, error = %e, "failed to record digital unlock");
                }
            }
        }
        unlocked
    }
}
