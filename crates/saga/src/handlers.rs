//! Message handlers on each side of the saga.

use std::sync::Arc;

use async_trait::async_trait;
use domain::SagaMessage;
use store::SagaStore;

use crate::consumer::MessageHandler;
use crate::delivery::DeliveryOrchestrator;
use crate::error::Result;
use crate::order_service::OrderService;

/// Delivery side: consumes `delivery.start`.
pub struct DeliveryStartHandler<S: SagaStore> {
    orchestrator: Arc<DeliveryOrchestrator<S>>,
}

impl<S: SagaStore> DeliveryStartHandler<S> {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator<S>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S: SagaStore + 'static> MessageHandler for DeliveryStartHandler<S> {
    fn name(&self) -> &'static str {
        "delivery-start"
    }

    async fn handle(&self, message: &SagaMessage) -> Result<()> {
        match message {
            SagaMessage::DeliveryStart(request) => {
                self.orchestrator.start_delivery(request).await?;
            }
            other => {
                tracing::debug!(topic = other.topic(), "not a delivery.start message, ignored");
            }
        }
        Ok(())
    }
}

/// Order side: consumes `delivery.registered` and `delivery.completed`.
pub struct OrderEventConsumer<S: SagaStore> {
    orders: Arc<OrderService<S>>,
}

impl<S: SagaStore> OrderEventConsumer<S> {
    pub fn new(orders: Arc<OrderService<S>>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl<S: SagaStore + 'static> MessageHandler for OrderEventConsumer<S> {
    fn name(&self) -> &'static str {
        "order-events"
    }

    async fn handle(&self, message: &SagaMessage) -> Result<()> {
        match message {
            SagaMessage::DeliveryRegistered(data) => {
                self.orders
                    .attach_tracking_number(data.order_id, &data.tracking_number)
                    .await?;
            }
            SagaMessage::DeliveryCompleted(data) => {
                let update = self
                    .orders
                    .apply_delivery_completed(data.order_id, &data.item_ids)
                    .await?;
                tracing::info!(
                    order_id = %data.order_id,
                    status = %update.order.status(),
                    "delivery completion applied"
                );
            }
            SagaMessage::DeliveryStart(_) => {
                tracing::debug!("delivery.start is not consumed on the order side");
            }
        }
        Ok(())
    }
}
