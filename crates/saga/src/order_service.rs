//! Order-side transition functions over the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId, UserId};
use domain::{
    CreateOrder, CustomerContact, DeliveryStatus, NewOrderItem, Order, OrderError, OrderStatus,
    PaymentMethod, ProductType, SagaMessage, Transition, topics,
};
use serde::Deserialize;
use store::{OutboxEvent, SagaStore};

use crate::error::{Result, SagaError};
use crate::services::PriceCatalog;

/// Saves that lose an optimistic-concurrency race are retried this many times.
const MAX_CONFLICT_RETRIES: usize = 3;

/// One requested line of a checkout, before pricing.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutLine {
    pub product_type: ProductType,
    pub product_id: String,
    pub quantity: u32,
}

/// A checkout as submitted by the buyer.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkout {
    pub user_id: UserId,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub contact: Option<CustomerContact>,
    pub payment_method: PaymentMethod,
    pub items: Vec<CheckoutLine>,
}

/// Result of a transition function.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    /// The order after the transition (as stored).
    pub order: Order,

    /// Whether anything was written.
    pub transition: Transition,
}

/// Service for order transitions.
///
/// Each operation loads the order, applies a domain transition, and saves the
/// order together with any outbox rows in one store call. Re-applying an
/// operation whose target state was already reached writes nothing.
pub struct OrderService<S: SagaStore> {
    store: Arc<S>,
    catalog: Arc<dyn PriceCatalog>,
}

impl<S: SagaStore> OrderService<S> {
    /// Creates a new order service.
    pub fn new(store: Arc<S>, catalog: Arc<dyn PriceCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Gets an order by ID.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get_order(order_id).await?)
    }

    /// Prices a checkout, validates it and stores the new PENDING order.
    #[tracing::instrument(skip(self, checkout), fields(user_id = %checkout.user_id))]
    pub async fn create_order(&self, checkout: Checkout) -> Result<Order> {
        let mut cmd = CreateOrder::for_user(checkout.user_id, checkout.payment_method);
        cmd.delivery_address = checkout.delivery_address;
        cmd.contact = checkout.contact;

        for line in checkout.items {
            let unit_price = self
                .catalog
                .unit_price(line.product_type, &line.product_id)
                .await?;
            cmd.items.push(NewOrderItem::new(
                line.product_type,
                line.product_id,
                line.quantity,
                unit_price,
            ));
        }

        let mut order = Order::create(cmd, Utc::now())?;
        let version = self.store.insert_order(&order).await?;
        order.set_version(version);

        tracing::info!(order_id = %order.id(), total = %order.total(), "order created");
        metrics::counter!("order_transitions_total", "transition" => "create").increment(1);
        Ok(order)
    }

    /// PENDING -> PAID. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(&self, order_id: OrderId) -> Result<OrderUpdate> {
        self.mutate(order_id, "mark_paid", |order, now| {
            Ok((order.mark_paid(now)?, Vec::new()))
        })
        .await
    }

    /// Records a gateway payment.
    ///
    /// Marks the order PAID and, when it has physical items, writes the
    /// `delivery.start` row in the same save. A repeated confirmation finds the
    /// order already paid and writes nothing, so at most one row is created.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, order_id: OrderId) -> Result<OrderUpdate> {
        self.mutate(order_id, "confirm_payment", |order, now| {
            let transition = order.mark_paid(now)?;
            let mut messages = Vec::new();
            if transition.is_applied() && order.contains_physical() {
                messages.push(SagaMessage::DeliveryStart(order.delivery_request(now)?));
            }
            Ok((transition, messages))
        })
        .await
    }

    /// PENDING|PAID -> FAILED.
    #[tracing::instrument(skip(self))]
    pub async fn mark_failed(&self, order_id: OrderId) -> Result<OrderUpdate> {
        self.mutate(order_id, "mark_failed", |order, now| {
            Ok((order.mark_failed(now)?, Vec::new()))
        })
        .await
    }

    /// PENDING|PAID -> CANCELLED.
    #[tracing::instrument(skip(self))]
    pub async fn mark_cancelled(&self, order_id: OrderId) -> Result<OrderUpdate> {
        self.mutate(order_id, "mark_cancelled", |order, now| {
            Ok((order.mark_cancelled(now)?, Vec::new()))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_item_shipped(&self, order_id: OrderId, item_id: ItemId) -> Result<OrderUpdate> {
        self.mutate(order_id, "mark_item_shipped", |order, now| {
            Ok((order.mark_item_shipped(item_id, now)?, Vec::new()))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_item_delivered(
        &self,
        order_id: OrderId,
        item_id: ItemId,
    ) -> Result<OrderUpdate> {
        self.mutate(order_id, "mark_item_delivered", |order, now| {
            Ok((order.mark_item_delivered(item_id, now)?, Vec::new()))
        })
        .await
    }

    /// SHIPPED -> DELIVERED for several items in one save.
    #[tracing::instrument(skip(self))]
    pub async fn mark_items_delivered(
        &self,
        order_id: OrderId,
        item_ids: &[ItemId],
    ) -> Result<OrderUpdate> {
        self.mutate(order_id, "mark_items_delivered", |order, now| {
            let mut transition = Transition::Unchanged;
            for item_id in item_ids {
                transition = transition.or(order.mark_item_delivered(*item_id, now)?);
            }
            Ok((transition, Vec::new()))
        })
        .await
    }

    /// PAID -> DIGITAL_UNLOCKED for a digital item.
    #[tracing::instrument(skip(self))]
    pub async fn unlock_digital_item(
        &self,
        order_id: OrderId,
        item_id: ItemId,
    ) -> Result<OrderUpdate> {
        self.mutate(order_id, "unlock_digital_item", |order, now| {
            Ok((order.unlock_digital_item(item_id, now)?, Vec::new()))
        })
        .await
    }

    /// Re-derives FULFILLED from the item states.
    #[tracing::instrument(skip(self))]
    pub async fn recalc_status(&self, order_id: OrderId) -> Result<OrderUpdate> {
        self.mutate(order_id, "recalc_status", |order, now| {
            Ok((order.recalc_status(now), Vec::new()))
        })
        .await
    }

    /// Copies the courier tracking number onto the order.
    #[tracing::instrument(skip(self))]
    pub async fn attach_tracking_number(
        &self,
        order_id: OrderId,
        tracking_number: &str,
    ) -> Result<OrderUpdate> {
        self.mutate(order_id, "attach_tracking_number", |order, now| {
            Ok((order.attach_tracking_number(tracking_number, now), Vec::new()))
        })
        .await
    }

    /// Writes a `delivery.start` row for the order's physical items.
    ///
    /// Used for cash-on-delivery orders, which never see a payment webhook,
    /// and to recover a delivery that never got going: one whose start was
    /// lost before a delivery existed, left PENDING, or FAILED at the courier.
    /// Allowed for PENDING cash orders and PAID gateway orders. Writes nothing
    /// while an earlier start is still waiting for the relay, or once a
    /// delivery has been registered.
    #[tracing::instrument(skip(self))]
    pub async fn request_delivery(&self, order_id: OrderId) -> Result<OrderUpdate> {
        let start_queued = self
            .store
            .events_for_order(order_id)
            .await?
            .iter()
            .any(|e| e.event_type == topics::DELIVERY_START && !e.processed);
        let delivery_underway = self
            .store
            .find_delivery_by_order(order_id)
            .await?
            .is_some_and(|d| {
                !matches!(d.status(), DeliveryStatus::Pending | DeliveryStatus::Failed)
            });

        if start_queued || delivery_underway {
            let order = self
                .store
                .get_order(order_id)
                .await?
                .ok_or(SagaError::OrderNotFound(order_id))?;
            return Ok(OrderUpdate {
                order,
                transition: Transition::Unchanged,
            });
        }

        self.mutate(order_id, "request_delivery", |order, now| {
            if !order.can_request_delivery() {
                return Err(OrderError::InvalidTransition {
                    current_state: order.status(),
                    action: "start delivery",
                }
                .into());
            }
            let request = order.delivery_request(now)?;
            Ok((Transition::Applied, vec![SagaMessage::DeliveryStart(request)]))
        })
        .await
    }

    /// Applies a `delivery.completed` message.
    ///
    /// A cash-on-delivery order is paid at the door, so it is marked PAID
    /// first. Each listed item is then walked to DELIVERED along allowed
    /// edges; items already delivered are left alone.
    #[tracing::instrument(skip(self))]
    pub async fn apply_delivery_completed(
        &self,
        order_id: OrderId,
        item_ids: &[ItemId],
    ) -> Result<OrderUpdate> {
        self.mutate(order_id, "apply_delivery_completed", |order, now| {
            let mut transition = Transition::Unchanged;
            if order.status() == OrderStatus::Pending
                && order.payment_method() == PaymentMethod::CashOnDelivery
            {
                transition = order.mark_paid(now)?;
            }
            for item_id in item_ids {
                transition = transition.or(order.advance_item_to_delivered(*item_id, now)?);
            }
            Ok((transition, Vec::new()))
        })
        .await
    }

    /// PENDING orders created before `created_before` with no delivery on record.
    pub async fn stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderId>> {
        Ok(self.store.find_stale_pending_orders(created_before).await?)
    }

    /// Load, apply, save; retried when another writer got there first.
    async fn mutate<F>(
        &self,
        order_id: OrderId,
        name: &'static str,
        mut apply: F,
    ) -> Result<OrderUpdate>
    where
        F: FnMut(&mut Order, DateTime<Utc>) -> Result<(Transition, Vec<SagaMessage>)> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut order = self
                .store
                .get_order(order_id)
                .await?
                .ok_or(SagaError::OrderNotFound(order_id))?;

            let now = Utc::now();
            let (transition, messages) = apply(&mut order, now)?;
            if !transition.is_applied() && messages.is_empty() {
                tracing::debug!(%order_id, operation = name, status = %order.status(), "already applied");
                return Ok(OrderUpdate { order, transition });
            }

            let outbox = messages
                .iter()
                .map(|m| OutboxEvent::from_message(m, now))
                .collect::<serde_json::Result<Vec<_>>>()?;

            match self.store.save_order(&order, outbox).await {
                Ok(version) => {
                    order.set_version(version);
                    tracing::info!(
                        %order_id,
                        operation = name,
                        status = %order.status(),
                        messages = messages.len(),
                        "order updated"
                    );
                    metrics::counter!("order_transitions_total", "transition" => name)
                        .increment(1);
                    return Ok(OrderUpdate {
                        order,
                        transition: Transition::Applied,
                    });
                }
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    tracing::debug!(%order_id, operation = name, attempt, "retrying after conflict");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
