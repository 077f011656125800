use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeliveryId, OrderId, OutboxEventId, Version};
use domain::{Delivery, Order};

use crate::{OutboxEvent, Result};

/// Persistence for the order aggregate.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order and its items. Returns the stored version.
    async fn insert_order(&self, order: &Order) -> Result<Version>;

    /// Loads an order with its items.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Saves an order loaded at `order.version()` together with `outbox` rows.
    ///
    /// Fails with `ConcurrencyConflict` if the stored row has moved on; in
    /// that case nothing (including the outbox rows) is written.
    async fn save_order(&self, order: &Order, outbox: Vec<OutboxEvent>) -> Result<Version>;

    /// Returns PENDING orders created before `created_before` that have no
    /// `delivery.start` outbox row.
    async fn find_stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderId>>;
}

/// Persistence for the delivery aggregate.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Inserts a new delivery. A second delivery for the same order is a
    /// `ConcurrencyConflict`.
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<Version>;

    /// Saves a delivery loaded at `delivery.version()` together with `outbox` rows.
    async fn save_delivery(&self, delivery: &Delivery, outbox: Vec<OutboxEvent>)
    -> Result<Version>;

    async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Option<Delivery>>;

    async fn find_delivery_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>>;

    async fn find_delivery_by_tracking(&self, tracking_number: &str)
    -> Result<Option<Delivery>>;
}

/// Access to the transactional outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns up to `limit` unprocessed rows with fewer than `max_attempts`
    /// decode failures, oldest first.
    async fn fetch_unprocessed(&self, limit: usize, max_attempts: i32)
    -> Result<Vec<OutboxEvent>>;

    async fn mark_processed(&self, id: OutboxEventId, processed_at: DateTime<Utc>) -> Result<()>;

    /// Records a decode failure. Returns the new attempt count.
    async fn record_failure(&self, id: OutboxEventId, error: &str) -> Result<i32>;

    /// Returns every outbox row written for an order, oldest first.
    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEvent>>;
}

/// Everything the saga needs from persistence.
pub trait SagaStore: OrderStore + DeliveryStore + OutboxStore {}

impl<T: OrderStore + DeliveryStore + OutboxStore + ?Sized> SagaStore for T {}
