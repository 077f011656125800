//! Store double that injects failures and races into an `InMemoryStore`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeliveryId, OrderId, OutboxEventId, Version};
use domain::{Delivery, Order};
use store::{
    DeliveryStore, InMemoryStore, OrderStore, OutboxEvent, OutboxStore, Result, StoreError,
};

/// Tracking number written by the interleaved writer.
pub const RACING_TRACKING_NUMBER: &str = "TEST-00000000";

#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_delivery_save: AtomicBool,
    race_order_load: AtomicBool,
    order_loads: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// The next `save_delivery` fails as if the database went away.
    pub fn fail_next_delivery_save(&self) {
        self.fail_delivery_save.store(true, Ordering::SeqCst);
    }

    /// The next `get_order` returns the order, then another writer saves a
    /// change to it before the caller can save.
    pub fn race_next_order_load(&self) {
        self.race_order_load.store(true, Ordering::SeqCst);
    }

    pub fn order_loads(&self) -> usize {
        self.order_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStore for FaultyStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        self.inner.insert_order(order).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.order_loads.fetch_add(1, Ordering::SeqCst);
        let loaded = self.inner.get_order(order_id).await?;
        if self.race_order_load.swap(false, Ordering::SeqCst) {
            if let Some(mut other) = self.inner.get_order(order_id).await? {
                let _ = other.attach_tracking_number(RACING_TRACKING_NUMBER, Utc::now());
                self.inner.save_order(&other, Vec::new()).await?;
            }
        }
        Ok(loaded)
    }

    async fn save_order(&self, order: &Order, outbox: Vec<OutboxEvent>) -> Result<Version> {
        self.inner.save_order(order, outbox).await
    }

    async fn find_stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderId>> {
        self.inner.find_stale_pending_orders(created_before).await
    }
}

#[async_trait]
impl DeliveryStore for FaultyStore {
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<Version> {
        self.inner.insert_delivery(delivery).await
    }

    async fn save_delivery(
        &self,
        delivery: &Delivery,
        outbox: Vec<OutboxEvent>,
    ) -> Result<Version> {
        if self.fail_delivery_save.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.save_delivery(delivery, outbox).await
    }

    async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Option<Delivery>> {
        self.inner.get_delivery(delivery_id).await
    }

    async fn find_delivery_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>> {
        self.inner.find_delivery_by_order(order_id).await
    }

    async fn find_delivery_by_tracking(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Delivery>> {
        self.inner.find_delivery_by_tracking(tracking_number).await
    }
}

#[async_trait]
impl OutboxStore for FaultyStore {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>> {
        self.inner.fetch_unprocessed(limit, max_attempts).await
    }

    async fn mark_processed(&self, id: OutboxEventId, processed_at: DateTime<Utc>) -> Result<()> {
        self.inner.mark_processed(id, processed_at).await
    }

    async fn record_failure(&self, id: OutboxEventId, error: &str) -> Result<i32> {
        self.inner.record_failure(id, error).await
    }

    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEvent>> {
        self.inner.events_for_order(order_id).await
    }
}
