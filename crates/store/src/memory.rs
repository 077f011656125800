use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeliveryId, OrderId, OutboxEventId, Version};
use domain::{Delivery, Order, OrderStatus, topics};
use tokio::sync::RwLock;

use crate::{
    OutboxEvent, Result, StoreError,
    store::{DeliveryStore, OrderStore, OutboxStore},
};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    deliveries: HashMap<DeliveryId, Delivery>,
    /// Insertion order doubles as relay order.
    outbox: Vec<OutboxEvent>,
}

/// In-memory store implementation for tests and local runs.
///
/// A single lock guards orders, deliveries and the outbox so that a save and
/// its outbox rows land together, like a database transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every outbox row, oldest first.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state.read().await.outbox.clone()
    }

    /// Returns the outbox rows of a given topic, oldest first.
    pub async fn outbox_events_of_type(&self, event_type: &str) -> Vec<OutboxEvent> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Inserts a raw outbox row, bypassing any aggregate.
    pub async fn push_outbox_event(&self, event: OutboxEvent) {
        self.state.write().await.outbox.push(event);
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Clears all rows.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.orders.clear();
        state.deliveries.clear();
        state.outbox.clear();
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id()) {
            return Err(StoreError::ConcurrencyConflict {
                entity: "order",
                id: order.id().as_uuid(),
                expected: Version::initial(),
            });
        }

        let mut stored = order.clone();
        stored.set_version(Version::first());
        state.orders.insert(order.id(), stored);
        Ok(Version::first())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn save_order(&self, order: &Order, outbox: Vec<OutboxEvent>) -> Result<Version> {
        let mut state = self.state.write().await;
        let current = state
            .orders
            .get(&order.id())
            .map(Order::version)
            .ok_or(StoreError::NotFound {
                entity: "order",
                id: order.id().as_uuid(),
            })?;

        if current != order.version() {
            return Err(StoreError::ConcurrencyConflict {
                entity: "order",
                id: order.id().as_uuid(),
                expected: order.version(),
            });
        }

        let new_version = current.next();
        let mut stored = order.clone();
        stored.set_version(new_version);
        state.orders.insert(order.id(), stored);
        state.outbox.extend(outbox);
        Ok(new_version)
    }

    async fn find_stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderId>> {
        let state = self.state.read().await;
        let mut stale: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.status() == OrderStatus::Pending && o.created_at() < created_before)
            .filter(|o| {
                !state
                    .outbox
                    .iter()
                    .any(|e| e.order_id == o.id() && e.event_type == topics::DELIVERY_START)
            })
            .collect();
        stale.sort_by_key(|o| o.created_at());
        Ok(stale.into_iter().map(Order::id).collect())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<Version> {
        let mut state = self.state.write().await;
        let duplicate = state
            .deliveries
            .values()
            .any(|d| d.id() == delivery.id() || d.order_id() == delivery.order_id());
        if duplicate {
            return Err(StoreError::ConcurrencyConflict {
                entity: "delivery",
                id: delivery.id().as_uuid(),
                expected: Version::initial(),
            });
        }

        let mut stored = delivery.clone();
        stored.set_version(Version::first());
        state.deliveries.insert(delivery.id(), stored);
        Ok(Version::first())
    }

    async fn save_delivery(
        &self,
        delivery: &Delivery,
        outbox: Vec<OutboxEvent>,
    ) -> Result<Version> {
        let mut state = self.state.write().await;
        let current = state
            .deliveries
            .get(&delivery.id())
            .map(Delivery::version)
            .ok_or(StoreError::NotFound {
                entity: "delivery",
                id: delivery.id().as_uuid(),
            })?;

        if current != delivery.version() {
            return Err(StoreError::ConcurrencyConflict {
                entity: "delivery",
                id: delivery.id().as_uuid(),
                expected: delivery.version(),
            });
        }

        if let Some(tracking) = delivery.tracking_number() {
            let taken = state
                .deliveries
                .values()
                .any(|d| d.id() != delivery.id() && d.tracking_number() == Some(tracking));
            if taken {
                return Err(StoreError::ConcurrencyConflict {
                    entity: "delivery",
                    id: delivery.id().as_uuid(),
                    expected: delivery.version(),
                });
            }
        }

        let new_version = current.next();
        let mut stored = delivery.clone();
        stored.set_version(new_version);
        state.deliveries.insert(delivery.id(), stored);
        state.outbox.extend(outbox);
        Ok(new_version)
    }

    async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Option<Delivery>> {
        Ok(self.state.read().await.deliveries.get(&delivery_id).cloned())
    }

    async fn find_delivery_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>> {
        Ok(self
            .state
            .read()
            .await
            .deliveries
            .values()
            .find(|d| d.order_id() == order_id)
            .cloned())
    }

    async fn find_delivery_by_tracking(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Delivery>> {
        Ok(self
            .state
            .read()
            .await
            .deliveries
            .values()
            .find(|d| d.tracking_number() == Some(tracking_number))
            .cloned())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .filter(|e| !e.processed && e.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: OutboxEventId, processed_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let event = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound {
                entity: "outbox event",
                id: id.as_uuid(),
            })?;
        event.processed = true;
        event.processed_at = Some(processed_at);
        Ok(())
    }

    async fn record_failure(&self, id: OutboxEventId, error: &str) -> Result<i32> {
        let mut state = self.state.write().await;
        let event = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound {
                entity: "outbox event",
                id: id.as_uuid(),
            })?;
        event.attempts += 1;
        event.last_error = Some(error.to_string());
        Ok(event.attempts)
    }

    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEvent>> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{ItemId, UserId};
    use domain::{
        CreateOrder, CustomerContact, DeliveryStartData, Money, NewOrderItem, PaymentMethod,
        ProductType, SagaMessage,
    };

    fn new_order(created_at: DateTime<Utc>) -> Order {
        let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::CashOnDelivery)
            .with_address("12 Main St")
            .with_item(NewOrderItem::new(
                ProductType::Clothes,
                "TSHIRT-M",
                1,
                Money::from_cents(5000),
            ));
        Order::create(cmd, created_at).unwrap()
    }

    fn start_event(order: &Order) -> OutboxEvent {
        let message = SagaMessage::DeliveryStart(order.delivery_request(Utc::now()).unwrap());
        OutboxEvent::from_message(&message, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_order() {
        let store = InMemoryStore::new();
        let order = new_order(Utc::now());

        let version = store.insert_order(&order).await.unwrap();
        assert_eq!(version, Version::first());

        let loaded = store.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::first());
        assert_eq!(loaded.total(), order.total());
        assert_eq!(loaded.items().len(), 1);
    }

    #[tokio::test]
    async fn test_save_with_stale_version_writes_nothing() {
        let store = InMemoryStore::new();
        let order = new_order(Utc::now());
        store.insert_order(&order).await.unwrap();

        let mut first = store.get_order(order.id()).await.unwrap().unwrap();
        let mut second = first.clone();

        first.mark_paid(Utc::now()).unwrap();
        let event = start_event(&first);
        store.save_order(&first, vec![event]).await.unwrap();

        second.mark_cancelled(Utc::now()).unwrap();
        let result = store.save_order(&second, vec![start_event(&second)]).await;
        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { .. })
        ));

        // Only the winning save's outbox row exists.
        assert_eq!(store.outbox_events().await.len(), 1);
        let stored = store.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Paid);
        assert_eq!(stored.version(), Version::new(2));
    }

    #[tokio::test]
    async fn test_stale_pending_excludes_started_deliveries() {
        let store = InMemoryStore::new();
        let old = Utc::now() - Duration::minutes(31);

        let abandoned = new_order(old);
        store.insert_order(&abandoned).await.unwrap();

        let cash = new_order(old);
        store.insert_order(&cash).await.unwrap();
        store.push_outbox_event(start_event(&cash)).await;

        let fresh = new_order(Utc::now());
        store.insert_order(&fresh).await.unwrap();

        let stale = store
            .find_stale_pending_orders(Utc::now() - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(stale, vec![abandoned.id()]);
    }

    #[tokio::test]
    async fn test_one_delivery_per_order() {
        let store = InMemoryStore::new();
        let request = DeliveryStartData {
            order_id: OrderId::new(),
            item_ids: vec![ItemId::new()],
            address: "12 Main St".to_string(),
            contact: CustomerContact::default(),
            requested_at: Utc::now(),
        };

        let first = Delivery::start(&request, Utc::now()).unwrap();
        store.insert_delivery(&first).await.unwrap();

        let second = Delivery::start(&request, Utc::now()).unwrap();
        assert!(store.insert_delivery(&second).await.unwrap_err().is_conflict());

        let found = store
            .find_delivery_by_order(request.order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), first.id());
    }

    #[tokio::test]
    async fn test_outbox_failures_hide_poisoned_rows() {
        let store = InMemoryStore::new();
        let order = new_order(Utc::now());
        let event = start_event(&order);
        let id = event.id;
        store.push_outbox_event(event).await;

        assert_eq!(store.fetch_unprocessed(10, 2).await.unwrap().len(), 1);
        assert_eq!(store.record_failure(id, "bad payload").await.unwrap(), 1);
        assert_eq!(store.record_failure(id, "bad payload").await.unwrap(), 2);
        assert!(store.fetch_unprocessed(10, 2).await.unwrap().is_empty());

        let rows = store.events_for_order(order.id()).await.unwrap();
        assert_eq!(rows[0].last_error.as_deref(), Some("bad payload"));
    }

    #[tokio::test]
    async fn test_mark_processed() {
        let store = InMemoryStore::new();
        let order = new_order(Utc::now());
        let event = start_event(&order);
        let id = event.id;
        store.push_outbox_event(event).await;

        store.mark_processed(id, Utc::now()).await.unwrap();
        assert!(store.fetch_unprocessed(10, 10).await.unwrap().is_empty());
        assert!(store.outbox_events().await[0].processed_at.is_some());
    }
}
