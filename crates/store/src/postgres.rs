use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeliveryId, ItemId, OrderId, OutboxEventId, UserId, Version};
use domain::{
    CustomerContact, Delivery, DeliveryParts, Money, Order, OrderItem, OrderParts, topics,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OutboxEvent, Result, StoreError,
    store::{DeliveryStore, OrderStore, OutboxStore},
};

const ORDER_COLUMNS: &str = "id, user_id, status, payment_method, total_cents, delivery_address, \
     contact_name, contact_phone, tracking_number, version, created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, order_id, item_ids, address, contact_name, contact_phone, \
     status, courier_name, tracking_number, failure_reason, registered_at, completed_at, \
     version, created_at, updated_at";

const OUTBOX_COLUMNS: &str = "id, order_id, event_type, payload, processed, attempts, last_error, \
     created_at, processed_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    ///
    /// Applied migrations are recorded in `_sqlx_migrations`, so running this
    /// on every startup is safe.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_type, product_id, quantity, unit_price_cents, status
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_item).collect()
    }

    async fn insert_outbox(
        tx: &mut Transaction<'_, Postgres>,
        outbox: &[OutboxEvent],
    ) -> Result<()> {
        for event in outbox {
            sqlx::query(
                r#"
                INSERT INTO outbox_events (id, order_id, event_type, payload, processed, attempts, last_error, created_at, processed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.id.as_uuid())
            .bind(event.order_id.as_uuid())
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(event.processed)
            .bind(event.attempts)
            .bind(&event.last_error)
            .bind(event.created_at)
            .bind(event.processed_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(StoreError::InvalidRow)
}

fn row_to_item(row: PgRow) -> Result<OrderItem> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(OrderItem {
        id: ItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        product_type: parse_column(&row, "product_type")?,
        product_id: row.try_get("product_id")?,
        quantity: u32::try_from(quantity)
            .map_err(|_| StoreError::InvalidRow(format!("quantity out of range: {quantity}")))?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        status: parse_column(&row, "status")?,
    })
}

fn contact_from_row(row: &PgRow) -> Result<Option<CustomerContact>> {
    let name: Option<String> = row.try_get("contact_name")?;
    let phone: Option<String> = row.try_get("contact_phone")?;
    Ok(match (name, phone) {
        (None, None) => None,
        (name, phone) => Some(CustomerContact {
            name: name.unwrap_or_default(),
            phone: phone.unwrap_or_default(),
        }),
    })
}

fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
    Ok(Order::from_parts(OrderParts {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        version: Version::new(row.try_get("version")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        total: Money::from_cents(row.try_get("total_cents")?),
        delivery_address: row.try_get("delivery_address")?,
        contact: contact_from_row(row)?,
        payment_method: parse_column(row, "payment_method")?,
        status: parse_column(row, "status")?,
        tracking_number: row.try_get("tracking_number")?,
        items,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

fn row_to_delivery(row: PgRow) -> Result<Delivery> {
    let item_ids: Vec<Uuid> = row.try_get("item_ids")?;
    Ok(Delivery::from_parts(DeliveryParts {
        id: DeliveryId::from_uuid(row.try_get::<Uuid, _>("id")?),
        version: Version::new(row.try_get("version")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        item_ids: item_ids.into_iter().map(ItemId::from_uuid).collect(),
        address: row.try_get("address")?,
        contact: CustomerContact {
            name: row.try_get("contact_name")?,
            phone: row.try_get("contact_phone")?,
        },
        status: parse_column(&row, "status")?,
        courier_name: row.try_get("courier_name")?,
        tracking_number: row.try_get("tracking_number")?,
        failure_reason: row.try_get("failure_reason")?,
        registered_at: row.try_get("registered_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

fn row_to_outbox(row: PgRow) -> Result<OutboxEvent> {
    Ok(OutboxEvent {
        id: OutboxEventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        processed: row.try_get("processed")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

/// Maps a unique-constraint violation onto a concurrency conflict.
fn conflict_on_unique(
    error: sqlx::Error,
    entity: &'static str,
    id: Uuid,
    expected: Version,
) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = error
        && db_err.is_unique_violation()
    {
        return StoreError::ConcurrencyConflict {
            entity,
            id,
            expected,
        };
    }
    StoreError::Database(error)
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut tx = self.pool.begin().await?;
        let contact = order.contact();

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, payment_method, total_cents, delivery_address, contact_name, contact_phone, tracking_number, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_method().as_str())
        .bind(order.total().cents())
        .bind(order.delivery_address())
        .bind(contact.map(|c| c.name.as_str()))
        .bind(contact.map(|c| c.phone.as_str()))
        .bind(order.tracking_number())
        .bind(Version::first().as_i64())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "order", order.id().as_uuid(), Version::initial()))?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, product_type, product_id, quantity, unit_price_cents, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order.id().as_uuid())
            .bind(position as i32)
            .bind(item.product_type.as_str())
            .bind(&item.product_id)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.cents())
            .bind(item.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Version::first())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let items = self.load_items(order_id).await?;
                Ok(Some(row_to_order(&row, items)?))
            }
            None => Ok(None),
        }
    }

    async fn save_order(&self, order: &Order, outbox: Vec<OutboxEvent>) -> Result<Version> {
        let expected = order.version();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, tracking_number = $2, updated_at = $3, version = version + 1
            WHERE id = $4 AND version = $5
            "#,
        )
        .bind(order.status().as_str())
        .bind(order.tracking_number())
        .bind(order.updated_at())
        .bind(order.id().as_uuid())
        .bind(expected.as_i64())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tracing::debug!(order_id = %order.id(), %expected, "order version moved on");
            return Err(StoreError::ConcurrencyConflict {
                entity: "order",
                id: order.id().as_uuid(),
                expected,
            });
        }

        for item in order.items() {
            sqlx::query("UPDATE order_items SET status = $1 WHERE id = $2 AND order_id = $3")
                .bind(item.status.as_str())
                .bind(item.id.as_uuid())
                .bind(order.id().as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        Self::insert_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;
        Ok(expected.next())
    }

    async fn find_stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT o.id
            FROM orders o
            WHERE o.status = 'PENDING'
              AND o.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM outbox_events e
                  WHERE e.order_id = o.id AND e.event_type = $2
              )
            ORDER BY o.created_at ASC
            "#,
        )
        .bind(created_before)
        .bind(topics::DELIVERY_START)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }
}

#[async_trait]
impl DeliveryStore for PostgresStore {
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<Version> {
        let item_ids: Vec<Uuid> = delivery.item_ids().iter().map(ItemId::as_uuid).collect();

        sqlx::query(
            r#"
            INSERT INTO deliveries (id, order_id, item_ids, address, contact_name, contact_phone, status, courier_name, tracking_number, failure_reason, registered_at, completed_at, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(delivery.id().as_uuid())
        .bind(delivery.order_id().as_uuid())
        .bind(item_ids)
        .bind(delivery.address())
        .bind(&delivery.contact().name)
        .bind(&delivery.contact().phone)
        .bind(delivery.status().as_str())
        .bind(delivery.courier_name())
        .bind(delivery.tracking_number())
        .bind(delivery.failure_reason())
        .bind(delivery.registered_at())
        .bind(delivery.completed_at())
        .bind(Version::first().as_i64())
        .bind(delivery.created_at())
        .bind(delivery.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, "delivery", delivery.id().as_uuid(), Version::initial())
        })?;

        Ok(Version::first())
    }

    async fn save_delivery(
        &self,
        delivery: &Delivery,
        outbox: Vec<OutboxEvent>,
    ) -> Result<Version> {
        let expected = delivery.version();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = $1, courier_name = $2, tracking_number = $3, failure_reason = $4,
                registered_at = $5, completed_at = $6, updated_at = $7, version = version + 1
            WHERE id = $8 AND version = $9
            "#,
        )
        .bind(delivery.status().as_str())
        .bind(delivery.courier_name())
        .bind(delivery.tracking_number())
        .bind(delivery.failure_reason())
        .bind(delivery.registered_at())
        .bind(delivery.completed_at())
        .bind(delivery.updated_at())
        .bind(delivery.id().as_uuid())
        .bind(expected.as_i64())
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "delivery", delivery.id().as_uuid(), expected))?;

        if updated.rows_affected() == 0 {
            tracing::debug!(delivery_id = %delivery.id(), %expected, "delivery version moved on");
            return Err(StoreError::ConcurrencyConflict {
                entity: "delivery",
                id: delivery.id().as_uuid(),
                expected,
            });
        }

        Self::insert_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;
        Ok(expected.next())
    }

    async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Option<Delivery>> {
        sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1"
        ))
        .bind(delivery_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_delivery)
        .transpose()
    }

    async fn find_delivery_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>> {
        sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_delivery)
        .transpose()
    }

    async fn find_delivery_by_tracking(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Delivery>> {
        sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE tracking_number = $1"
        ))
        .bind(tracking_number)
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_delivery)
        .transpose()
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE processed = FALSE AND attempts < $1 \
             ORDER BY seq ASC LIMIT $2"
        ))
        .bind(max_attempts)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_outbox).collect()
    }

    async fn mark_processed(&self, id: OutboxEventId, processed_at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE outbox_events SET processed = TRUE, processed_at = $1 WHERE id = $2",
        )
        .bind(processed_at)
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "outbox event",
                id: id.as_uuid(),
            });
        }
        Ok(())
    }

    async fn record_failure(&self, id: OutboxEventId, error: &str) -> Result<i32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1, last_error = $1
            WHERE id = $2
            RETURNING attempts
            "#,
        )
        .bind(error)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or(StoreError::NotFound {
            entity: "outbox event",
            id: id.as_uuid(),
        })
    }

    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE order_id = $1 ORDER BY seq ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_outbox).collect()
    }
}
