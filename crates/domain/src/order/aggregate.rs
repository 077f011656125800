//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId, UserId, Version};
use serde::{Deserialize, Serialize};

use crate::messages::DeliveryStartData;
use crate::transition::Transition;

use super::{
    CreateOrder, CustomerContact, ItemStatus, Money, OrderError, OrderItem, OrderStatus,
    PaymentMethod, ProductType,
};

/// Order aggregate root.
///
/// The single source of truth for an order and its items. All mutation goes
/// through the transition methods below, which enforce the order and item
/// state machines; persistence is the store's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    user_id: UserId,

    /// Always equals the sum of item totals; fixed at creation.
    total: Money,

    delivery_address: Option<String>,

    contact: Option<CustomerContact>,

    payment_method: PaymentMethod,

    status: OrderStatus,

    /// Read-model copy of the courier tracking number.
    tracking_number: Option<String>,

    items: Vec<OrderItem>,

    created_at: DateTime<Utc>,

    updated_at: DateTime<Utc>,
}

/// Raw parts of a persisted order, used by stores to rebuild the aggregate.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub version: Version,
    pub user_id: UserId,
    pub total: Money,
    pub delivery_address: Option<String>,
    pub contact: Option<CustomerContact>,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub tracking_number: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validates a checkout and builds a new pending order.
    pub fn create(cmd: CreateOrder, now: DateTime<Utc>) -> Result<Self, OrderError> {
        if cmd.items.is_empty() {
            return Err(OrderError::NoItems);
        }

        for item in &cmd.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    price: item.unit_price.cents(),
                });
            }
        }

        let has_physical = cmd.items.iter().any(|i| i.product_type.is_physical());
        let has_digital = cmd.items.iter().any(|i| i.product_type.is_digital());

        let address = cmd
            .delivery_address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        if has_physical && address.is_none() {
            return Err(OrderError::MissingDeliveryAddress);
        }
        if has_digital && cmd.payment_method != PaymentMethod::Gateway {
            return Err(OrderError::InvalidPaymentMethod {
                method: cmd.payment_method,
            });
        }

        let items: Vec<OrderItem> = cmd
            .items
            .into_iter()
            .map(|new| OrderItem {
                id: ItemId::new(),
                order_id: cmd.order_id,
                product_type: new.product_type,
                product_id: new.product_id,
                quantity: new.quantity,
                unit_price: new.unit_price,
                status: ItemStatus::Pending,
            })
            .collect();

        Ok(Self {
            id: cmd.order_id,
            version: Version::initial(),
            user_id: cmd.user_id,
            total: items.iter().map(OrderItem::total_price).sum(),
            delivery_address: address,
            contact: cmd.contact,
            payment_method: cmd.payment_method,
            status: OrderStatus::Pending,
            tracking_number: None,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order from persisted parts.
    pub fn from_parts(parts: OrderParts) -> Self {
        Self {
            id: parts.id,
            version: parts.version,
            user_id: parts.user_id,
            total: parts.total,
            delivery_address: parts.delivery_address,
            contact: parts.contact,
            payment_method: parts.payment_method,
            status: parts.status,
            tracking_number: parts.tracking_number,
            items: parts.items,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the version after a successful save.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn total(&self) -> Money {
        self.total
    }

    /// Recomputes the total from the items.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(OrderItem::total_price).sum()
    }

    pub fn delivery_address(&self) -> Option<&str> {
        self.delivery_address.as_deref()
    }

    pub fn contact(&self) -> Option<&CustomerContact> {
        self.contact.as_ref()
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: ItemId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if any item needs a delivery.
    pub fn contains_physical(&self) -> bool {
        self.items.iter().any(OrderItem::is_physical)
    }

    /// Returns true if any item is unlocked digitally.
    pub fn contains_digital(&self) -> bool {
        self.items.iter().any(OrderItem::is_digital)
    }

    pub fn physical_item_ids(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|i| i.is_physical())
            .map(|i| i.id)
            .collect()
    }

    /// Digital items paid for but not yet unlocked.
    pub fn digital_items_awaiting_unlock(&self) -> Vec<&OrderItem> {
        self.items
            .iter()
            .filter(|i| i.is_digital() && i.status == ItemStatus::Paid)
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether goods may leave the warehouse: a cash order before it is paid
    /// at the door, a gateway order only once the gateway confirmed payment.
    pub fn can_request_delivery(&self) -> bool {
        match self.payment_method {
            PaymentMethod::CashOnDelivery => self.status == OrderStatus::Pending,
            PaymentMethod::Gateway => self.status == OrderStatus::Paid,
        }
    }

    /// Builds the `delivery.start` payload for this order's physical items.
    pub fn delivery_request(&self, now: DateTime<Utc>) -> Result<DeliveryStartData, OrderError> {
        let item_ids = self.physical_item_ids();
        if item_ids.is_empty() {
            return Err(OrderError::NothingToDeliver);
        }
        let address = self
            .delivery_address
            .clone()
            .ok_or(OrderError::MissingDeliveryAddress)?;

        Ok(DeliveryStartData {
            order_id: self.id,
            item_ids,
            address,
            contact: self.contact.clone().unwrap_or_default(),
            requested_at: now,
        })
    }
}

// Order-level transitions
impl Order {
    /// PENDING -> PAID, moving every pending item to PAID.
    ///
    /// Re-applying to an order that is already paid (or fulfilled) is a no-op,
    /// since gateways redeliver webhooks.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        match self.status {
            OrderStatus::Paid | OrderStatus::Fulfilled => return Ok(Transition::Unchanged),
            status if !status.can_mark_paid() => {
                return Err(OrderError::InvalidTransition {
                    current_state: status,
                    action: "mark paid",
                });
            }
            _ => {}
        }

        for item in &mut self.items {
            item.transition_to(ItemStatus::Paid)?;
        }
        self.status = OrderStatus::Paid;
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// PENDING|PAID -> FAILED, cancelling every unfinished item.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        self.abort(OrderStatus::Failed, "mark failed", now)
    }

    /// PENDING|PAID -> CANCELLED, cancelling every unfinished item.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        self.abort(OrderStatus::Cancelled, "mark cancelled", now)
    }

    fn abort(
        &mut self,
        target: OrderStatus,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        if self.status == target {
            return Ok(Transition::Unchanged);
        }
        let allowed = match target {
            OrderStatus::Failed => self.status.can_fail(),
            _ => self.status.can_cancel(),
        };
        if !allowed {
            return Err(OrderError::InvalidTransition {
                current_state: self.status,
                action,
            });
        }

        for item in &mut self.items {
            if !item.status.is_terminal() {
                item.transition_to(ItemStatus::Cancelled)?;
            }
        }
        self.status = target;
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// Derives FULFILLED once every item reached a terminal success state.
    pub fn recalc_status(&mut self, now: DateTime<Utc>) -> Transition {
        if self.status != OrderStatus::Paid {
            return Transition::Unchanged;
        }
        if self.items.iter().all(|i| i.status.is_terminal_success()) {
            self.status = OrderStatus::Fulfilled;
            self.updated_at = now;
            Transition::Applied
        } else {
            Transition::Unchanged
        }
    }

    /// Stores the courier tracking number on the order.
    pub fn attach_tracking_number(
        &mut self,
        tracking_number: &str,
        now: DateTime<Utc>,
    ) -> Transition {
        if self.tracking_number.as_deref() == Some(tracking_number) {
            return Transition::Unchanged;
        }
        self.tracking_number = Some(tracking_number.to_string());
        self.updated_at = now;
        Transition::Applied
    }
}

// Item-level transitions; each one re-derives the order status.
impl Order {
    /// PAID -> SHIPPED for a physical item.
    pub fn mark_item_shipped(
        &mut self,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        let item = self.physical_item_mut(item_id, "shipped")?;
        let transition = item.transition_to(ItemStatus::Shipped)?;
        Ok(self.finish_item_transition(transition, now))
    }

    /// SHIPPED -> DELIVERED for a physical item.
    pub fn mark_item_delivered(
        &mut self,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        let item = self.physical_item_mut(item_id, "delivered")?;
        let transition = item.transition_to(ItemStatus::Delivered)?;
        Ok(self.finish_item_transition(transition, now))
    }

    /// Walks a physical item to DELIVERED along allowed edges only.
    ///
    /// A PAID item passes through SHIPPED first; a DELIVERED item is left
    /// alone, so replaying a completion is harmless.
    pub fn advance_item_to_delivered(
        &mut self,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        let item = self.physical_item_mut(item_id, "delivered")?;
        let mut transition = Transition::Unchanged;
        if item.status == ItemStatus::Paid {
            transition = item.transition_to(ItemStatus::Shipped)?;
        }
        transition = transition.or(item.transition_to(ItemStatus::Delivered)?);
        Ok(self.finish_item_transition(transition, now))
    }

    /// PAID -> DIGITAL_UNLOCKED for a digital item.
    pub fn unlock_digital_item(
        &mut self,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        let item = self.item_mut(item_id)?;
        if !item.is_digital() {
            return Err(OrderError::WrongProductType {
                item_id,
                product_type: item.product_type,
                action: "unlocked",
            });
        }
        let transition = item.transition_to(ItemStatus::DigitalUnlocked)?;
        Ok(self.finish_item_transition(transition, now))
    }

    fn finish_item_transition(&mut self, transition: Transition, now: DateTime<Utc>) -> Transition {
        if transition.is_applied() {
            self.updated_at = now;
        }
        transition.or(self.recalc_status(now))
    }

    fn item_mut(&mut self, item_id: ItemId) -> Result<&mut OrderItem, OrderError> {
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(OrderError::ItemNotFound { item_id })
    }

    fn physical_item_mut(
        &mut self,
        item_id: ItemId,
        action: &'static str,
    ) -> Result<&mut OrderItem, OrderError> {
        let item = self.item_mut(item_id)?;
        if item.product_type != ProductType::Clothes {
            return Err(OrderError::WrongProductType {
                item_id,
                product_type: item.product_type,
                action,
            });
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::NewOrderItem;

    fn physical(price_cents: i64) -> NewOrderItem {
        NewOrderItem::new(
            ProductType::Clothes,
            "HOODIE-L",
            1,
            Money::from_cents(price_cents),
        )
    }

    fn digital(price_cents: i64) -> NewOrderItem {
        NewOrderItem::new(
            ProductType::Pack,
            "PACK-01",
            1,
            Money::from_cents(price_cents),
        )
    }

    fn gateway_order(items: Vec<NewOrderItem>) -> Order {
        let mut cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::Gateway)
            .with_address("5 Oak Ave")
            .with_contact(CustomerContact::new("Ada", "+100000"));
        cmd.items = items;
        Order::create(cmd, Utc::now()).unwrap()
    }

    #[test]
    fn test_create_computes_total() {
        let mut cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::Gateway)
            .with_address("12 Main St");
        cmd.items = vec![
            NewOrderItem::new(ProductType::Clothes, "SOCKS", 3, Money::from_cents(250)),
            NewOrderItem::new(ProductType::Sample, "SAMPLE-1", 2, Money::from_cents(199)),
        ];
        let order = Order::create(cmd, Utc::now()).unwrap();

        assert_eq!(order.total().cents(), 3 * 250 + 2 * 199);
        assert_eq!(order.total(), order.items_total());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(order.items().iter().all(|i| i.status == ItemStatus::Pending));
    }

    #[test]
    fn test_create_physical_without_address_fails() {
        let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::CashOnDelivery)
            .with_address("   ")
            .with_item(physical(5000));
        let result = Order::create(cmd, Utc::now());
        assert!(matches!(result, Err(OrderError::MissingDeliveryAddress)));
    }

    #[test]
    fn test_create_digital_with_cash_fails() {
        let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::CashOnDelivery)
            .with_item(digital(900));
        let result = Order::create(cmd, Utc::now());
        assert!(matches!(
            result,
            Err(OrderError::InvalidPaymentMethod {
                method: PaymentMethod::CashOnDelivery
            })
        ));
    }

    #[test]
    fn test_create_digital_only_needs_no_address() {
        let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::Gateway)
            .with_item(digital(900));
        let order = Order::create(cmd, Utc::now()).unwrap();
        assert!(order.delivery_address().is_none());
        assert!(!order.contains_physical());
        assert!(order.contains_digital());
    }

    #[test]
    fn test_create_rejects_empty_and_zero_quantity() {
        let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::Gateway);
        assert!(matches!(
            Order::create(cmd, Utc::now()),
            Err(OrderError::NoItems)
        ));

        let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::Gateway).with_item(
            NewOrderItem::new(ProductType::Pack, "PACK-01", 0, Money::from_cents(100)),
        );
        assert!(matches!(
            Order::create(cmd, Utc::now()),
            Err(OrderError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn test_mark_paid_is_idempotent() {
        let mut order = gateway_order(vec![physical(5000)]);

        assert_eq!(order.mark_paid(Utc::now()).unwrap(), Transition::Applied);
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.items()[0].status, ItemStatus::Paid);

        assert_eq!(order.mark_paid(Utc::now()).unwrap(), Transition::Unchanged);
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[test]
    fn test_mark_paid_after_cancel_is_conflict() {
        let mut order = gateway_order(vec![physical(5000)]);
        order.mark_cancelled(Utc::now()).unwrap();

        let result = order.mark_paid(Utc::now());
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_mark_failed_cancels_items() {
        let mut order = gateway_order(vec![physical(5000), digital(100)]);
        order.mark_paid(Utc::now()).unwrap();

        assert_eq!(order.mark_failed(Utc::now()).unwrap(), Transition::Applied);
        assert_eq!(order.status(), OrderStatus::Failed);
        assert!(
            order
                .items()
                .iter()
                .all(|i| i.status == ItemStatus::Cancelled)
        );

        // Duplicate failure is absorbed, but cancelling a failed order is a conflict.
        assert_eq!(order.mark_failed(Utc::now()).unwrap(), Transition::Unchanged);
        assert!(order.mark_cancelled(Utc::now()).is_err());
    }

    #[test]
    fn test_mark_failed_on_fulfilled_is_conflict() {
        let mut order = gateway_order(vec![digital(100)]);
        let item_id = order.items()[0].id;
        order.mark_paid(Utc::now()).unwrap();
        order.unlock_digital_item(item_id, Utc::now()).unwrap();
        assert_eq!(order.status(), OrderStatus::Fulfilled);

        let result = order.mark_failed(Utc::now());
        assert!(matches!(
            result,
            Err(OrderError::InvalidTransition {
                current_state: OrderStatus::Fulfilled,
                ..
            })
        ));
    }

    #[test]
    fn test_physical_item_walk_fulfills_order() {
        let mut order = gateway_order(vec![physical(5000)]);
        let item_id = order.items()[0].id;
        order.mark_paid(Utc::now()).unwrap();

        order.mark_item_shipped(item_id, Utc::now()).unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);

        order.mark_item_delivered(item_id, Utc::now()).unwrap();
        assert_eq!(order.item(item_id).unwrap().status, ItemStatus::Delivered);
        assert_eq!(order.status(), OrderStatus::Fulfilled);
    }

    #[test]
    fn test_mark_item_delivered_requires_shipped() {
        let mut order = gateway_order(vec![physical(5000)]);
        let item_id = order.items()[0].id;
        order.mark_paid(Utc::now()).unwrap();

        let result = order.mark_item_delivered(item_id, Utc::now());
        assert!(matches!(
            result,
            Err(OrderError::InvalidItemTransition { .. })
        ));
    }

    #[test]
    fn test_advance_item_to_delivered_is_idempotent() {
        let mut order = gateway_order(vec![physical(5000)]);
        let item_id = order.items()[0].id;
        order.mark_paid(Utc::now()).unwrap();

        assert_eq!(
            order.advance_item_to_delivered(item_id, Utc::now()).unwrap(),
            Transition::Applied
        );
        assert_eq!(
            order.advance_item_to_delivered(item_id, Utc::now()).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(order.status(), OrderStatus::Fulfilled);
    }

    #[test]
    fn test_mixed_order_needs_both_kinds_finished() {
        let mut order = gateway_order(vec![physical(5000), digital(100)]);
        let physical_id = order.items()[0].id;
        let digital_id = order.items()[1].id;
        order.mark_paid(Utc::now()).unwrap();

        order.unlock_digital_item(digital_id, Utc::now()).unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);

        order
            .advance_item_to_delivered(physical_id, Utc::now())
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Fulfilled);
    }

    #[test]
    fn test_wrong_product_type_is_rejected() {
        let mut order = gateway_order(vec![physical(5000), digital(100)]);
        let physical_id = order.items()[0].id;
        let digital_id = order.items()[1].id;
        order.mark_paid(Utc::now()).unwrap();

        assert!(matches!(
            order.unlock_digital_item(physical_id, Utc::now()),
            Err(OrderError::WrongProductType { .. })
        ));
        assert!(matches!(
            order.mark_item_shipped(digital_id, Utc::now()),
            Err(OrderError::WrongProductType { .. })
        ));
    }

    #[test]
    fn test_unknown_item_is_not_found() {
        let mut order = gateway_order(vec![physical(5000)]);
        let result = order.mark_item_shipped(ItemId::new(), Utc::now());
        assert!(matches!(result, Err(OrderError::ItemNotFound { .. })));
    }

    #[test]
    fn test_delivery_request_lists_physical_items_only() {
        let order = gateway_order(vec![physical(5000), digital(100)]);
        let request = order.delivery_request(Utc::now()).unwrap();

        assert_eq!(request.order_id, order.id());
        assert_eq!(request.item_ids, vec![order.items()[0].id]);
        assert_eq!(request.address, "5 Oak Ave");
        assert_eq!(request.contact.name, "Ada");
    }

    #[test]
    fn test_delivery_request_without_physical_items_fails() {
        let order = gateway_order(vec![digital(100)]);
        assert!(matches!(
            order.delivery_request(Utc::now()),
            Err(OrderError::NothingToDeliver)
        ));
    }

    #[test]
    fn test_can_request_delivery_by_payment_method() {
        let mut gateway = gateway_order(vec![physical(5000)]);
        assert!(!gateway.can_request_delivery());
        gateway.mark_paid(Utc::now()).unwrap();
        assert!(gateway.can_request_delivery());

        let mut cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::CashOnDelivery)
            .with_address("5 Oak Ave");
        cmd.items = vec![physical(5000)];
        let mut cash = Order::create(cmd, Utc::now()).unwrap();
        assert!(cash.can_request_delivery());
        cash.mark_cancelled(Utc::now()).unwrap();
        assert!(!cash.can_request_delivery());
    }

    #[test]
    fn test_attach_tracking_number_once() {
        let mut order = gateway_order(vec![physical(5000)]);
        assert_eq!(
            order.attach_tracking_number("TEST-AB12CD34", Utc::now()),
            Transition::Applied
        );
        assert_eq!(
            order.attach_tracking_number("TEST-AB12CD34", Utc::now()),
            Transition::Unchanged
        );
        assert_eq!(order.tracking_number(), Some("TEST-AB12CD34"));
    }
}
