//! Integration tests for the order and delivery state machines.
//!
//! These tests walk whole lifecycles through the public API, passing saga
//! messages between the two aggregates the way the broker would.

use chrono::Utc;
use common::UserId;
use domain::{
    CreateOrder, CustomerContact, Delivery, DeliveryError, DeliveryStatus, ItemStatus, Money,
    NewOrderItem, Order, OrderError, OrderStatus, PaymentMethod, ProductType, SagaMessage,
    Transition, topics,
};

fn mixed_order() -> Order {
    let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::Gateway)
        .with_address("221B Baker Street")
        .with_contact(CustomerContact::new("Ana", "+34 600 000 000"))
        .with_item(NewOrderItem::new(
            ProductType::Clothes,
            "TSHIRT-M",
            2,
            Money::from_cents(5000),
        ))
        .with_item(NewOrderItem::new(
            ProductType::Pack,
            "PACK-01",
            1,
            Money::from_cents(2900),
        ));
    Order::create(cmd, Utc::now()).unwrap()
}

/// Sends a message through its wire form, as the relay and a consumer would.
fn over_the_wire(message: SagaMessage) -> SagaMessage {
    let payload = message.to_payload().unwrap();
    SagaMessage::decode(message.topic(), &payload).unwrap()
}

mod order_lifecycle {
    use super::*;

    #[test]
    fn mixed_order_reaches_fulfilled_through_delivery() {
        let now = Utc::now();
        let mut order = mixed_order();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total(), Money::from_cents(12900));

        assert_eq!(order.mark_paid(now).unwrap(), Transition::Applied);
        assert!(order.items().iter().all(|i| i.status == ItemStatus::Paid));

        // Digital side: unlocking alone does not fulfill the order.
        let digital: Vec<_> = order
            .digital_items_awaiting_unlock()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(digital.len(), 1);
        order.unlock_digital_item(digital[0], now).unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);

        // Delivery side picks up delivery.start.
        let start = over_the_wire(SagaMessage::DeliveryStart(
            order.delivery_request(now).unwrap(),
        ));
        let SagaMessage::DeliveryStart(start) = start else {
            panic!("expected delivery.start");
        };
        assert_eq!(start.item_ids, order.physical_item_ids());

        let mut delivery = Delivery::start(&start, now).unwrap();
        let registered = delivery.register("courier", "TRK-1", now).unwrap();
        assert_eq!(registered.order_id, order.id());

        let _ = order.attach_tracking_number(&registered.tracking_number, now);
        assert_eq!(order.tracking_number(), Some("TRK-1"));

        let completed = delivery.complete(now).unwrap().unwrap();
        let SagaMessage::DeliveryCompleted(completed) =
            over_the_wire(SagaMessage::DeliveryCompleted(completed))
        else {
            panic!("expected delivery.completed");
        };

        let mut transition = Transition::Unchanged;
        for item_id in &completed.item_ids {
            transition = transition.or(order.advance_item_to_delivered(*item_id, now).unwrap());
        }
        assert!(transition.is_applied());
        assert_eq!(order.status(), OrderStatus::Fulfilled);
        assert_eq!(delivery.status(), DeliveryStatus::Delivered);
    }

    #[test]
    fn replayed_completion_changes_nothing() {
        let now = Utc::now();
        let mut order = mixed_order();
        order.mark_paid(now).unwrap();
        let physical = order.physical_item_ids();

        for item_id in &physical {
            let _ = order.advance_item_to_delivered(*item_id, now).unwrap();
        }
        let updated_at = order.updated_at();

        for item_id in &physical {
            assert_eq!(
                order.advance_item_to_delivered(*item_id, now).unwrap(),
                Transition::Unchanged
            );
        }
        assert_eq!(order.updated_at(), updated_at);
    }

    #[test]
    fn failed_payment_cancels_every_item() {
        let now = Utc::now();
        let mut order = mixed_order();

        assert_eq!(order.mark_failed(now).unwrap(), Transition::Applied);
        assert_eq!(order.status(), OrderStatus::Failed);
        assert!(
            order
                .items()
                .iter()
                .all(|i| i.status == ItemStatus::Cancelled)
        );

        assert!(matches!(
            order.mark_paid(now),
            Err(OrderError::InvalidTransition { .. })
        ));
        assert!(order.mark_cancelled(now).unwrap_err().is_conflict());
    }

    #[test]
    fn fulfilled_order_cannot_fail() {
        let now = Utc::now();
        let cmd = CreateOrder::for_user(UserId::new(), PaymentMethod::Gateway).with_item(
            NewOrderItem::new(ProductType::Sample, "SAMPLE-1", 1, Money::from_cents(199)),
        );
        let mut order = Order::create(cmd, now).unwrap();
        order.mark_paid(now).unwrap();
        let item_id = order.items()[0].id;
        order.unlock_digital_item(item_id, now).unwrap();
        assert_eq!(order.status(), OrderStatus::Fulfilled);

        let err = order.mark_failed(now).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(order.status(), OrderStatus::Fulfilled);
        assert!(matches!(
            order.delivery_request(now),
            Err(OrderError::NothingToDeliver)
        ));
    }
}

mod delivery_lifecycle {
    use super::*;

    #[test]
    fn failed_registration_can_be_retried() {
        let now = Utc::now();
        let order = mixed_order();
        let mut delivery = Delivery::start(&order.delivery_request(now).unwrap(), now).unwrap();

        delivery.fail("courier unavailable", now).unwrap();
        assert_eq!(delivery.status(), DeliveryStatus::Failed);
        assert_eq!(delivery.failure_reason(), Some("courier unavailable"));
        assert!(matches!(
            delivery.complete(now),
            Err(DeliveryError::InvalidTransition { .. })
        ));

        assert_eq!(delivery.reset_for_retry(now).unwrap(), Transition::Applied);
        delivery.register("courier", "TRK-2", now).unwrap();
        assert_eq!(delivery.failure_reason(), None);
        assert_eq!(delivery.tracking_number(), Some("TRK-2"));
    }

    #[test]
    fn in_transit_then_delivered_once() {
        let now = Utc::now();
        let order = mixed_order();
        let mut delivery = Delivery::start(&order.delivery_request(now).unwrap(), now).unwrap();
        delivery.register("courier", "TRK-3", now).unwrap();

        assert_eq!(delivery.mark_in_transit(now).unwrap(), Transition::Applied);
        assert_eq!(delivery.mark_in_transit(now).unwrap(), Transition::Unchanged);

        assert!(delivery.complete(now).unwrap().is_some());
        assert!(delivery.complete(now).unwrap().is_none());
        assert!(delivery.completed_at().is_some());
    }
}

mod messages {
    use super::*;

    #[test]
    fn unknown_topic_and_bad_payload_are_rejected() {
        let payload = serde_json::json!({ "order_id": "not-a-uuid" });

        assert!(SagaMessage::decode("delivery.unknown", &payload).is_err());
        assert!(SagaMessage::decode(topics::DELIVERY_START, &payload).is_err());
    }

    #[test]
    fn message_is_keyed_by_order() {
        let now = Utc::now();
        let order = mixed_order();
        let message = SagaMessage::DeliveryStart(order.delivery_request(now).unwrap());

        assert_eq!(message.order_id(), order.id());
        assert_eq!(message.topic(), topics::DELIVERY_START);
    }
}
