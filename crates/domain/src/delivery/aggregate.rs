use chrono::{DateTime, Utc};
use common::{DeliveryId, ItemId, OrderId, Version};
use serde::{Deserialize, Serialize};

use crate::messages::{DeliveryCompletedData, DeliveryRegisteredData, DeliveryStartData};
use crate::order::CustomerContact;
use crate::transition::Transition;

use super::{DeliveryError, DeliveryStatus};

/// Delivery aggregate root.
///
/// Created from a `delivery.start` request, then driven by the courier:
/// registration stamps the tracking number, the courier webhook completes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    id: DeliveryId,
    #[serde(default)]
    version: Version,
    order_id: OrderId,
    item_ids: Vec<ItemId>,
    address: String,
    contact: CustomerContact,
    status: DeliveryStatus,
    courier_name: Option<String>,
    tracking_number: Option<String>,
    failure_reason: Option<String>,
    registered_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Raw parts of a persisted delivery.
#[derive(Debug, Clone)]
pub struct DeliveryParts {
    pub id: DeliveryId,
    pub version: Version,
    pub order_id: OrderId,
    pub item_ids: Vec<ItemId>,
    pub address: String,
    pub contact: CustomerContact,
    pub status: DeliveryStatus,
    pub courier_name: Option<String>,
    pub tracking_number: Option<String>,
    pub failure_reason: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Creates a pending delivery for a `delivery.start` request.
    pub fn start(request: &DeliveryStartData, now: DateTime<Utc>) -> Result<Self, DeliveryError> {
        if request.item_ids.is_empty() {
            return Err(DeliveryError::NoItems);
        }
        Ok(Self {
            id: DeliveryId::new(),
            version: Version::initial(),
            order_id: request.order_id,
            item_ids: request.item_ids.clone(),
            address: request.address.clone(),
            contact: request.contact.clone(),
            status: DeliveryStatus::Pending,
            courier_name: None,
            tracking_number: None,
            failure_reason: None,
            registered_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn from_parts(parts: DeliveryParts) -> Self {
        Self {
            id: parts.id,
            version: parts.version,
            order_id: parts.order_id,
            item_ids: parts.item_ids,
            address: parts.address,
            contact: parts.contact,
            status: parts.status,
            courier_name: parts.courier_name,
            tracking_number: parts.tracking_number,
            failure_reason: parts.failure_reason,
            registered_at: parts.registered_at,
            completed_at: parts.completed_at,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    pub fn id(&self) -> DeliveryId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn contact(&self) -> &CustomerContact {
        &self.contact
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn courier_name(&self) -> Option<&str> {
        self.courier_name.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.registered_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// When registration failed; a failed delivery is not touched again
    /// until it is reset, so this is its last update.
    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        (self.status == DeliveryStatus::Failed).then_some(self.updated_at)
    }

    /// Whether a start request issued at `requested_at` should retry this
    /// failed delivery. Requests issued before the failure (redeliveries of
    /// the original start) do not.
    pub fn retry_requested(&self, requested_at: DateTime<Utc>) -> bool {
        self.failed_at().is_some_and(|failed_at| requested_at > failed_at)
    }

    /// PENDING -> REGISTERED with the courier's tracking number.
    pub fn register(
        &mut self,
        courier_name: &str,
        tracking_number: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryRegisteredData, DeliveryError> {
        self.ensure(self.status.can_register(), "register")?;
        self.status = DeliveryStatus::Registered;
        self.courier_name = Some(courier_name.to_string());
        self.tracking_number = Some(tracking_number.to_string());
        self.failure_reason = None;
        self.registered_at = Some(now);
        self.updated_at = now;

        Ok(DeliveryRegisteredData {
            order_id: self.order_id,
            delivery_id: self.id,
            tracking_number: tracking_number.to_string(),
            courier_name: courier_name.to_string(),
            registered_at: now,
        })
    }

    /// PENDING|REGISTERED -> FAILED.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<Transition, DeliveryError> {
        if self.status == DeliveryStatus::Failed {
            return Ok(Transition::Unchanged);
        }
        self.ensure(self.status.can_fail(), "fail")?;
        self.status = DeliveryStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// FAILED -> PENDING so registration can be attempted again.
    ///
    /// Only for an explicit new start request; see [`Delivery::retry_requested`].
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<Transition, DeliveryError> {
        if self.status == DeliveryStatus::Pending {
            return Ok(Transition::Unchanged);
        }
        self.ensure(self.status == DeliveryStatus::Failed, "retry")?;
        self.status = DeliveryStatus::Pending;
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// REGISTERED -> IN_TRANSIT; already in transit is a no-op.
    pub fn mark_in_transit(&mut self, now: DateTime<Utc>) -> Result<Transition, DeliveryError> {
        if self.status == DeliveryStatus::InTransit {
            return Ok(Transition::Unchanged);
        }
        self.ensure(self.status == DeliveryStatus::Registered, "mark in transit")?;
        self.status = DeliveryStatus::InTransit;
        self.updated_at = now;
        Ok(Transition::Applied)
    }

    /// REGISTERED|IN_TRANSIT -> DELIVERED.
    ///
    /// Returns the `delivery.completed` payload when the state changed, and
    /// `None` when the delivery was already delivered.
    pub fn complete(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryCompletedData>, DeliveryError> {
        if self.status == DeliveryStatus::Delivered {
            return Ok(None);
        }
        self.ensure(self.status.can_complete(), "complete")?;
        self.status = DeliveryStatus::Delivered;
        self.completed_at = Some(now);
        self.updated_at = now;

        Ok(Some(DeliveryCompletedData {
            order_id: self.order_id,
            delivery_id: self.id,
            item_ids: self.item_ids.clone(),
            completed_at: now,
        }))
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), DeliveryError> {
        if allowed {
            Ok(())
        } else {
            Err(DeliveryError::InvalidTransition {
                delivery_id: self.id,
                current_state: self.status,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Delivery {
        let request = DeliveryStartData {
            order_id: OrderId::new(),
            item_ids: vec![ItemId::new(), ItemId::new()],
            address: "12 Main St".to_string(),
            contact: CustomerContact::new("Ada", "+100000"),
            requested_at: Utc::now(),
        };
        Delivery::start(&request, Utc::now()).unwrap()
    }

    #[test]
    fn test_start_requires_items() {
        let request = DeliveryStartData {
            order_id: OrderId::new(),
            item_ids: vec![],
            address: "12 Main St".to_string(),
            contact: CustomerContact::default(),
            requested_at: Utc::now(),
        };
        assert!(matches!(
            Delivery::start(&request, Utc::now()),
            Err(DeliveryError::NoItems)
        ));
    }

    #[test]
    fn test_register_then_complete() {
        let mut delivery = pending();
        let registered = delivery
            .register("simulated", "TEST-AB12CD34", Utc::now())
            .unwrap();
        assert_eq!(registered.tracking_number, "TEST-AB12CD34");
        assert_eq!(delivery.status(), DeliveryStatus::Registered);

        let completed = delivery.complete(Utc::now()).unwrap().unwrap();
        assert_eq!(completed.item_ids, delivery.item_ids());
        assert_eq!(delivery.status(), DeliveryStatus::Delivered);
        assert!(delivery.completed_at().is_some());
    }

    #[test]
    fn test_complete_twice_emits_once() {
        let mut delivery = pending();
        delivery.register("simulated", "TEST-1", Utc::now()).unwrap();
        assert!(delivery.complete(Utc::now()).unwrap().is_some());
        assert!(delivery.complete(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_complete_from_pending_is_rejected() {
        let mut delivery = pending();
        assert!(matches!(
            delivery.complete(Utc::now()),
            Err(DeliveryError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_in_transit_then_complete() {
        let mut delivery = pending();
        delivery.register("simulated", "TEST-2", Utc::now()).unwrap();
        assert_eq!(
            delivery.mark_in_transit(Utc::now()).unwrap(),
            Transition::Applied
        );
        assert_eq!(
            delivery.mark_in_transit(Utc::now()).unwrap(),
            Transition::Unchanged
        );
        assert!(delivery.complete(Utc::now()).unwrap().is_some());
    }

    #[test]
    fn test_fail_and_retry() {
        let mut delivery = pending();
        assert_eq!(
            delivery.fail("courier down", Utc::now()).unwrap(),
            Transition::Applied
        );
        assert_eq!(delivery.failure_reason(), Some("courier down"));
        assert!(delivery.register("simulated", "TEST-3", Utc::now()).is_err());

        assert_eq!(
            delivery.reset_for_retry(Utc::now()).unwrap(),
            Transition::Applied
        );
        delivery.register("simulated", "TEST-3", Utc::now()).unwrap();
        assert_eq!(delivery.failure_reason(), None);
    }

    #[test]
    fn test_retry_only_for_requests_after_failure() {
        let requested_at = Utc::now();
        let mut delivery = pending();
        assert!(!delivery.retry_requested(Utc::now()));

        let failed_at = requested_at + chrono::Duration::seconds(1);
        delivery.fail("courier down", failed_at).unwrap();
        assert_eq!(delivery.failed_at(), Some(failed_at));
        assert!(!delivery.retry_requested(requested_at));
        assert!(delivery.retry_requested(failed_at + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_cannot_fail_after_transit() {
        let mut delivery = pending();
        delivery.register("simulated", "TEST-4", Utc::now()).unwrap();
        delivery.mark_in_transit(Utc::now()).unwrap();
        assert!(delivery.fail("late", Utc::now()).is_err());
    }
}
