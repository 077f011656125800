//! Delivery orchestration: start, courier registration, completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::OrderId;
use domain::{Delivery, DeliveryStartData, DeliveryStatus, SagaMessage, Transition};
use store::{OutboxEvent, SagaStore};

use crate::error::{Result, SagaError};
use crate::scheduler::CompletionScheduler;
use crate::services::{CourierClient, CourierRequest};

/// Drives deliveries from a `delivery.start` request to DELIVERED.
pub struct DeliveryOrchestrator<S: SagaStore> {
    store: Arc<S>,
    courier: Arc<dyn CourierClient>,
    scheduler: Option<CompletionScheduler>,
    registration_timeout: Duration,
}

impl<S: SagaStore> DeliveryOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        courier: Arc<dyn CourierClient>,
        registration_timeout: Duration,
    ) -> Self {
        Self {
            store,
            courier,
            scheduler: None,
            registration_timeout,
        }
    }

    /// Completes every registered delivery automatically through `scheduler`.
    pub fn with_scheduler(mut self, scheduler: CompletionScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn courier_name(&self) -> &str {
        self.courier.name()
    }

    pub async fn delivery_for_order(&self, order_id: OrderId) -> Result<Option<Delivery>> {
        Ok(self.store.find_delivery_by_order(order_id).await?)
    }

    /// Creates the delivery for an order and registers it with the courier.
    ///
    /// At most one delivery exists per order. A REGISTERED, IN_TRANSIT or
    /// DELIVERED delivery is returned as is and the courier is not called. A
    /// PENDING delivery never got its registration recorded (the save failed
    /// or the process died), so registration is attempted again. A FAILED
    /// delivery is retried only for a request issued after the failure;
    /// redeliveries of the original request return it unchanged. A courier
    /// failure or timeout leaves the delivery FAILED without emitting anything;
    /// that is reported through logs and metrics, not as an error.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn start_delivery(&self, request: &DeliveryStartData) -> Result<Delivery> {
        let now = Utc::now();
        let mut delivery = match self.store.find_delivery_by_order(request.order_id).await? {
            Some(pending) if pending.status() == DeliveryStatus::Pending => {
                tracing::warn!(delivery_id = %pending.id(), "resuming unregistered delivery");
                pending
            }
            Some(mut failed) if failed.status() == DeliveryStatus::Failed => {
                if !failed.retry_requested(request.requested_at) {
                    tracing::info!(delivery_id = %failed.id(), "start predates failure, not retrying");
                    return Ok(failed);
                }
                let _ = failed.reset_for_retry(now)?;
                let version = self.store.save_delivery(&failed, Vec::new()).await?;
                failed.set_version(version);
                tracing::info!(delivery_id = %failed.id(), "retrying failed delivery");
                failed
            }
            Some(existing) => {
                tracing::info!(delivery_id = %existing.id(), status = %existing.status(), "delivery already started");
                return Ok(existing);
            }
            None => {
                let mut delivery = Delivery::start(request, now)?;
                match self.store.insert_delivery(&delivery).await {
                    Ok(version) => delivery.set_version(version),
                    Err(e) if e.is_conflict() => {
                        // A concurrent start won the insert.
                        return self
                            .store
                            .find_delivery_by_order(request.order_id)
                            .await?
                            .ok_or_else(|| SagaError::DeliveryNotFound(request.order_id.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                }
                delivery
            }
        };

        let courier_request = CourierRequest {
            order_id: delivery.order_id(),
            name: delivery.contact().name.clone(),
            phone: delivery.contact().phone.clone(),
            address: delivery.address().to_string(),
            item_count: delivery.item_ids().len(),
        };

        let started = Instant::now();
        let registration =
            match tokio::time::timeout(self.registration_timeout, self.courier.register(&courier_request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SagaError::CourierTimeout(self.registration_timeout)),
            };
        metrics::histogram!("courier_registration_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let now = Utc::now();
        match registration {
            Ok(tracking_number) => {
                let registered = delivery.register(self.courier.name(), &tracking_number, now)?;
                let event =
                    OutboxEvent::from_message(&SagaMessage::DeliveryRegistered(registered), now)?;
                let version = self.store.save_delivery(&delivery, vec![event]).await?;
                delivery.set_version(version);

                metrics::counter!("courier_registrations_total", "outcome" => "registered")
                    .increment(1);
                tracing::info!(
                    delivery_id = %delivery.id(),
                    %tracking_number,
                    courier = self.courier.name(),
                    "delivery registered"
                );

                if let Some(scheduler) = &self.scheduler {
                    scheduler.schedule(&tracking_number);
                }
            }
            Err(e) => {
                let _ = delivery.fail(&e.to_string(), now)?;
                let version = self.store.save_delivery(&delivery, Vec::new()).await?;
                delivery.set_version(version);

                let outcome = if matches!(e, SagaError::CourierTimeout(_)) {
                    "timeout"
                } else {
                    "failed"
                };
                metrics::counter!("courier_registrations_total", "outcome" => outcome).increment(1);
                tracing::error!(
                    delivery_id = %delivery.id(),
                    error = %e,
                    "courier registration failed; order stays paid but undelivered"
                );
            }
        }

        Ok(delivery)
    }

    /// Marks the delivery with `tracking_number` DELIVERED and emits
    /// `delivery.completed` with every item of the delivery.
    ///
    /// Completing an already delivered delivery emits nothing.
    #[tracing::instrument(skip(self))]
    pub async fn complete_delivery(&self, tracking_number: &str) -> Result<Delivery> {
        let mut delivery = self.find_by_tracking(tracking_number).await?;

        let now = Utc::now();
        let Some(completed) = delivery.complete(now)? else {
            tracing::info!(delivery_id = %delivery.id(), "delivery already completed");
            return Ok(delivery);
        };

        let event = OutboxEvent::from_message(&SagaMessage::DeliveryCompleted(completed), now)?;
        let version = self.store.save_delivery(&delivery, vec![event]).await?;
        delivery.set_version(version);

        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel(tracking_number);
        }

        metrics::counter!("deliveries_completed_total").increment(1);
        tracing::info!(
            delivery_id = %delivery.id(),
            order_id = %delivery.order_id(),
            items = delivery.item_ids().len(),
            "delivery completed"
        );
        Ok(delivery)
    }

    /// REGISTERED -> IN_TRANSIT on the delivery row; no message is emitted.
    #[tracing::instrument(skip(self))]
    pub async fn mark_in_transit(&self, tracking_number: &str) -> Result<Delivery> {
        let mut delivery = self.find_by_tracking(tracking_number).await?;

        if delivery.mark_in_transit(Utc::now())? == Transition::Applied {
            let version = self.store.save_delivery(&delivery, Vec::new()).await?;
            delivery.set_version(version);
            tracing::info!(delivery_id = %delivery.id(), "delivery in transit");
        }
        Ok(delivery)
    }

    async fn find_by_tracking(&self, tracking_number: &str) -> Result<Delivery> {
        self.store
            .find_delivery_by_tracking(tracking_number)
            .await?
            .ok_or_else(|| SagaError::DeliveryNotFound(tracking_number.to_string()))
    }
}
