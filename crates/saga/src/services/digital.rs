//! Digital fulfillment: unlocking samples and packs for the buyer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{ItemId, OrderId, UserId};
use domain::OrderItem;

use crate::error::SagaError;

/// Trait for the collaborator that grants access to digital goods.
#[async_trait]
pub trait DigitalFulfillment: Send + Sync {
    /// Unlocks a paid digital item for its buyer.
    async fn unlock(&self, user_id: UserId, item: &OrderItem) -> Result<(), SagaError>;
}

/// In-memory digital fulfillment that records every unlock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDigitalFulfillment {
    unlocked: Arc<Mutex<Vec<(OrderId, ItemId)>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryDigitalFulfillment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures unlocks to fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns every `(order, item)` unlocked so far, in call order.
    pub fn unlocked(&self) -> Vec<(OrderId, ItemId)> {
        self.unlocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn unlock_count(&self) -> usize {
        self.unlocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl DigitalFulfillment for InMemoryDigitalFulfillment {
    async fn unlock(&self, user_id: UserId, item: &OrderItem) -> Result<(), SagaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::DigitalFulfillment(format!(
                "cannot unlock {} for {user_id}",
                item.product_id
            )));
        }
        self.unlocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((item.order_id, item.id));
        Ok(())
    }
}
