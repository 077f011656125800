//! Stale-order reaper: cancels abandoned checkouts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use store::SagaStore;
use tokio::sync::watch;

use crate::error::Result;
use crate::order_service::OrderService;

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub cancelled: usize,
    pub failed: usize,
}

/// Periodically cancels PENDING orders older than `max_age`.
///
/// Orders whose delivery was explicitly started (cash on delivery) are not
/// abandoned checkouts and are left alone.
pub struct StaleOrderReaper<S: SagaStore> {
    orders: Arc<OrderService<S>>,
    max_age: Duration,
    interval: Duration,
}

impl<S: SagaStore> StaleOrderReaper<S> {
    pub fn new(orders: Arc<OrderService<S>>, max_age: Duration, interval: Duration) -> Self {
        Self {
            orders,
            max_age,
            interval,
        }
    }

    /// Sweeps as of `now`. Per-order failures are logged and the sweep continues.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = ReapReport::default();
        for order_id in self.orders.stale_pending_orders(cutoff).await? {
            match self.orders.mark_cancelled(order_id).await {
                Ok(update) if update.transition.is_applied() => {
                    report.cancelled += 1;
                    metrics::counter!("stale_orders_cancelled_total").increment(1);
                    tracing::info!(%order_id, "stale pending order cancelled");
                }
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(%order_id, error = %e, "failed to cancel stale order");
                }
            }
        }
        Ok(report)
    }

    pub async fn sweep(&self) -> Result<ReapReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweeps every `interval` until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.interval, max_age = ?self.max_age, "stale-order reaper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.cancelled > 0 || report.failed > 0 => {
                            tracing::info!(?report, "stale-order sweep");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "stale-order sweep failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("stale-order reaper stopped");
    }
}
