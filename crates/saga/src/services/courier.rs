//! Courier integration: the registration call that turns a shipment into a
//! tracking number.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// What the courier needs to pick up and drop off a parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourierRequest {
    /// Our reference for the shipment.
    pub order_id: OrderId,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub item_count: usize,
}

/// Trait for courier registration.
#[async_trait]
pub trait CourierClient: Send + Sync {
    /// Courier name stored on the delivery.
    fn name(&self) -> &str;

    /// Registers a shipment and returns its tracking number.
    async fn register(&self, request: &CourierRequest) -> Result<String, SagaError>;
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    tracking_number: String,
}

/// Courier client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCourierClient {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

impl HttpCourierClient {
    /// Creates a client whose every request is bounded by `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SagaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::Courier(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: name.into(),
        })
    }
}

#[async_trait]
impl CourierClient for HttpCourierClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn register(&self, request: &CourierRequest) -> Result<String, SagaError> {
        let url = format!("{}/shipments", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SagaError::Courier(format!("request to {url} timed out"))
                } else {
                    SagaError::Courier(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SagaError::Courier(format!(
                "registration rejected with {status}: {body}"
            )));
        }

        let body: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| SagaError::Courier(format!("unreadable registration response: {e}")))?;
        Ok(body.tracking_number)
    }
}

/// Courier stand-in for environments without a courier integration.
///
/// Hands out `TEST-XXXXXXXX` tracking numbers. Tests can queue exact numbers
/// or make registration fail.
#[derive(Debug, Clone, Default)]
pub struct SimulatedCourier {
    queued: Arc<Mutex<VecDeque<String>>>,
    fail: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl SimulatedCourier {
    pub const NAME: &'static str = "simulated";

    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a tracking number to hand out before generating random ones.
    pub fn queue_tracking_number(&self, tracking_number: impl Into<String>) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(tracking_number.into());
    }

    /// Configures registration to fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of registration calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_tracking_number(&self) -> String {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        queued.unwrap_or_else(|| {
            let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
            format!("TEST-{}", &hex[..8])
        })
    }
}

#[async_trait]
impl CourierClient for SimulatedCourier {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn register(&self, request: &CourierRequest) -> Result<String, SagaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::Courier("simulated courier unavailable".to_string()));
        }

        let tracking_number = self.next_tracking_number();
        tracing::info!(
            order_id = %request.order_id,
            %tracking_number,
            "simulated courier registration"
        );
        Ok(tracking_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CourierRequest {
        CourierRequest {
            order_id: OrderId::new(),
            name: "Ada".to_string(),
            phone: "+100000".to_string(),
            address: "12 Main St".to_string(),
            item_count: 1,
        }
    }

    #[tokio::test]
    async fn test_simulated_tracking_number_format() {
        let courier = SimulatedCourier::new();
        let tracking = courier.register(&request()).await.unwrap();

        assert!(tracking.starts_with("TEST-"));
        let suffix = &tracking[5..];
        assert_eq!(suffix.len(), 8);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
    }

    #[tokio::test]
    async fn test_queued_tracking_numbers_first() {
        let courier = SimulatedCourier::new();
        courier.queue_tracking_number("TEST-AB12CD34");

        assert_eq!(courier.register(&request()).await.unwrap(), "TEST-AB12CD34");
        assert_ne!(courier.register(&request()).await.unwrap(), "TEST-AB12CD34");
        assert_eq!(courier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fail_toggle() {
        let courier = SimulatedCourier::new();
        courier.set_fail(true);
        assert!(matches!(
            courier.register(&request()).await,
            Err(SagaError::Courier(_))
        ));

        courier.set_fail(false);
        assert!(courier.register(&request()).await.is_ok());
    }

    #[test]
    fn test_http_client_trims_base_url() {
        let client =
            HttpCourierClient::new("http://courier.local/", "acme", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base_url, "http://courier.local");
        assert_eq!(client.name(), "acme");
    }
}
