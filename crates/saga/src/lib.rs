//! Order fulfillment saga.
//!
//! The order side and the delivery side never share a transaction. Each side
//! commits its own state together with outbox rows, the relay publishes those
//! rows to the broker keyed by order id, and the other side consumes them:
//!
//! 1. Payment webhook marks the order PAID and writes `delivery.start`
//! 2. Delivery orchestrator registers the shipment and writes `delivery.registered`
//! 3. Courier webhook completes the delivery and writes `delivery.completed`
//! 4. Order-side consumer walks the items to DELIVERED and the order to FULFILLED
//!
//! Every message may arrive more than once; every transition tolerates it.

pub mod broker;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod order_service;
pub mod payment;
pub mod reaper;
pub mod relay;
pub mod scheduler;
pub mod services;

#[cfg(test)]
mod test_support;

pub use broker::{BrokerMessage, InMemoryBroker, MessageBroker};
pub use consumer::{ConsumeOutcome, ConsumerConfig, ConsumerRunner, MessageHandler};
pub use delivery::DeliveryOrchestrator;
pub use error::{Result, SagaError};
pub use handlers::{DeliveryStartHandler, OrderEventConsumer};
pub use order_service::{Checkout, CheckoutLine, OrderService, OrderUpdate};
pub use payment::{
    PaymentEvent, PaymentWebhookHandler, SIGNATURE_HEADER, SignatureVerifier, WebhookOutcome,
};
pub use reaper::{ReapReport, StaleOrderReaper};
pub use relay::{OutboxRelay, RelayConfig, RelayReport};
pub use scheduler::{CompletionScheduler, run_completion_worker};
pub use services::{
    CourierClient, CourierRequest, DigitalFulfillment, HttpCourierClient, InMemoryCatalog,
    InMemoryDigitalFulfillment, PriceCatalog, SimulatedCourier,
};
