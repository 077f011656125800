//! HTTP boundary and process wiring for the order fulfillment saga.
//!
//! Builds the saga services on top of a store, starts the background workers
//! (outbox relay, consumers, stale-order reaper, simulated completions) and
//! exposes the REST and webhook endpoints with tracing and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::topics;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    BrokerMessage, CompletionScheduler, ConsumerConfig, ConsumerRunner, CourierClient,
    DeliveryOrchestrator, DeliveryStartHandler, HttpCourierClient, InMemoryBroker, InMemoryCatalog,
    InMemoryDigitalFulfillment, MessageBroker, OrderEventConsumer, OrderService, OutboxRelay,
    PaymentWebhookHandler, PriceCatalog, RelayConfig, SagaError, SignatureVerifier,
    SimulatedCourier, StaleOrderReaper, run_completion_worker,
};
use store::SagaStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::{Config, CourierMode};

/// Shared state handed to every route.
pub struct AppState<S: SagaStore> {
    pub orders: Arc<OrderService<S>>,
    pub payment_webhook: PaymentWebhookHandler<S>,
    pub deliveries: Arc<DeliveryOrchestrator<S>>,
    /// `"postgres"` or `"memory"`, reported by the health check.
    pub store_kind: &'static str,
}

/// Everything the process runs, built but not started.
pub struct Services<S: SagaStore> {
    state: Arc<AppState<S>>,
    relay: OutboxRelay<S>,
    reaper: StaleOrderReaper<S>,
    consumers: Vec<(ConsumerRunner, mpsc::UnboundedReceiver<BrokerMessage>)>,
    completions: Option<mpsc::UnboundedReceiver<String>>,
}

impl<S: SagaStore + 'static> Services<S> {
    /// Starts every background worker; each stops once `shutdown` flips to true.
    ///
    /// Consumers are told to stop only after the relay has stopped, and then
    /// handle whatever is still queued, so nothing the relay marked processed
    /// is dropped on a clean shutdown.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (Arc<AppState<S>>, Vec<JoinHandle<()>>) {
        let mut workers = Vec::new();

        if let Some(completions) = self.completions {
            workers.push(tokio::spawn(run_completion_worker(
                Arc::clone(&self.state.deliveries),
                completions,
                shutdown.clone(),
            )));
        }
        let (drain_tx, drain_rx) = watch::channel(false);
        for (runner, messages) in self.consumers {
            workers.push(tokio::spawn(runner.run(messages, drain_rx.clone())));
        }
        workers.push(tokio::spawn(self.reaper.run(shutdown.clone())));

        let relay = tokio::spawn(self.relay.run(shutdown));
        workers.push(tokio::spawn(async move {
            if let Err(e) = relay.await {
                tracing::error!(error = %e, "outbox relay task failed");
            }
            let _ = drain_tx.send(true);
        }));

        (self.state, workers)
    }
}

fn build_catalog(config: &Config) -> Result<Arc<dyn PriceCatalog>, SagaError> {
    let catalog = match &config.catalog_path {
        Some(path) => InMemoryCatalog::load(path)?,
        None => InMemoryCatalog::sample(),
    };
    tracing::info!(products = catalog.len(), "price catalog loaded");
    Ok(Arc::new(catalog))
}

fn build_courier(config: &Config) -> Result<Arc<dyn CourierClient>, SagaError> {
    match config.courier_mode {
        CourierMode::Http => {
            let base_url = config
                .courier_base_url
                .as_deref()
                .ok_or_else(|| SagaError::Courier("COURIER_BASE_URL is not set".to_string()))?;
            Ok(Arc::new(HttpCourierClient::new(
                base_url,
                config.courier_name.as_str(),
                config.courier_timeout,
            )?))
        }
        CourierMode::Simulated => {
            tracing::warn!("courier simulation enabled; deliveries get synthetic tracking numbers");
            Ok(Arc::new(SimulatedCourier::new()))
        }
    }
}

/// Wires the saga services over `store` according to `config`.
///
/// Broker subscriptions are made here, before any worker runs, so nothing the
/// relay publishes can be missed.
pub fn build_services<S: SagaStore + 'static>(
    config: &Config,
    store: Arc<S>,
    store_kind: &'static str,
) -> Result<Services<S>, SagaError> {
    let catalog = build_catalog(config)?;
    let courier = build_courier(config)?;

    let orders = Arc::new(OrderService::new(Arc::clone(&store), catalog));

    let mut deliveries =
        DeliveryOrchestrator::new(Arc::clone(&store), courier, config.courier_timeout);
    let mut completions = None;
    if let (CourierMode::Simulated, Some(delay)) =
        (config.courier_mode, config.simulated_completion_delay)
    {
        let (scheduler, rx) = CompletionScheduler::new(delay);
        deliveries = deliveries.with_scheduler(scheduler);
        completions = Some(rx);
    }
    let deliveries = Arc::new(deliveries);

    let verifier = SignatureVerifier::new(config.webhook_secret.clone(), config.webhook_tolerance);
    let payment_webhook = PaymentWebhookHandler::new(
        Arc::clone(&orders),
        Arc::new(InMemoryDigitalFulfillment::new()),
        verifier,
    );

    let broker = InMemoryBroker::new();
    let publisher: Arc<dyn MessageBroker> = Arc::new(broker.clone());
    let consumer_config = ConsumerConfig {
        max_attempts: config.consumer_max_attempts,
        base_backoff: config.consumer_backoff,
        ..ConsumerConfig::default()
    };

    let delivery_side = (
        ConsumerRunner::new(
            Arc::new(DeliveryStartHandler::new(Arc::clone(&deliveries))),
            Arc::clone(&publisher),
            consumer_config.clone(),
        ),
        broker.subscribe(&[topics::DELIVERY_START]),
    );
    let order_side = (
        ConsumerRunner::new(
            Arc::new(OrderEventConsumer::new(Arc::clone(&orders))),
            Arc::clone(&publisher),
            consumer_config,
        ),
        broker.subscribe(&[topics::DELIVERY_REGISTERED, topics::DELIVERY_COMPLETED]),
    );

    let relay = OutboxRelay::new(
        Arc::clone(&store),
        publisher,
        RelayConfig {
            interval: config.relay_interval,
            batch_size: config.outbox_batch_size,
            max_attempts: config.outbox_max_attempts,
            ..RelayConfig::default()
        },
    );
    let reaper = StaleOrderReaper::new(
        Arc::clone(&orders),
        config.stale_order_age,
        config.reaper_interval,
    );

    Ok(Services {
        state: Arc::new(AppState {
            orders,
            payment_webhook,
            deliveries,
            store_kind,
        }),
        relay,
        reaper,
        consumers: vec![delivery_side, order_side],
        completions,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/payment/webhook", post(routes::payment::receive::<S>))
        .route(
            "/courier/webhook/delivery-completed",
            post(routes::courier::delivery_status::<S>),
        )
        .route(
            "/internal/orders/{id}/mark-paid",
            post(routes::internal::mark_paid::<S>),
        )
        .route(
            "/internal/orders/{id}/mark-failed",
            post(routes::internal::mark_failed::<S>),
        )
        .route(
            "/internal/orders/{id}/mark-cancelled",
            post(routes::internal::mark_cancelled::<S>),
        )
        .route(
            "/internal/orders/{id}/start-delivery",
            post(routes::internal::start_delivery::<S>),
        )
        .route(
            "/internal/orders/{id}/mark-items-delivered",
            post(routes::internal::mark_items_delivered::<S>),
        )
        .route(
            "/internal/orders/{id}/items/{item_id}/mark-shipped",
            post(routes::internal::mark_item_shipped::<S>),
        )
        .route(
            "/internal/orders/{id}/items/{item_id}/mark-delivered",
            post(routes::internal::mark_item_delivered::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
