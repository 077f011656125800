//! Persistence for the order fulfillment saga.
//!
//! Aggregates are stored as plain rows with a `version` column. Every save
//! carries the outbox rows produced by the same transition, and both are
//! committed together or not at all.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use outbox::OutboxEvent;
pub use postgres::PostgresStore;
pub use store::{DeliveryStore, OrderStore, OutboxStore, SagaStore};
