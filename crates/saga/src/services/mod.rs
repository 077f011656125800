//! External collaborators and their in-memory implementations.

pub mod catalog;
pub mod courier;
pub mod digital;

pub use catalog::{InMemoryCatalog, PriceCatalog};
pub use courier::{CourierClient, CourierRequest, HttpCourierClient, SimulatedCourier};
pub use digital::{DigitalFulfillment, InMemoryDigitalFulfillment};
