//! Payment gateway integration: signed webhook callbacks.

mod signature;
mod webhook;

pub use signature::{SIGNATURE_HEADER, SignatureVerifier};
pub use webhook::{PaymentEvent, PaymentWebhookHandler, WebhookOutcome, event_types};
