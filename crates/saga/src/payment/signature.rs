use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, SagaError};

/// Header carrying `t=<unix seconds>,v1=<hex hmac>`.
pub const SIGNATURE_HEADER: &str = "Payment-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Verifies gateway callbacks signed with a shared secret.
///
/// The MAC covers `"<t>.<raw body>"`, so a captured body cannot be replayed
/// with a fresh timestamp, and timestamps outside the tolerance are refused.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SagaError::InvalidSignature("HMAC key error".to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// Hex signature of `body` at `timestamp`.
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> Result<String> {
        let mac = self.mac(&timestamp.to_string(), body)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Full header value for `body` at `timestamp`.
    pub fn header_value(&self, timestamp: i64, body: &[u8]) -> Result<String> {
        Ok(format!("t={timestamp},v1={}", self.sign(timestamp, body)?))
    }

    /// Checks `header` against `body` as of `now`.
    pub fn verify(&self, header: &str, body: &[u8], now: DateTime<Utc>) -> Result<()> {
        let mut timestamp = "";
        let mut signature = "";
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = t;
            } else if let Some(v) = part.strip_prefix("v1=") {
                signature = v;
            }
        }

        if timestamp.is_empty() || signature.is_empty() {
            return Err(SagaError::InvalidSignature(
                "missing timestamp or signature".to_string(),
            ));
        }

        let sig_bytes = hex::decode(signature)
            .map_err(|_| SagaError::InvalidSignature("signature is not hex".to_string()))?;
        self.mac(timestamp, body)?
            .verify_slice(&sig_bytes)
            .map_err(|_| SagaError::InvalidSignature("signature mismatch".to_string()))?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| SagaError::InvalidSignature("invalid timestamp".to_string()))?;
        let age = now.timestamp().saturating_sub(ts).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(SagaError::InvalidSignature(format!(
                "timestamp outside tolerance ({age}s)"
            )));
        }

        Ok(())
    }
}
