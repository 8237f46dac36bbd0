//! Payment provider webhook signatures.
//!
//! The provider signs every notification with HMAC-SHA256 over
//! `"{timestamp}.{payload}"` and sends the result in a header of the form
//! `t=<unix seconds>,v1=<hex digest>[,v1=<hex digest>...]`. More than one
//! `v1` entry appears while the endpoint secret is being rolled.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, SagaError};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Largest accepted age of a signed notification.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Checks webhook signatures against the endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl WebhookVerifier {
    /// A verifier for `secret`. An empty secret rejects every notification.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into_bytes(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Verifies `header` for `payload` against the current time.
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<()> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verifies `header` for `payload` as if the time were `now` (unix seconds).
    pub fn verify_at(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<()> {
        if self.secret.is_empty() {
            return Err(invalid("no webhook secret configured"));
        }
        let header = header.ok_or_else(|| invalid("missing signature header"))?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => {
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or_else(|| invalid("signature has no timestamp"))?;
        if signatures.is_empty() {
            return Err(invalid("signature has no v1 entry"));
        }

        let matched = signatures
            .iter()
            .any(|sig| self.mac(timestamp, payload).is_ok_and(|mac| mac.verify_slice(sig).is_ok()));
        if !matched {
            return Err(invalid("signature does not match payload"));
        }

        let age = now.saturating_sub(timestamp).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(invalid("signature timestamp outside tolerance"));
        }
        Ok(())
    }

    /// Signature header for `payload` signed at `timestamp`, as the provider
    /// would send it.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| invalid(&format!("unusable webhook secret: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

fn invalid(reason: &str) -> SagaError {
    SagaError::InvalidSignature(reason.to_string())
}
