//! Callback signatures: lowercase hex HMAC-SHA256 over the canonical JSON
//! bytes of the payload, carried in `X-Meon-Signature`. The canonical form
//! is byte-identical to Python's `json.dumps(payload, sort_keys=True)`, so
//! a provider signing that way verifies here unchanged.

use hmac::{Hmac, Mac};
use mimora_core::CanonicalBytes;
use serde_json::Value;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::KycError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the callback signature.
pub const SIGNATURE_HEADER: &str = "x-meon-signature";

/// Verifies provider callback signatures with a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Zeroizing<String>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Read `MEON_WEBHOOK_SECRET`. Unset or blank means callbacks are not
    /// signature-checked.
    pub fn from_env() -> Option<Self> {
        std::env::var("MEON_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(Self::new)
    }

    fn mac_over(&self, payload: &Value) -> Result<HmacSha256, KycError> {
        let canonical = CanonicalBytes::new(payload)
            .map_err(|e| KycError::Validation(format!("payload cannot be canonicalized: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| KycError::Validation(format!("HMAC key rejected: {e}")))?;
        mac.update(canonical.as_bytes());
        Ok(mac)
    }

    /// Signature the provider is expected to send for `payload`.
    pub fn sign(&self, payload: &Value) -> Result<String, KycError> {
        Ok(hex::encode(self.mac_over(payload)?.finalize().into_bytes()))
    }

    /// Check `provided` against `payload` in constant time.
    pub fn verify(&self, payload: &Value, provided: Option<&str>) -> Result<(), KycError> {
        let provided = provided
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| KycError::Unauthenticated("missing webhook signature".into()))?;
        let provided = hex::decode(provided)
            .map_err(|_| KycError::Unauthenticated("invalid webhook signature".into()))?;
        self.mac_over(payload)?
            .verify_slice(&provided)
            .map_err(|_| KycError::Unauthenticated("invalid webhook signature".into()))
    }
}
