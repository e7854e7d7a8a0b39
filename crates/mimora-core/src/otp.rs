//! # One-Time Codes
//!
//! Six-digit email login codes. Codes are drawn from the OS CSPRNG, stored
//! only as Argon2id PHC strings, and expire [`OTP_TTL_SECS`] after issue.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};

use crate::error::OtpError;

/// Number of decimal digits in a code.
pub const OTP_LENGTH: usize = 6;

/// Lifetime of an issued code.
pub const OTP_TTL_SECS: i64 = 300;

const CODE_SPACE: u32 = 1_000_000;

/// A freshly generated plaintext code.
///
/// Only ever held long enough to hash it and hand it to the mailer.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimeCode(String);

impl std::fmt::Debug for OneTimeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OneTimeCode").field(&"[REDACTED]").finish()
    }
}

impl OneTimeCode {
    /// Draw a uniformly distributed six-digit code.
    pub fn generate() -> Self {
        // Rejection sampling removes the modulo bias of `u32 % 1_000_000`.
        let zone = u32::MAX - (u32::MAX % CODE_SPACE);
        let n = loop {
            let candidate = OsRng.next_u32();
            if candidate < zone {
                break candidate % CODE_SPACE;
            }
        };
        Self(format!("{n:0width$}", width = OTP_LENGTH))
    }

    /// The plaintext digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash the code for storage.
    pub fn hash(&self) -> Result<String, OtpError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(self.0.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| OtpError::Hash(e.to_string()))
    }

    /// Expiry instant for a code issued at `issued_at`.
    pub fn expiry_from(issued_at: DateTime<Utc>) -> DateTime<Utc> {
        issued_at + Duration::seconds(OTP_TTL_SECS)
    }
}

/// Check a submitted code against a stored hash and expiry.
///
/// Expiry is checked before the hash so an expired challenge never costs an
/// Argon2 evaluation.
pub fn verify(
    submitted: &str,
    stored_hash: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), OtpError> {
    let submitted = submitted.trim();
    if submitted.len() != OTP_LENGTH || !submitted.bytes().all(|b| b.is_ascii_digit()) {
        return Err(OtpError::Malformed {
            expected: OTP_LENGTH,
        });
    }
    if now >= expires_at {
        return Err(OtpError::Expired);
    }
    let parsed = PasswordHash::new(stored_hash).map_err(|e| OtpError::Hash(e.to_string()))?;
    Argon2::default()
        .verify_password(submitted.as_bytes(), &parsed)
        .map_err(|_| OtpError::Mismatch)
}
