//! # Error Types
//!
//! Error hierarchy shared across the workspace. All errors derive
//! `thiserror::Error`; higher layers wrap these rather than stringifying them.

use thiserror::Error;

/// Top-level error type for core operations.
#[derive(Error, Debug)]
pub enum MimoraError {
    /// Canonicalization failed.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// Input validation failed.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// One-time code handling failed.
    #[error("one-time code error: {0}")]
    Otp(#[from] OtpError),
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Validation errors for identifiers and contact fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A profile id was not a valid UUID.
    #[error("invalid profile id: {0:?}")]
    InvalidProfileId(String),

    /// A verification request id was not a valid UUID.
    #[error("invalid verification request id: {0:?}")]
    InvalidRequestId(String),

    /// A profile role string is not recognized.
    #[error("unknown profile role: {0:?}")]
    UnknownRole(String),

    /// An email address is malformed.
    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),
}

/// Errors from one-time code generation and checking.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    /// The submitted code does not match the stored hash.
    #[error("one-time code does not match")]
    Mismatch,

    /// The challenge has passed its expiry time.
    #[error("one-time code expired")]
    Expired,

    /// The submitted code is not exactly six ASCII digits.
    #[error("one-time code must be {expected} digits")]
    Malformed {
        /// Required code length.
        expected: usize,
    },

    /// Hashing failed or the stored hash is unreadable.
    #[error("one-time code hashing failed: {0}")]
    Hash(String),
}
