//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from mimora-core, the store and the KYC orchestrator
//! to HTTP status codes. Returns JSON error bodies with error code, message,
//! and details. Never exposes internal or upstream error details.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::kyc::KycError;
use crate::store::StoreError;

/// Structured JSON error response body.
///
/// All error responses use this format. The `details` field carries extra
/// machine-readable context (e.g. `{"retryable": true}` on provider
/// failures) and is omitted otherwise.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials or signature (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller may not act on this resource (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),

    /// The KYC provider or mail relay failed (502).
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// The KYC provider did not answer in time (504).
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Service dependency not configured (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::UpstreamError(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::UpstreamTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }

    /// Construct a service unavailable error (503).
    pub fn service_unavailable(msg: &str) -> Self {
        Self::ServiceUnavailable(msg.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::UpstreamError(_) => "The verification provider could not complete the request".to_string(),
            Self::UpstreamTimeout(_) => "The verification provider did not respond in time".to_string(),
            other => other.to_string(),
        };

        let details = match &self {
            Self::UpstreamError(_) | Self::UpstreamTimeout(_) => {
                Some(serde_json::json!({ "retryable": true }))
            }
            _ => None,
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::UpstreamError(_) | Self::UpstreamTimeout(_) => {
                tracing::error!(error = %self, "upstream failure")
            }
            Self::ServiceUnavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Convert mimora-core validation errors to API errors.
impl From<mimora_core::ValidationError> for AppError {
    fn from(err: mimora_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Expired and mismatched codes are credential failures; a malformed code is
/// a validation error.
impl From<mimora_core::OtpError> for AppError {
    fn from(err: mimora_core::OtpError) -> Self {
        match err {
            mimora_core::OtpError::Malformed { .. } => Self::Validation(err.to_string()),
            mimora_core::OtpError::Expired | mimora_core::OtpError::Mismatch => {
                Self::Unauthorized(err.to_string())
            }
            mimora_core::OtpError::Hash(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProfileNotFound(_) | StoreError::RequestNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            StoreError::Duplicate(_) => Self::Conflict(err.to_string()),
            StoreError::Database(_) | StoreError::Corrupt(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<KycError> for AppError {
    fn from(err: KycError) -> Self {
        match err {
            KycError::Validation(msg) => Self::Validation(msg),
            KycError::ProfileNotFound(_) | KycError::RequestNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            KycError::Unauthenticated(msg) => Self::Unauthorized(msg),
            KycError::Forbidden(msg) => Self::Forbidden(msg),
            KycError::Provider(ref e) if e.is_timeout() => Self::UpstreamTimeout(err.to_string()),
            KycError::Provider(_) => Self::UpstreamError(err.to_string()),
            KycError::ProviderNotConfigured => Self::service_unavailable(
                "KYC provider not configured. Set MEON_SECRET_KEY environment variable.",
            ),
            KycError::Transition(_) => Self::Conflict(err.to_string()),
            KycError::Store(store) => Self::from(store),
        }
    }
}
