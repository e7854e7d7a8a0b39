//! # KYC Orchestration
//!
//! Drives the two-step (document, then face) verification of a profile
//! against the external provider and reconciles the provider's callbacks.
//!
//! - [`orchestrator`]: start, face step, retry and status query.
//! - [`reconciler`]: authenticated callback intake and state advance.
//! - [`signature`]: HMAC-SHA256 callback signatures.
//!
//! State rules live in `mimora-state`; this module sequences store reads,
//! provider calls and store writes around them. Provider calls are never
//! made while a store lock or transaction is held.

pub mod orchestrator;
pub mod reconciler;
pub mod signature;

pub use orchestrator::KycOrchestrator;
pub use reconciler::{CallbackPayload, WebhookReconciler};
pub use signature::WebhookVerifier;

use mimora_core::ProfileId;
use mimora_kyc_client::ProviderError;
use mimora_state::KycTransitionError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::StoreError;

/// Errors raised by KYC operations.
#[derive(Debug, thiserror::Error)]
pub enum KycError {
    #[error("{0}")]
    Validation(String),
    #[error("profile {0} not found")]
    ProfileNotFound(ProfileId),
    #[error("no verification request matches {0}")]
    RequestNotFound(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("KYC provider not configured")]
    ProviderNotConfigured,
    #[error(transparent)]
    Transition(#[from] KycTransitionError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for KycError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProfileNotFound(id) => Self::ProfileNotFound(id),
            StoreError::RequestNotFound(id) => Self::RequestNotFound(id.to_string()),
            other => Self::Store(other),
        }
    }
}

// ── Response DTOs ───────────────────────────────────────────────────────────

/// Outcome of a start, face-step or retry call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    /// A provider session was opened by this call.
    Initiated,
    /// The profile is already verified; nothing was done.
    AlreadyVerified,
    /// A session already exists; it is returned unchanged.
    InProgress,
    /// The face step needs a verified document first.
    DocumentPending,
    /// The face check already passed.
    FaceAlreadyVerified,
}

/// Response of `StartVerification`, `StartFaceStep` and `RetryVerification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StartOutcome {
    pub status: StartStatus,
    /// Where to send the user to continue with the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Provider session handle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: String,
}

impl StartOutcome {
    pub(crate) fn without_session(status: StartStatus, message: &str) -> Self {
        Self {
            status,
            redirect_url: None,
            session_id: None,
            message: message.to_string(),
        }
    }
}

/// Read-only verification summary for a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct KycStatusView {
    #[schema(value_type = String, format = Uuid)]
    pub profile_id: ProfileId,
    pub username: String,
    pub kyc_verified: bool,
    pub bank_verified: bool,
    /// Status of the newest request, or `not_started`.
    pub request_status: String,
    pub document_verified: bool,
    pub face_verified: bool,
    pub current_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_kyc_id: Option<String>,
    /// Newest callback entry recorded on the newest request.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub last_verification: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// Acknowledgement returned to the provider for an accepted callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CallbackReceipt {
    pub accepted: bool,
    #[schema(value_type = String, format = Uuid)]
    pub profile_id: ProfileId,
    pub request_status: String,
    pub document_verified: bool,
    pub face_verified: bool,
    pub current_step: String,
    pub kyc_verified: bool,
    pub message: String,
    /// Whether the callback moved the request's progress.
    #[serde(skip)]
    pub transitioned: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimora_core::VerificationRequestId;

    #[test]
    fn start_status_serializes_snake_case() {
        let json = serde_json::to_value(StartStatus::FaceAlreadyVerified).unwrap();
        assert_eq!(json, "face_already_verified");
        let json = serde_json::to_value(StartStatus::AlreadyVerified).unwrap();
        assert_eq!(json, "already_verified");
    }

    #[test]
    fn outcome_omits_absent_session() {
        let out = StartOutcome::without_session(StartStatus::DocumentPending, "x");
        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("redirect_url").is_none());
        assert!(json.get("session_id").is_none());
        assert_eq!(json["status"], "document_pending");
    }

    #[test]
    fn store_not_found_is_lifted() {
        let pid = ProfileId::new();
        assert!(matches!(
            KycError::from(StoreError::ProfileNotFound(pid)),
            KycError::ProfileNotFound(p) if p == pid
        ));
        let rid = VerificationRequestId::new();
        assert!(matches!(
            KycError::from(StoreError::RequestNotFound(rid)),
            KycError::RequestNotFound(s) if s == rid.to_string()
        ));
        assert!(matches!(
            KycError::from(StoreError::Duplicate("email".into())),
            KycError::Store(_)
        ));
    }
}
