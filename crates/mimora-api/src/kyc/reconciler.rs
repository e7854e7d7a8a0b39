//! # Webhook Reconciler
//!
//! Authenticates an inbound provider callback, matches it to a stored
//! verification request and advances that request in one unit of work.
//!
//! ## Correlation
//!
//! 1. Session handle: first of `request_id`, `kyc_id`, `id`, `session_id`,
//!    `transaction_id`, matched exactly against `provider_kyc_id`.
//! 2. Reference id: `additional_info.reference_id` (or
//!    `unique_keys.reference_id`), parsed as a request id.
//!
//! A callback that matches nothing is rejected without touching the store.
//! Every matched callback is appended to the request's audit log, even when
//! the request is already terminal and the callback changes nothing else.

use chrono::Utc;
use mimora_core::VerificationRequestId;
use mimora_kyc_client::session::first_string;
use mimora_state::{CallbackOutcome, KycEvent, VerificationEntry};
use serde_json::{Map, Value};

use super::{CallbackReceipt, KycError, WebhookVerifier};
use crate::middleware::metrics::ApiMetrics;
use crate::store::{KycStore, VerificationRequest};

const HANDLE_KEYS: &[&str] = &["request_id", "kyc_id", "id", "session_id", "transaction_id"];
const STATUS_KEYS: &[&str] = &["status", "verification_status"];
const TYPE_KEYS: &[&str] = &["verification_type", "step", "type"];
const DATA_KEYS: &[&str] = &["data", "verification_details"];

/// Fields pulled out of a raw callback payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackPayload {
    pub handle: Option<String>,
    pub reference_id: Option<String>,
    /// Lowercased; `pending` when absent.
    pub status: String,
    /// Lowercased; `unknown` when absent.
    pub verification_type: String,
    pub data: Value,
    pub raw: Value,
}

impl CallbackPayload {
    /// Extract the callback fields. The payload must be a JSON object.
    pub fn extract(raw: Value) -> Result<Self, KycError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| KycError::Validation("webhook payload must be a JSON object".into()))?;

        let handle = first_string(&raw, HANDLE_KEYS);
        let reference_id = ["additional_info", "unique_keys"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(|nested| first_string(nested, &["reference_id"]));
        let status = first_string(&raw, STATUS_KEYS)
            .unwrap_or_else(|| "pending".into())
            .to_lowercase();
        let verification_type = first_string(&raw, TYPE_KEYS)
            .unwrap_or_else(|| "unknown".into())
            .to_lowercase();
        let data = first_object(obj, DATA_KEYS);

        Ok(Self {
            handle,
            reference_id,
            status,
            verification_type,
            data,
            raw,
        })
    }

    /// The state-machine outcome this callback reports.
    pub fn outcome(&self) -> CallbackOutcome {
        CallbackOutcome::classify(&self.status, &self.verification_type)
    }
}

fn first_object(obj: &Map<String, Value>, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()).cloned())
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Applies provider callbacks to stored requests.
#[derive(Debug, Clone)]
pub struct WebhookReconciler {
    store: KycStore,
    verifier: Option<WebhookVerifier>,
    metrics: Option<ApiMetrics>,
}

impl WebhookReconciler {
    pub fn new(store: KycStore, verifier: Option<WebhookVerifier>) -> Self {
        Self {
            store,
            verifier,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<ApiMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Authenticate, correlate and apply one callback.
    pub async fn handle(
        &self,
        raw: Value,
        signature: Option<&str>,
    ) -> Result<CallbackReceipt, KycError> {
        if let Some(verifier) = &self.verifier {
            verifier.verify(&raw, signature)?;
        }

        let payload = CallbackPayload::extract(raw)?;
        let request = self.correlate(&payload).await?;
        let request_id = request.id;

        let receipt = self
            .store
            .apply(request_id, |req, profile| -> Result<_, KycError> {
                let before = req.progress();
                let outcome = payload.outcome();

                req.verification_data.record(
                    VerificationEntry {
                        verification_type: payload.verification_type.clone(),
                        status: payload.status.clone(),
                        timestamp: Utc::now(),
                        data: payload.data.clone(),
                    },
                    payload.raw.clone(),
                );

                let transition = before.apply(KycEvent::Callback(outcome))?;
                req.set_progress(transition.progress);
                if let Some(verified) = transition.kyc_verified {
                    profile.kyc_verified = verified;
                }

                if req.provider_kyc_id.is_none() && req.status.is_active() {
                    if let Some(handle) = &payload.handle {
                        req.provider_kyc_id = Some(handle.clone());
                        profile.external_kyc_id = Some(handle.clone());
                    }
                }

                Ok(CallbackReceipt {
                    accepted: true,
                    profile_id: req.profile_id,
                    request_status: req.status.as_str().to_string(),
                    document_verified: req.document_verified,
                    face_verified: req.face_verified,
                    current_step: req.current_step.as_str().to_string(),
                    kyc_verified: profile.kyc_verified,
                    message: format!(
                        "Webhook processed: {} - {}",
                        payload.verification_type, payload.status
                    ),
                    transitioned: transition.progress != before,
                })
            })
            .await?;

        if receipt.transitioned {
            if let Some(m) = &self.metrics {
                m.record_transition(&receipt.request_status);
            }
        }
        tracing::info!(
            request_id = %request_id,
            profile_id = %receipt.profile_id,
            status = %receipt.request_status,
            step = %receipt.current_step,
            kyc_verified = receipt.kyc_verified,
            "provider callback applied"
        );
        Ok(receipt)
    }

    async fn correlate(&self, payload: &CallbackPayload) -> Result<VerificationRequest, KycError> {
        if let Some(handle) = &payload.handle {
            if let Some(request) = self.store.find_by_session(handle).await? {
                return Ok(request);
            }
        }

        if let Some(reference) = &payload.reference_id {
            if let Ok(id) = VerificationRequestId::parse(reference) {
                if let Some(request) = self.store.get_request(id).await? {
                    return Ok(request);
                }
            }
        }

        let described = payload
            .handle
            .as_deref()
            .or(payload.reference_id.as_deref())
            .unwrap_or("<none>");
        tracing::warn!(handle = %described, "provider callback matches no verification request");
        Err(KycError::RequestNotFound(described.to_string()))
    }
}
