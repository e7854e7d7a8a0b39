//! # KYC Routes
//!
//! Profile-scoped verification endpoints plus the provider callback.
//!
//! | Method | Path                          | Operation |
//! |--------|-------------------------------|-----------|
//! | POST   | `/v1/kyc/:profile_id/start`   | open or replay the document session |
//! | POST   | `/v1/kyc/:profile_id/face`    | open the face session |
//! | GET    | `/v1/kyc/:profile_id/status`  | verification summary |
//! | POST   | `/v1/kyc/:profile_id/retry`   | cancel and start over |
//! | POST   | `/v1/kyc/webhook`             | provider callback (HMAC, no bearer) |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use mimora_core::ProfileId;
use serde_json::Value;

use crate::auth::{require_profile_access, CallerIdentity};
use crate::error::AppError;
use crate::extractors::json_body;
use crate::kyc::signature::SIGNATURE_HEADER;
use crate::kyc::{CallbackReceipt, KycError, KycStatusView, StartOutcome};
use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Bearer-authenticated, profile-scoped KYC routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/kyc/:profile_id/start", post(start_verification))
        .route("/v1/kyc/:profile_id/face", post(start_face_step))
        .route("/v1/kyc/:profile_id/status", get(kyc_status))
        .route("/v1/kyc/:profile_id/retry", post(retry_verification))
}

/// Provider callback route. Mounted outside bearer auth.
pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/v1/kyc/webhook", post(kyc_webhook))
}

/// Parse the path id and check the caller may act on it.
pub(crate) fn scoped_profile(caller: &CallerIdentity, raw: &str) -> Result<ProfileId, AppError> {
    let id = ProfileId::parse(raw)?;
    require_profile_access(caller, id)?;
    Ok(id)
}

fn metrics_of(ext: Option<Extension<ApiMetrics>>) -> Option<ApiMetrics> {
    ext.map(|Extension(m)| m)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Start (or resume) KYC verification with the document step.
#[utoipa::path(
    post,
    path = "/v1/kyc/{profile_id}/start",
    params(("profile_id" = String, Path, description = "Profile UUID")),
    responses(
        (status = 200, description = "Session opened, replayed, or already verified", body = StartOutcome),
        (status = 403, description = "Caller may not act on this profile"),
        (status = 404, description = "Profile not found"),
        (status = 502, description = "Provider error"),
        (status = 503, description = "Provider not configured"),
        (status = 504, description = "Provider timeout"),
    ),
    tag = "kyc"
)]
async fn start_verification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    metrics: Option<Extension<ApiMetrics>>,
    Path(profile_id): Path<String>,
) -> Result<Json<StartOutcome>, AppError> {
    let owner = scoped_profile(&caller, &profile_id)?;
    let outcome = state
        .orchestrator(metrics_of(metrics))
        .start_verification(owner)
        .await?;
    Ok(Json(outcome))
}

/// Start the face/liveness step once the document step has passed.
#[utoipa::path(
    post,
    path = "/v1/kyc/{profile_id}/face",
    params(("profile_id" = String, Path, description = "Profile UUID")),
    responses(
        (status = 200, description = "Face session opened, or a structured step status", body = StartOutcome),
        (status = 403, description = "Caller may not act on this profile"),
        (status = 404, description = "Profile not found"),
        (status = 502, description = "Provider error"),
        (status = 503, description = "Provider not configured"),
    ),
    tag = "kyc"
)]
async fn start_face_step(
    State(state): State<AppState>,
    caller: CallerIdentity,
    metrics: Option<Extension<ApiMetrics>>,
    Path(profile_id): Path<String>,
) -> Result<Json<StartOutcome>, AppError> {
    let owner = scoped_profile(&caller, &profile_id)?;
    let outcome = state
        .orchestrator(metrics_of(metrics))
        .start_face_step(owner)
        .await?;
    Ok(Json(outcome))
}

/// Current verification status of a profile.
#[utoipa::path(
    get,
    path = "/v1/kyc/{profile_id}/status",
    params(("profile_id" = String, Path, description = "Profile UUID")),
    responses(
        (status = 200, description = "Verification summary", body = KycStatusView),
        (status = 403, description = "Caller may not act on this profile"),
        (status = 404, description = "Profile not found"),
    ),
    tag = "kyc"
)]
async fn kyc_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(profile_id): Path<String>,
) -> Result<Json<KycStatusView>, AppError> {
    let owner = scoped_profile(&caller, &profile_id)?;
    let view = state.orchestrator(None).status(owner).await?;
    Ok(Json(view))
}

/// Cancel any active attempt and start verification again.
#[utoipa::path(
    post,
    path = "/v1/kyc/{profile_id}/retry",
    params(("profile_id" = String, Path, description = "Profile UUID")),
    responses(
        (status = 200, description = "New attempt started", body = StartOutcome),
        (status = 403, description = "Caller may not act on this profile"),
        (status = 404, description = "Profile not found"),
        (status = 502, description = "Provider error"),
        (status = 503, description = "Provider not configured"),
    ),
    tag = "kyc"
)]
async fn retry_verification(
    State(state): State<AppState>,
    caller: CallerIdentity,
    metrics: Option<Extension<ApiMetrics>>,
    Path(profile_id): Path<String>,
) -> Result<Json<StartOutcome>, AppError> {
    let owner = scoped_profile(&caller, &profile_id)?;
    let outcome = state
        .orchestrator(metrics_of(metrics))
        .retry_verification(owner)
        .await?;
    Ok(Json(outcome))
}

/// Provider callback. Signed with `X-Meon-Signature` when a webhook secret
/// is configured.
#[utoipa::path(
    post,
    path = "/v1/kyc/webhook",
    request_body = Object,
    responses(
        (status = 200, description = "Callback applied", body = CallbackReceipt),
        (status = 401, description = "Missing or invalid signature"),
        (status = 404, description = "No matching verification request"),
        (status = 422, description = "Payload is not a JSON object"),
    ),
    tag = "kyc"
)]
async fn kyc_webhook(
    State(state): State<AppState>,
    metrics: Option<Extension<ApiMetrics>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<CallbackReceipt>, AppError> {
    let metrics = metrics_of(metrics);
    let record = |outcome: &str| {
        if let Some(m) = &metrics {
            m.record_webhook(outcome);
        }
    };

    let payload = match json_body(body) {
        Ok(v) => v,
        Err(e) => {
            record("invalid");
            return Err(e);
        }
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state
        .reconciler(metrics.clone())
        .handle(payload, signature)
        .await
    {
        Ok(receipt) => {
            record("accepted");
            Ok(Json(receipt))
        }
        Err(err) => {
            record(match &err {
                KycError::Unauthenticated(_) => "unauthenticated",
                KycError::RequestNotFound(_) => "not_found",
                KycError::Validation(_) => "invalid",
                _ => "error",
            });
            if let KycError::Unauthenticated(reason) = &err {
                tracing::warn!(reason = %reason, "provider callback rejected");
            }
            Err(err.into())
        }
    }
}
