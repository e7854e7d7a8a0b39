//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "`{role}:{profile_id}:{secret}` or `{secret}`. Secret set via AUTH_TOKEN.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mimora API",
        version = "0.3.12",
        description = "Backend for the Mimora makeup-artist marketplace.\n\nProvides:\n- **KYC verification** in two steps (identity document, then face match) through the Meon provider\n- **Provider callbacks** authenticated by HMAC-SHA256 and reconciled into the verification request store\n- **Profiles** for artists and customers\n- **Email one-time-code login** for customers\n\nAuthentication: `Authorization: Bearer <token>` on `/v1/kyc/:profile_id/*` and `/v1/profiles/*`. The provider callback, the email login routes and the account existence check are unauthenticated.",
        license(name = "BUSL-1.1")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── KYC ─────────────────────────────────────────────────────────
        crate::routes::kyc::start_verification,
        crate::routes::kyc::start_face_step,
        crate::routes::kyc::kyc_status,
        crate::routes::kyc::retry_verification,
        crate::routes::kyc::kyc_webhook,
        // ── Profiles ────────────────────────────────────────────────────
        crate::routes::profiles::create_profile,
        crate::routes::profiles::get_own_profile,
        crate::routes::profiles::get_profile,
        crate::routes::profiles::update_profile,
        crate::routes::profiles::update_location,
        crate::routes::profiles::check_account,
        // ── Email login ─────────────────────────────────────────────────
        crate::routes::email_login::issue_code,
        crate::routes::email_login::verify_code,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::auth::Role,
            crate::kyc::StartStatus,
            crate::kyc::StartOutcome,
            crate::kyc::KycStatusView,
            crate::kyc::CallbackReceipt,
            crate::routes::profiles::CreateProfileRequest,
            crate::routes::profiles::UpdateProfileRequest,
            crate::routes::profiles::ProfileResponse,
            crate::routes::profiles::LocationRequest,
            crate::routes::profiles::AccountCheckRequest,
            crate::routes::profiles::AccountCheckResponse,
            crate::routes::email_login::IssueCodeRequest,
            crate::routes::email_login::IssueCodeResponse,
            crate::routes::email_login::VerifyCodeRequest,
            crate::routes::email_login::VerifyCodeResponse,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "kyc", description = "Two-step KYC verification sessions and provider callbacks"),
        (name = "profiles", description = "Artist and customer profiles"),
        (name = "auth", description = "Email one-time-code login"),
    )
)]
pub struct ApiDoc;

/// Serves the spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
