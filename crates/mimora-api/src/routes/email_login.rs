//! # Email One-Time-Code Login
//!
//! | Method | Path                    | Operation |
//! |--------|-------------------------|-----------|
//! | POST   | `/v1/auth/email/otp`    | issue a 6-digit code by email |
//! | POST   | `/v1/auth/email/verify` | check the code, find or create the customer profile |
//!
//! Codes are stored only as Argon2id hashes and expire after five minutes.
//! Issuing a code first purges the address's expired challenges. A mail
//! failure is reported upstream but the stored challenge is kept.
//!
//! Both routes are unauthenticated and carry their own tight rate limits.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use mimora_core::{otp, EmailAddress, OneTimeCode, OtpError, ProfileRole, OTP_TTL_SECS};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::{validated_body, Validate};
use crate::mailer::Mailer;
use crate::routes::profiles::{validate_username, ProfileResponse};
use crate::state::AppState;
use crate::store::{EmailOtpChallenge, NewProfile, Profile, StoreError};

const USERNAME_ATTEMPTS: usize = 3;

/// Code issue route.
pub fn issue_router() -> Router<AppState> {
    Router::new().route("/v1/auth/email/otp", post(issue_code))
}

/// Code verification route.
pub fn verify_router() -> Router<AppState> {
    Router::new().route("/v1/auth/email/verify", post(verify_code))
}

fn require_mailer(state: &AppState) -> Result<&Mailer, AppError> {
    state.mailer.as_ref().ok_or_else(|| {
        AppError::service_unavailable(
            "Email delivery not configured. Set SENDGRID_API_KEY environment variable.",
        )
    })
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request a login code.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueCodeRequest {
    pub email: String,
    /// Username for a first-time login. Defaults to the email's local part.
    #[serde(default)]
    pub username: Option<String>,
}

impl Validate for IssueCodeRequest {
    fn validate(&self) -> Result<(), String> {
        EmailAddress::parse(&self.email).map_err(|e| e.to_string())?;
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        Ok(())
    }
}

/// Code issued.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IssueCodeResponse {
    pub message: String,
    pub email: String,
    /// Seconds until the code expires.
    pub expires_in: i64,
}

/// Submit a login code.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub otp: String,
}

impl Validate for VerifyCodeRequest {
    fn validate(&self) -> Result<(), String> {
        EmailAddress::parse(&self.email).map_err(|e| e.to_string())?;
        if self.otp.trim().is_empty() {
            return Err("otp must not be empty".into());
        }
        Ok(())
    }
}

/// Login result.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyCodeResponse {
    /// Whether the profile was created by this login.
    pub created: bool,
    pub profile: ProfileResponse,
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, OtpError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("one-time code task failed: {e}")))?
        .map_err(AppError::from)
}

/// Username for a first login: the requested one, else the sanitized local
/// part of the email.
fn base_username(requested: Option<&str>, email: &EmailAddress) -> String {
    if let Some(name) = requested.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    let cleaned: String = email
        .local_part()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(40)
        .collect();
    if cleaned.is_empty() {
        "customer".to_string()
    } else {
        cleaned
    }
}

async fn find_or_create_customer(
    state: &AppState,
    email: &EmailAddress,
    username: Option<&str>,
) -> Result<(Profile, bool), AppError> {
    if let Some(profile) = state.store.find_profile_by_email(email.as_str()).await? {
        return Ok((profile, false));
    }

    let base = base_username(username, email);
    let mut candidate = base.clone();
    for _ in 0..USERNAME_ATTEMPTS {
        let new = NewProfile {
            role: ProfileRole::Customer,
            username: candidate.clone(),
            email: Some(email.as_str().to_string()),
            phone_number: None,
            display_name: username.map(str::to_string),
            bio: None,
            profession: Vec::new(),
            experience: None,
            city: None,
            address: None,
        };
        match state.store.insert_profile(new).await {
            Ok(profile) => return Ok((profile, true)),
            Err(StoreError::Duplicate(field)) if field == "username" => {
                let suffix = Uuid::new_v4().simple().to_string();
                candidate = format!("{base}-{}", &suffix[..6]);
            }
            Err(StoreError::Duplicate(field)) if field == "email" => {
                // Lost a race with a concurrent first login for this address.
                if let Some(profile) = state.store.find_profile_by_email(email.as_str()).await? {
                    return Ok((profile, false));
                }
                return Err(StoreError::Duplicate(field).into());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Conflict(format!(
        "could not allocate a unique username from {base:?}"
    )))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Email a one-time login code.
#[utoipa::path(
    post,
    path = "/v1/auth/email/otp",
    request_body = IssueCodeRequest,
    responses(
        (status = 200, description = "Code sent", body = IssueCodeResponse),
        (status = 422, description = "Validation error"),
        (status = 429, description = "Rate limited"),
        (status = 502, description = "Mail relay error"),
        (status = 503, description = "Mail delivery not configured"),
    ),
    tag = "auth"
)]
async fn issue_code(
    State(state): State<AppState>,
    body: Result<Json<IssueCodeRequest>, JsonRejection>,
) -> Result<Json<IssueCodeResponse>, AppError> {
    let req = validated_body(body)?;
    let mailer = require_mailer(&state)?;
    let email = EmailAddress::parse(&req.email)?;
    let now = Utc::now();

    let purged = state
        .store
        .purge_expired_challenges(email.as_str(), now)
        .await?;
    if purged > 0 {
        tracing::debug!(email = %email, purged, "expired login codes removed");
    }

    let code = OneTimeCode::generate();
    let hashed_code = code.clone();
    let otp_hash = blocking(move || hashed_code.hash()).await?;

    state
        .store
        .insert_challenge(&EmailOtpChallenge {
            id: Uuid::new_v4(),
            email: email.as_str().to_string(),
            username: req.username.map(|u| u.trim().to_string()),
            otp_hash,
            expires_at: OneTimeCode::expiry_from(now),
            created_at: now,
        })
        .await?;

    mailer
        .send_login_code(email.as_str(), code.as_str())
        .await
        .map_err(|e| AppError::UpstreamError(e.to_string()))?;

    Ok(Json(IssueCodeResponse {
        message: "OTP sent to your email".to_string(),
        email: email.to_string(),
        expires_in: OTP_TTL_SECS,
    }))
}

/// Verify a login code and return the customer profile, creating it on the
/// first login.
#[utoipa::path(
    post,
    path = "/v1/auth/email/verify",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Code accepted", body = VerifyCodeResponse),
        (status = 401, description = "No code, expired code, or wrong code"),
        (status = 422, description = "Validation error"),
        (status = 429, description = "Rate limited"),
    ),
    tag = "auth"
)]
async fn verify_code(
    State(state): State<AppState>,
    body: Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> Result<Json<VerifyCodeResponse>, AppError> {
    let req = validated_body(body)?;
    let email = EmailAddress::parse(&req.email)?;

    let challenge = state
        .store
        .latest_challenge(email.as_str())
        .await?
        .ok_or_else(|| AppError::Unauthorized("no login code issued for this email".into()))?;

    let submitted = req.otp;
    let stored_hash = challenge.otp_hash.clone();
    let expires_at = challenge.expires_at;
    let checked = blocking(move || otp::verify(&submitted, &stored_hash, expires_at, Utc::now())).await;
    if let Err(e) = checked {
        tracing::info!(email = %email, error = %e, "login code rejected");
        return Err(e);
    }

    state.store.delete_challenge(challenge.id).await?;

    let (profile, created) =
        find_or_create_customer(&state, &email, challenge.username.as_deref()).await?;
    tracing::info!(profile_id = %profile.id, created, "email login verified");

    Ok(Json(VerifyCodeResponse {
        created,
        profile: profile.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_falls_back_to_local_part() {
        let email = EmailAddress::parse("Ana.Maria+kyc@mimora.app").unwrap();
        assert_eq!(base_username(None, &email), "ana.mariakyc");
        assert_eq!(base_username(Some("  "), &email), "ana.mariakyc");
        assert_eq!(base_username(Some("ana_mua"), &email), "ana_mua");
    }

    #[test]
    fn otp_errors_map_to_status() {
        assert!(matches!(AppError::from(OtpError::Expired), AppError::Unauthorized(_)));
        assert!(matches!(AppError::from(OtpError::Mismatch), AppError::Unauthorized(_)));
        assert!(matches!(
            AppError::from(OtpError::Malformed { expected: 6 }),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn issue_request_validates_email_and_username() {
        let ok = IssueCodeRequest {
            email: "ana@mimora.app".into(),
            username: None,
        };
        assert!(ok.validate().is_ok());
        let bad = IssueCodeRequest {
            email: "ana".into(),
            username: None,
        };
        assert!(bad.validate().is_err());
        let bad_name = IssueCodeRequest {
            email: "ana@mimora.app".into(),
            username: Some("white space".into()),
        };
        assert!(bad_name.validate().is_err());
    }
}
