//! # Authentication & Authorization Middleware
//!
//! Bearer token middleware with profile-scoped access control.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {role}:{profile_id}:{secret}  : role-scoped caller
//! Bearer {secret}                       : legacy format (treated as Service)
//! ```
//!
//! Roles are `service` (backend-to-backend, full access), `artist` and
//! `customer`. Artist and customer callers are bound to one profile and may
//! only act on that profile. `profile_id` may be empty for a caller that has
//! not registered yet; such a caller can create a profile and nothing else.
//!
//! ## CallerIdentity
//!
//! Every authenticated request gets a [`CallerIdentity`] injected into the
//! request extensions. Handlers extract it via the `FromRequestParts` impl.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mimora_core::{ProfileId, ProfileRole};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── Role ────────────────────────────────────────────────────────────────────

/// Caller roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A booking customer acting on their own profile.
    Customer,
    /// An artist acting on their own profile.
    Artist,
    /// Trusted backend caller. Full access to every profile.
    Service,
}

impl Role {
    /// Return the string representation of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Artist => "artist",
            Self::Service => "service",
        }
    }

    /// The profile role a self-registering caller of this role gets.
    pub fn profile_role(&self) -> Option<ProfileRole> {
        match self {
            Self::Customer => Some(ProfileRole::Customer),
            Self::Artist => Some(ProfileRole::Artist),
            Self::Service => None,
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// The caller's role.
    pub role: Role,
    /// The profile an artist or customer caller is bound to.
    pub profile_id: Option<ProfileId>,
}

impl CallerIdentity {
    /// Full-access identity used when auth is disabled and for legacy tokens.
    pub fn service() -> Self {
        Self {
            role: Role::Service,
            profile_id: None,
        }
    }

    /// Whether the caller may read or act on the given profile.
    pub fn can_access_profile(&self, profile_id: ProfileId) -> bool {
        match self.role {
            Role::Service => true,
            Role::Artist | Role::Customer => self.profile_id == Some(profile_id),
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// Check that the caller may act on `profile_id`.
/// Returns 403 Forbidden otherwise.
pub fn require_profile_access(caller: &CallerIdentity, profile_id: ProfileId) -> Result<(), AppError> {
    if caller.can_access_profile(profile_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "caller with role '{}' may not access profile {profile_id}",
            caller.role.as_str()
        )))
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer secrets.
///
/// When lengths differ, performs a dummy comparison so the early return
/// does not reveal how far the prefix matched.
pub(crate) fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse the bearer token in format `{role}:{profile_id}:{secret}` or
/// `{secret}` (legacy, treated as `Service`).
pub fn parse_bearer_token(provided: &str, expected_secret: &str) -> Result<CallerIdentity, String> {
    let parts: Vec<&str> = provided.splitn(3, ':').collect();

    match parts.as_slice() {
        [secret] => {
            if constant_time_token_eq(secret, expected_secret) {
                Ok(CallerIdentity::service())
            } else {
                Err("invalid bearer token".into())
            }
        }
        [role_str, profile_str, secret] => {
            if !constant_time_token_eq(secret, expected_secret) {
                return Err("invalid bearer token".into());
            }

            let role = match *role_str {
                "service" => Role::Service,
                "artist" => Role::Artist,
                "customer" => Role::Customer,
                other => return Err(format!("unknown role: {other}")),
            };

            let profile_id = if profile_str.is_empty() {
                None
            } else {
                Some(ProfileId::parse(profile_str).map_err(|e| e.to_string())?)
            };

            Ok(CallerIdentity { role, profile_id })
        }
        _ => Err("invalid token format: expected {role}:{profile_id}:{secret} or {secret}".into()),
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Extract and validate the Bearer token from the Authorization header and
/// inject the resulting [`CallerIdentity`].
///
/// When `AuthConfig.token` is `None`, every request is allowed with the
/// `Service` identity (development mode).
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected_token = request.extensions().get::<AuthConfig>().cloned();

    match expected_token {
        Some(AuthConfig {
            token: Some(ref expected),
        }) => {
            let auth_header = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
                Some(provided) => match parse_bearer_token(provided, expected) {
                    Ok(identity) => {
                        request.extensions_mut().insert(identity);
                        next.run(request).await
                    }
                    Err(msg) => {
                        tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                        unauthorized_response(&msg)
                    }
                },
                None if auth_header.is_some() => {
                    tracing::warn!("authentication failed: non-Bearer authorization scheme");
                    unauthorized_response("authorization header must use Bearer scheme")
                }
                None => {
                    tracing::warn!("authentication failed: missing authorization header");
                    unauthorized_response("missing authorization header")
                }
            }
        }
        _ => {
            request.extensions_mut().insert(CallerIdentity::service());
            next.run(request).await
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
