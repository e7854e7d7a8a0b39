//! # Profile Routes
//!
//! Registration and descriptive-field management for artist and customer
//! profiles. Verification flags are read-only here; they move only through
//! the KYC routes and provider callbacks.
//!
//! | Method | Path                         | Auth   |
//! |--------|------------------------------|--------|
//! | POST   | `/v1/profiles`               | Bearer |
//! | GET    | `/v1/profiles/me`            | Bearer |
//! | GET    | `/v1/profiles/:id`           | Bearer |
//! | PATCH  | `/v1/profiles/:id`           | Bearer |
//! | PUT    | `/v1/profiles/:id/location`  | Bearer |
//! | POST   | `/v1/profiles/check`         | none, rate limited |
//!
//! The existence check lets a client choose between the login and signup
//! flows before it holds a token. It answers with the role only.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use mimora_core::{EmailAddress, ProfileId, ProfileRole};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{json_body, validated_body, Validate};
use crate::routes::kyc::scoped_profile;
use crate::state::AppState;
use crate::store::{LocationUpdate, NewProfile, Profile, ProfileUpdate};

const USERNAME_MAX: usize = 50;
const TEXT_MAX: usize = 2000;

/// Build the profiles router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/profiles", post(create_profile))
        .route("/v1/profiles/me", get(get_own_profile))
        .route("/v1/profiles/:id", get(get_profile).patch(update_profile))
        .route("/v1/profiles/:id/location", put(update_location))
}

/// Unauthenticated account existence check.
pub fn check_router() -> Router<AppState> {
    Router::new().route("/v1/profiles/check", post(check_account))
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to register a profile.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProfileRequest {
    /// `artist` or `customer`.
    pub role: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profession: Vec<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Validate for CreateProfileRequest {
    fn validate(&self) -> Result<(), String> {
        validate_username(&self.username)?;
        if self.email.is_none() && self.phone_number.is_none() {
            return Err("either email or phone_number is required".into());
        }
        if let Some(email) = &self.email {
            EmailAddress::parse(email).map_err(|e| e.to_string())?;
        }
        if let Some(phone) = &self.phone_number {
            validate_phone(phone)?;
        }
        validate_text_fields(&[&self.display_name, &self.bio, &self.experience, &self.city, &self.address])
    }
}

/// Descriptive fields to change. Absent fields are left as they are.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profession: Option<Vec<String>>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Validate for UpdateProfileRequest {
    fn validate(&self) -> Result<(), String> {
        validate_text_fields(&[&self.display_name, &self.bio, &self.experience, &self.city, &self.address])
    }
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(req: UpdateProfileRequest) -> Self {
        Self {
            display_name: req.display_name,
            bio: req.bio,
            profession: req.profession,
            experience: req.experience,
            city: req.city,
            address: req.address,
        }
    }
}

/// Public view of a profile.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    #[schema(value_type = String, format = Uuid)]
    pub id: ProfileId,
    pub role: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub profession: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flat_building: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    pub kyc_verified: bool,
    pub bank_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Profile> for ProfileResponse {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            role: p.role.as_str().to_string(),
            username: p.username,
            email: p.email,
            phone_number: p.phone_number,
            display_name: p.display_name,
            bio: p.bio,
            profession: p.profession,
            experience: p.experience,
            city: p.city,
            address: p.address,
            flat_building: p.flat_building,
            street_area: p.street_area,
            landmark: p.landmark,
            pincode: p.pincode,
            state: p.state,
            latitude: p.latitude,
            longitude: p.longitude,
            kyc_verified: p.kyc_verified,
            bank_verified: p.bank_verified,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Structured location. Every location field is replaced; omitted parts
/// are cleared.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub flat_building: Option<String>,
    #[serde(default)]
    pub street_area: Option<String>,
    #[serde(default)]
    pub landmark: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub pincode: Option<String>,
}

impl Validate for LocationRequest {
    fn validate(&self) -> Result<(), String> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err("latitude must be between -90 and 90".into());
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err("longitude must be between -180 and 180".into());
        }
        if let Some(pincode) = self.pincode.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            if !(pincode.len() == 6 && pincode.chars().all(|c| c.is_ascii_digit())) {
                return Err("pincode must be 6 digits".into());
            }
        }
        validate_text_fields(&[
            &self.flat_building,
            &self.street_area,
            &self.landmark,
            &self.city,
            &self.state,
        ])
    }
}

impl From<LocationRequest> for LocationUpdate {
    fn from(req: LocationRequest) -> Self {
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        Self {
            flat_building: clean(req.flat_building),
            street_area: clean(req.street_area),
            landmark: clean(req.landmark),
            city: clean(req.city),
            state: clean(req.state),
            pincode: clean(req.pincode),
            latitude: req.latitude,
            longitude: req.longitude,
        }
    }
}

/// Does an account exist for this email or phone number?
#[derive(Debug, Deserialize, ToSchema)]
pub struct AccountCheckRequest {
    /// Email address or phone number.
    pub identifier: String,
    /// `email` or `phone`.
    #[serde(rename = "type")]
    pub identifier_type: String,
}

/// Existence check result.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountCheckResponse {
    pub exists: bool,
    /// Role of the existing profile, `artist` or `customer`.
    pub user_type: Option<String>,
}

pub(crate) fn validate_username(username: &str) -> Result<(), String> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err("username must not be empty".into());
    }
    if trimmed.chars().count() > USERNAME_MAX {
        return Err(format!("username must be at most {USERNAME_MAX} characters"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err("username may only contain letters, digits, '_', '.' and '-'".into());
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), String> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err("phone_number must be 10 to 15 digits with an optional leading '+'".into())
    }
}

fn validate_text_fields(fields: &[&Option<String>]) -> Result<(), String> {
    if fields
        .iter()
        .filter_map(|f| f.as_deref())
        .any(|v| v.chars().count() > TEXT_MAX)
    {
        return Err(format!("text fields must be at most {TEXT_MAX} characters"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Register a profile.
///
/// Service callers may register either role; artist and customer callers
/// may only register a profile of their own role.
#[utoipa::path(
    post,
    path = "/v1/profiles",
    request_body = CreateProfileRequest,
    responses(
        (status = 201, description = "Profile created", body = ProfileResponse),
        (status = 403, description = "Role not allowed for this caller"),
        (status = 409, description = "Username, email or phone already in use"),
        (status = 422, description = "Validation error"),
    ),
    tag = "profiles"
)]
async fn create_profile(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateProfileRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProfileResponse>), AppError> {
    let req = validated_body(body)?;
    let role: ProfileRole = req.role.parse()?;

    if let Some(own) = caller.role.profile_role() {
        if own != role {
            return Err(AppError::Forbidden(format!(
                "caller with role '{}' may not register a '{}' profile",
                caller.role.as_str(),
                role.as_str()
            )));
        }
    }

    let email = req
        .email
        .as_deref()
        .map(EmailAddress::parse)
        .transpose()?
        .map(|e| e.as_str().to_string());

    let profile = state
        .store
        .insert_profile(NewProfile {
            role,
            username: req.username.trim().to_string(),
            email,
            phone_number: req.phone_number,
            display_name: req.display_name,
            bio: req.bio,
            profession: req.profession,
            experience: req.experience,
            city: req.city,
            address: req.address,
        })
        .await?;

    tracing::info!(profile_id = %profile.id, role = %profile.role, "profile registered");
    Ok((StatusCode::CREATED, Json(profile.into())))
}

/// The caller's own profile.
#[utoipa::path(
    get,
    path = "/v1/profiles/me",
    responses(
        (status = 200, description = "Caller's profile", body = ProfileResponse),
        (status = 404, description = "Caller is not bound to an existing profile"),
    ),
    tag = "profiles"
)]
async fn get_own_profile(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ProfileResponse>, AppError> {
    let id = match (caller.role, caller.profile_id) {
        (Role::Artist | Role::Customer, Some(id)) => id,
        _ => return Err(AppError::NotFound("caller is not bound to a profile".into())),
    };
    let profile = state
        .store
        .get_profile(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("profile {id} not found")))?;
    Ok(Json(profile.into()))
}

/// Fetch a profile by ID.
#[utoipa::path(
    get,
    path = "/v1/profiles/{id}",
    params(("id" = String, Path, description = "Profile UUID")),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 403, description = "Caller may not access this profile"),
        (status = 404, description = "Profile not found"),
    ),
    tag = "profiles"
)]
async fn get_profile(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>, AppError> {
    let id = scoped_profile(&caller, &id)?;
    let profile = state
        .store
        .get_profile(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("profile {id} not found")))?;
    Ok(Json(profile.into()))
}

/// Update descriptive fields of a profile.
#[utoipa::path(
    patch,
    path = "/v1/profiles/{id}",
    params(("id" = String, Path, description = "Profile UUID")),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 403, description = "Caller may not access this profile"),
        (status = 404, description = "Profile not found"),
        (status = 422, description = "Validation error"),
    ),
    tag = "profiles"
)]
async fn update_profile(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    body: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, AppError> {
    let id = scoped_profile(&caller, &id)?;
    let req = validated_body(body)?;
    let profile = state.store.update_profile(id, &req.into()).await?;
    Ok(Json(profile.into()))
}

/// Replace the structured location of a profile.
#[utoipa::path(
    put,
    path = "/v1/profiles/{id}/location",
    params(("id" = String, Path, description = "Profile UUID")),
    request_body = LocationRequest,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 403, description = "Caller may not access this profile"),
        (status = 404, description = "Profile not found"),
        (status = 422, description = "Validation error"),
    ),
    tag = "profiles"
)]
async fn update_location(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    body: Result<Json<LocationRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, AppError> {
    let id = scoped_profile(&caller, &id)?;
    let req = validated_body(body)?;
    let profile = state.store.update_location(id, &req.into()).await?;
    tracing::info!(profile_id = %id, "profile location updated");
    Ok(Json(profile.into()))
}

/// Check whether a profile exists for an email address or phone number.
/// Reads only.
#[utoipa::path(
    post,
    path = "/v1/profiles/check",
    request_body = AccountCheckRequest,
    responses(
        (status = 200, description = "Check result", body = AccountCheckResponse),
        (status = 400, description = "type is neither email nor phone"),
        (status = 422, description = "Malformed identifier"),
        (status = 429, description = "Rate limited"),
    ),
    tag = "profiles"
)]
async fn check_account(
    State(state): State<AppState>,
    body: Result<Json<AccountCheckRequest>, JsonRejection>,
) -> Result<Json<AccountCheckResponse>, AppError> {
    let req = json_body(body)?;
    let identifier = req.identifier.trim();
    let profile = match req.identifier_type.as_str() {
        "email" => {
            let email = EmailAddress::parse(identifier)?;
            state.store.find_profile_by_email(email.as_str()).await?
        }
        "phone" => {
            validate_phone(identifier).map_err(AppError::Validation)?;
            state.store.find_profile_by_phone(identifier).await?
        }
        _ => {
            return Err(AppError::BadRequest(
                "Invalid type. Use 'email' or 'phone'".into(),
            ))
        }
    };
    Ok(Json(AccountCheckResponse {
        exists: profile.is_some(),
        user_type: profile.map(|p| p.role.as_str().to_string()),
    }))
}
