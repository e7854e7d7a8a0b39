//! # Verification Request Store
//!
//! Profiles, verification requests and email login challenges behind one
//! [`KycStore`] value with two backends:
//!
//! - **Memory**: one `parking_lot::Mutex` over all tables. A unit of work
//!   that touches a request and its owning profile runs under that lock.
//! - **Postgres**: the functions in [`crate::db`]. A unit of work is a
//!   transaction holding `SELECT ... FOR UPDATE` locks on the request and
//!   the profile, taken in that order. A partial unique index enforces one
//!   active request per profile.
//!
//! Lookups used for deduplication and webhook correlation are exact match
//! and return the newest match.
//!
//! No method holds a lock or transaction across a provider call; callers
//! read, call the provider, then [`KycStore::apply`] the result.

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use mimora_core::{ProfileId, ProfileRole, VerificationRequestId};
use mimora_state::{KycProgress, KycStatus, KycStep, VerificationLog};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("profile {0} not found")]
    ProfileNotFound(ProfileId),
    #[error("verification request {0} not found")]
    RequestNotFound(VerificationRequestId),
    /// A uniqueness constraint was violated; the payload names the field.
    #[error("{0} is already in use")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

// ── Records ─────────────────────────────────────────────────────────────────

/// A marketplace profile, artist or customer.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: ProfileId,
    pub role: ProfileRole,
    pub username: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub profession: Vec<String>,
    pub experience: Option<String>,
    pub city: Option<String>,
    /// Free-form address, or the joined parts of the last location update.
    pub address: Option<String>,
    pub flat_building: Option<String>,
    pub street_area: Option<String>,
    pub landmark: Option<String>,
    pub pincode: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// True iff a request of this profile completed both steps and no retry
    /// or failure has happened since.
    pub kyc_verified: bool,
    pub bank_verified: bool,
    /// Mirror of the current request's provider session handle.
    pub external_kyc_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied at registration.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub role: ProfileRole,
    pub username: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub profession: Vec<String>,
    pub experience: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
}

impl NewProfile {
    /// Materialize a profile with a fresh id and unset verification flags.
    pub fn into_profile(self, now: DateTime<Utc>) -> Profile {
        Profile {
            id: ProfileId::new(),
            role: self.role,
            username: self.username,
            email: self.email,
            phone_number: self.phone_number,
            display_name: self.display_name,
            bio: self.bio,
            profession: self.profession,
            experience: self.experience,
            city: self.city,
            address: self.address,
            flat_building: None,
            street_area: None,
            landmark: None,
            pincode: None,
            state: None,
            latitude: None,
            longitude: None,
            kyc_verified: false,
            bank_verified: false,
            external_kyc_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Descriptive fields a profile owner may change. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub profession: Option<Vec<String>>,
    pub experience: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
}

impl ProfileUpdate {
    /// Copy the present fields onto `profile`.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(v) = &self.display_name {
            profile.display_name = Some(v.clone());
        }
        if let Some(v) = &self.bio {
            profile.bio = Some(v.clone());
        }
        if let Some(v) = &self.profession {
            profile.profession = v.clone();
        }
        if let Some(v) = &self.experience {
            profile.experience = Some(v.clone());
        }
        if let Some(v) = &self.city {
            profile.city = Some(v.clone());
        }
        if let Some(v) = &self.address {
            profile.address = Some(v.clone());
        }
    }
}

/// A structured location. Replaces every location field of a profile,
/// including `city`, and rebuilds `address` from the parts.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationUpdate {
    pub flat_building: Option<String>,
    pub street_area: Option<String>,
    pub landmark: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationUpdate {
    /// Non-blank parts joined with `", "`, from the most to the least
    /// specific. `None` when every part is blank.
    pub fn address(&self) -> Option<String> {
        let parts: Vec<&str> = [
            &self.flat_building,
            &self.street_area,
            &self.landmark,
            &self.city,
            &self.state,
            &self.pincode,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref().map(str::trim))
        .filter(|p| !p.is_empty())
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    pub fn apply_to(&self, profile: &mut Profile) {
        profile.address = self.address();
        profile.flat_building = self.flat_building.clone();
        profile.street_area = self.street_area.clone();
        profile.landmark = self.landmark.clone();
        profile.city = self.city.clone();
        profile.state = self.state.clone();
        profile.pincode = self.pincode.clone();
        profile.latitude = Some(self.latitude);
        profile.longitude = Some(self.longitude);
    }
}

/// One verification attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub id: VerificationRequestId,
    pub profile_id: ProfileId,
    pub provider: String,
    /// Provider session handle; the primary callback correlation key.
    pub provider_kyc_id: Option<String>,
    /// Redirect URL of the latest session issued for this request.
    pub session_url: Option<String>,
    pub status: KycStatus,
    pub current_step: KycStep,
    pub document_verified: bool,
    pub face_verified: bool,
    pub verification_data: VerificationLog,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationRequest {
    /// A fresh pending request.
    pub fn new(profile_id: ProfileId, provider: &str, now: DateTime<Utc>) -> Self {
        let progress = KycProgress::new();
        Self {
            id: VerificationRequestId::new(),
            profile_id,
            provider: provider.to_string(),
            provider_kyc_id: None,
            session_url: None,
            status: progress.status,
            current_step: progress.current_step,
            document_verified: progress.document_verified,
            face_verified: progress.face_verified,
            verification_data: VerificationLog::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The state-machine view of this request.
    pub fn progress(&self) -> KycProgress {
        KycProgress {
            status: self.status,
            current_step: self.current_step,
            document_verified: self.document_verified,
            face_verified: self.face_verified,
        }
    }

    /// Write a state-machine result back.
    pub fn set_progress(&mut self, progress: KycProgress) {
        self.status = progress.status;
        self.current_step = progress.current_step;
        self.document_verified = progress.document_verified;
        self.face_verified = progress.face_verified;
    }

    /// Whether a provider session was already issued for this request.
    pub fn has_session(&self) -> bool {
        self.provider_kyc_id.is_some() || self.session_url.is_some()
    }
}

/// A pending email one-time-code login.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailOtpChallenge {
    pub id: Uuid,
    pub email: String,
    /// Username requested for a first-time login.
    pub username: Option<String>,
    pub otp_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ── Store ───────────────────────────────────────────────────────────────────

/// Persistent store for profiles, verification requests and login
/// challenges.
#[derive(Debug, Clone)]
pub enum KycStore {
    /// Process-local tables. State does not survive restarts.
    Memory(MemoryStore),
    /// PostgreSQL via sqlx.
    Postgres(PgPool),
}

impl Default for KycStore {
    fn default() -> Self {
        Self::Memory(MemoryStore::default())
    }
}

impl KycStore {
    /// Postgres when a pool is given, memory otherwise.
    pub fn from_pool(pool: Option<PgPool>) -> Self {
        match pool {
            Some(pool) => Self::Postgres(pool),
            None => Self::default(),
        }
    }

    /// Backend name for logs.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }

    // -- Profiles --

    /// Insert a new profile. Username, email and phone number must be
    /// unused.
    pub async fn insert_profile(&self, new: NewProfile) -> Result<Profile, StoreError> {
        let profile = new.into_profile(Utc::now());
        match self {
            Self::Memory(m) => m.insert_profile(profile),
            Self::Postgres(pool) => db::profiles::insert(pool, &profile).await.map(|()| profile),
        }
    }

    /// Fetch a profile by id.
    pub async fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.get_profile(id)),
            Self::Postgres(pool) => db::profiles::get_by_id(pool, id).await,
        }
    }

    /// Find a profile by normalized email address.
    pub async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.find_profile_by_email(email)),
            Self::Postgres(pool) => db::profiles::find_by_email(pool, email).await,
        }
    }

    /// Find a profile by phone number, exact match.
    pub async fn find_profile_by_phone(&self, phone: &str) -> Result<Option<Profile>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.find_profile_by_phone(phone)),
            Self::Postgres(pool) => db::profiles::find_by_phone(pool, phone).await,
        }
    }

    /// Replace the location fields and return the new profile.
    pub async fn update_location(
        &self,
        id: ProfileId,
        location: &LocationUpdate,
    ) -> Result<Profile, StoreError> {
        match self {
            Self::Memory(m) => m.update_location(id, location),
            Self::Postgres(pool) => db::profiles::update_location(pool, id, location).await,
        }
    }

    /// Update descriptive fields and return the new profile.
    pub async fn update_profile(
        &self,
        id: ProfileId,
        update: &ProfileUpdate,
    ) -> Result<Profile, StoreError> {
        match self {
            Self::Memory(m) => m.update_profile(id, update),
            Self::Postgres(pool) => db::profiles::update_details(pool, id, update).await,
        }
    }

    // -- Verification requests --

    /// Return the owner's active request, creating a pending one if there
    /// is none. Atomic with respect to concurrent callers.
    pub async fn open_request(
        &self,
        owner: ProfileId,
        provider: &str,
    ) -> Result<VerificationRequest, StoreError> {
        match self {
            Self::Memory(m) => m.open_request(owner, provider),
            Self::Postgres(pool) => db::verification_requests::open(pool, owner, provider).await,
        }
    }

    /// Fetch a request by id.
    pub async fn get_request(
        &self,
        id: VerificationRequestId,
    ) -> Result<Option<VerificationRequest>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.get_request(id)),
            Self::Postgres(pool) => db::verification_requests::get_by_id(pool, id).await,
        }
    }

    /// The owner's non-terminal request, if any.
    pub async fn active_request(
        &self,
        owner: ProfileId,
    ) -> Result<Option<VerificationRequest>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.active_request(owner)),
            Self::Postgres(pool) => db::verification_requests::active_for(pool, owner).await,
        }
    }

    /// The owner's newest request in any status.
    pub async fn latest_request(
        &self,
        owner: ProfileId,
    ) -> Result<Option<VerificationRequest>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.latest_request(owner)),
            Self::Postgres(pool) => db::verification_requests::latest_for(pool, owner).await,
        }
    }

    /// Every request of the owner, newest first.
    pub async fn request_history(
        &self,
        owner: ProfileId,
    ) -> Result<Vec<VerificationRequest>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.request_history(owner)),
            Self::Postgres(pool) => db::verification_requests::history_for(pool, owner).await,
        }
    }

    /// Newest request carrying the given provider session handle.
    pub async fn find_by_session(
        &self,
        handle: &str,
    ) -> Result<Option<VerificationRequest>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.find_by_session(handle)),
            Self::Postgres(pool) => db::verification_requests::find_by_session(pool, handle).await,
        }
    }

    /// Run `f` over a request and its owning profile as one unit of work.
    ///
    /// Changes are persisted only when `f` returns `Ok`. `updated_at` is
    /// bumped on the request, and on the profile when it changed.
    pub async fn apply<R, E, F>(&self, id: VerificationRequestId, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut VerificationRequest, &mut Profile) -> Result<R, E> + Send,
        E: From<StoreError>,
    {
        match self {
            Self::Memory(m) => m.apply(id, f),
            Self::Postgres(pool) => db::verification_requests::apply(pool, id, f).await,
        }
    }

    /// Cancel every active request of `owner` and clear the profile's
    /// `kyc_verified` and `external_kyc_id`, in one unit of work. Returns the
    /// number of cancelled requests.
    pub async fn reset_verification(&self, owner: ProfileId) -> Result<u64, StoreError> {
        match self {
            Self::Memory(m) => m.reset_verification(owner),
            Self::Postgres(pool) => db::verification_requests::reset_for(pool, owner).await,
        }
    }

    // -- Email challenges --

    /// Store a new challenge.
    pub async fn insert_challenge(&self, challenge: &EmailOtpChallenge) -> Result<(), StoreError> {
        match self {
            Self::Memory(m) => {
                m.insert_challenge(challenge.clone());
                Ok(())
            }
            Self::Postgres(pool) => db::otp_challenges::insert(pool, challenge).await,
        }
    }

    /// Newest challenge issued to `email`.
    pub async fn latest_challenge(
        &self,
        email: &str,
    ) -> Result<Option<EmailOtpChallenge>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.latest_challenge(email)),
            Self::Postgres(pool) => db::otp_challenges::latest_for(pool, email).await,
        }
    }

    /// Remove a challenge after successful use.
    pub async fn delete_challenge(&self, id: Uuid) -> Result<(), StoreError> {
        match self {
            Self::Memory(m) => {
                m.delete_challenge(id);
                Ok(())
            }
            Self::Postgres(pool) => db::otp_challenges::delete(pool, id).await,
        }
    }

    /// Drop expired challenges for `email`. Returns how many were removed.
    pub async fn purge_expired_challenges(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.purge_expired_challenges(email, now)),
            Self::Postgres(pool) => db::otp_challenges::purge_expired(pool, email, now).await,
        }
    }

    /// Health check used by the readiness probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
        }
    }
}
