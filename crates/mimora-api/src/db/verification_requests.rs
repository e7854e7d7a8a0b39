//! Verification request persistence operations.
//!
//! All functions take a `&PgPool` and operate on the `verification_requests`
//! table, locking the owning `profiles` row where a unit of work spans both.
//! Row locks are always taken request first, then profile.

use chrono::{DateTime, Utc};
use mimora_core::{ProfileId, VerificationRequestId};
use mimora_state::{KycStatus, KycStep, VerificationLog};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::profiles;
use crate::store::{Profile, StoreError, VerificationRequest};

const COLUMNS: &str = "id, profile_id, provider, provider_kyc_id, session_url, status, current_step,
     document_verified, face_verified, verification_data, created_at, updated_at";

const ACTIVE: &str = "status IN ('pending', 'in_progress', 'document_verified', 'face_verification_pending')";

/// Return the owner's active request, inserting a pending one when none
/// exists. Concurrent callers converge on the same row through the
/// `verification_requests_one_active` index.
pub async fn open(
    pool: &PgPool,
    owner: ProfileId,
    provider: &str,
) -> Result<VerificationRequest, StoreError> {
    // A concurrent transition to a terminal status can empty the active slot
    // between the insert and the select; a second round settles it.
    for _ in 0..3 {
        let request = VerificationRequest::new(owner, provider, Utc::now());
        let log = serialize_log(&request.verification_data)?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO verification_requests (id, profile_id, provider, status, current_step,
                 document_verified, face_verified, verification_data, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (profile_id) WHERE {ACTIVE} DO NOTHING"
        ))
        .bind(request.id.as_uuid())
        .bind(owner.as_uuid())
        .bind(&request.provider)
        .bind(request.status.as_str())
        .bind(request.current_step.as_str())
        .bind(request.document_verified)
        .bind(request.face_verified)
        .bind(&log)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_foreign_key_violation() {
                    return StoreError::ProfileNotFound(owner);
                }
            }
            StoreError::Database(e)
        })?;

        if inserted.rows_affected() == 1 {
            return Ok(request);
        }
        if let Some(active) = active_for(pool, owner).await? {
            return Ok(active);
        }
    }
    Err(StoreError::Corrupt(format!(
        "could not settle the active request of profile {owner}"
    )))
}

/// Fetch a request by ID.
pub async fn get_by_id(
    pool: &PgPool,
    id: VerificationRequestId,
) -> Result<Option<VerificationRequest>, StoreError> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {COLUMNS} FROM verification_requests WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;

    row.map(RequestRow::try_into_record).transpose()
}

/// The owner's non-terminal request.
pub async fn active_for(
    pool: &PgPool,
    owner: ProfileId,
) -> Result<Option<VerificationRequest>, StoreError> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {COLUMNS} FROM verification_requests
         WHERE profile_id = $1 AND {ACTIVE}
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(owner.as_uuid())
    .fetch_optional(pool)
    .await?;

    row.map(RequestRow::try_into_record).transpose()
}

/// The owner's newest request in any status.
pub async fn latest_for(
    pool: &PgPool,
    owner: ProfileId,
) -> Result<Option<VerificationRequest>, StoreError> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {COLUMNS} FROM verification_requests
         WHERE profile_id = $1
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(owner.as_uuid())
    .fetch_optional(pool)
    .await?;

    row.map(RequestRow::try_into_record).transpose()
}

/// Every request of the owner, newest first.
pub async fn history_for(
    pool: &PgPool,
    owner: ProfileId,
) -> Result<Vec<VerificationRequest>, StoreError> {
    let rows = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {COLUMNS} FROM verification_requests
         WHERE profile_id = $1
         ORDER BY created_at DESC"
    ))
    .bind(owner.as_uuid())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RequestRow::try_into_record).collect()
}

/// Newest request carrying the provider session handle, exact match.
pub async fn find_by_session(
    pool: &PgPool,
    handle: &str,
) -> Result<Option<VerificationRequest>, StoreError> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {COLUMNS} FROM verification_requests
         WHERE provider_kyc_id = $1
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(handle)
    .fetch_optional(pool)
    .await?;

    row.map(RequestRow::try_into_record).transpose()
}

/// Run `f` over a request and its profile inside one transaction. Nothing
/// is written unless `f` returns `Ok`.
pub async fn apply<R, E, F>(pool: &PgPool, id: VerificationRequestId, f: F) -> Result<R, E>
where
    F: FnOnce(&mut VerificationRequest, &mut Profile) -> Result<R, E>,
    E: From<StoreError>,
{
    let mut tx = pool.begin().await.map_err(db_err::<E>)?;

    let mut request = lock(&mut tx, id)
        .await?
        .ok_or(StoreError::RequestNotFound(id))?;
    let mut profile = profiles::lock(&mut tx, request.profile_id)
        .await?
        .ok_or(StoreError::ProfileNotFound(request.profile_id))?;
    let original_profile = profile.clone();

    let out = f(&mut request, &mut profile)?;

    let now = Utc::now();
    request.updated_at = now;
    write(&mut tx, &request).await?;
    if profile != original_profile {
        profile.updated_at = now;
        profiles::write_verification(&mut tx, &profile).await?;
    }

    tx.commit().await.map_err(db_err::<E>)?;
    Ok(out)
}

/// Cancel every active request of `owner` and clear the profile's
/// verification mirror, atomically.
pub async fn reset_for(pool: &PgPool, owner: ProfileId) -> Result<u64, StoreError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let cancelled = sqlx::query(&format!(
        "UPDATE verification_requests SET status = $1, updated_at = $2
         WHERE profile_id = $3 AND {ACTIVE}"
    ))
    .bind(KycStatus::Cancelled.as_str())
    .bind(now)
    .bind(owner.as_uuid())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let touched = sqlx::query(
        "UPDATE profiles SET kyc_verified = FALSE, external_kyc_id = NULL, updated_at = $1
         WHERE id = $2",
    )
    .bind(now)
    .bind(owner.as_uuid())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if touched == 0 {
        return Err(StoreError::ProfileNotFound(owner));
    }

    tx.commit().await?;
    Ok(cancelled)
}

async fn lock(
    conn: &mut PgConnection,
    id: VerificationRequestId,
) -> Result<Option<VerificationRequest>, StoreError> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {COLUMNS} FROM verification_requests WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?;

    row.map(RequestRow::try_into_record).transpose()
}

async fn write(conn: &mut PgConnection, request: &VerificationRequest) -> Result<(), StoreError> {
    let log = serialize_log(&request.verification_data)?;

    sqlx::query(
        "UPDATE verification_requests SET provider_kyc_id = $1, session_url = $2, status = $3,
             current_step = $4, document_verified = $5, face_verified = $6,
             verification_data = $7, updated_at = $8
         WHERE id = $9",
    )
    .bind(&request.provider_kyc_id)
    .bind(&request.session_url)
    .bind(request.status.as_str())
    .bind(request.current_step.as_str())
    .bind(request.document_verified)
    .bind(request.face_verified)
    .bind(&log)
    .bind(request.updated_at)
    .bind(request.id.as_uuid())
    .execute(conn)
    .await?;

    Ok(())
}

fn db_err<E: From<StoreError>>(err: sqlx::Error) -> E {
    E::from(StoreError::Database(err))
}

fn serialize_log(log: &VerificationLog) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(log)
        .map_err(|e| StoreError::Corrupt(format!("failed to serialize verification_data: {e}")))
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    profile_id: Uuid,
    provider: String,
    provider_kyc_id: Option<String>,
    session_url: Option<String>,
    status: String,
    current_step: String,
    document_verified: bool,
    face_verified: bool,
    verification_data: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn try_into_record(self) -> Result<VerificationRequest, StoreError> {
        let status = KycStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("request {}: status {:?}", self.id, self.status))
        })?;
        let current_step = KycStep::parse(&self.current_step).ok_or_else(|| {
            StoreError::Corrupt(format!("request {}: step {:?}", self.id, self.current_step))
        })?;
        let verification_data: VerificationLog = serde_json::from_value(self.verification_data)
            .map_err(|e| {
                StoreError::Corrupt(format!("request {}: verification_data: {e}", self.id))
            })?;

        Ok(VerificationRequest {
            id: VerificationRequestId::from_uuid(self.id),
            profile_id: ProfileId::from_uuid(self.profile_id),
            provider: self.provider,
            provider_kyc_id: self.provider_kyc_id,
            session_url: self.session_url,
            status,
            current_step,
            document_verified: self.document_verified,
            face_verified: self.face_verified,
            verification_data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
