//! Email one-time-code challenge persistence.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{EmailOtpChallenge, StoreError};

/// Insert a new challenge.
pub async fn insert(pool: &PgPool, challenge: &EmailOtpChallenge) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO email_otp_challenges (id, email, username, otp_hash, expires_at, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(challenge.id)
    .bind(&challenge.email)
    .bind(&challenge.username)
    .bind(&challenge.otp_hash)
    .bind(challenge.expires_at)
    .bind(challenge.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Newest challenge for an email.
pub async fn latest_for(
    pool: &PgPool,
    email: &str,
) -> Result<Option<EmailOtpChallenge>, StoreError> {
    let row = sqlx::query_as::<_, ChallengeRow>(
        "SELECT id, email, username, otp_hash, expires_at, created_at
         FROM email_otp_challenges WHERE email = $1
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(ChallengeRow::into_record))
}

/// Delete one challenge.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM email_otp_challenges WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete expired challenges for an email.
pub async fn purge_expired(
    pool: &PgPool,
    email: &str,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM email_otp_challenges WHERE email = $1 AND expires_at <= $2")
        .bind(email)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    email: String,
    username: Option<String>,
    otp_hash: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl ChallengeRow {
    fn into_record(self) -> EmailOtpChallenge {
        EmailOtpChallenge {
            id: self.id,
            email: self.email,
            username: self.username,
            otp_hash: self.otp_hash,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}
