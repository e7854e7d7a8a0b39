//! # Database Persistence Layer
//!
//! Postgres persistence for profiles, verification requests and email login
//! challenges via SQLx.
//!
//! The database is **optional**. When `DATABASE_URL` is set the store runs
//! on PostgreSQL; when absent the API keeps everything in memory, which is
//! enough for development and tests.
//!
//! State-machine rules are enforced in `mimora-state`, not in SQL. The one
//! exception is the partial unique index that allows a single active
//! verification request per profile.

pub mod otp_challenges;
pub mod profiles;
pub mod verification_requests;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::store::StoreError;

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Map a unique-index violation to [`StoreError::Duplicate`] naming the
/// field; everything else becomes [`StoreError::Database`].
pub(crate) fn classify_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some("profiles_username_key") => "username",
                Some("profiles_email_key") => "email",
                Some("profiles_phone_key") => "phone_number",
                Some(other) => other,
                None => "value",
            };
            return StoreError::Duplicate(field.to_string());
        }
    }
    StoreError::Database(err)
}
