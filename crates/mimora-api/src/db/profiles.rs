//! Profile persistence operations.
//!
//! All functions take a `&PgPool` (or a connection inside a caller's
//! transaction) and operate on the `profiles` table.

use chrono::{DateTime, Utc};
use mimora_core::{ProfileId, ProfileRole};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::classify_write_error;
use crate::store::{LocationUpdate, Profile, ProfileUpdate, StoreError};

const COLUMNS: &str = "id, role, username, email, phone_number, display_name, bio, profession,
     experience, city, address, flat_building, street_area, landmark, pincode, state, latitude,
     longitude, kyc_verified, bank_verified, external_kyc_id, created_at, updated_at";

/// Insert a new profile.
pub async fn insert(pool: &PgPool, profile: &Profile) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO profiles (id, role, username, email, phone_number, display_name, bio,
             profession, experience, city, address, kyc_verified, bank_verified,
             external_kyc_id, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(profile.id.as_uuid())
    .bind(profile.role.as_str())
    .bind(&profile.username)
    .bind(&profile.email)
    .bind(&profile.phone_number)
    .bind(&profile.display_name)
    .bind(&profile.bio)
    .bind(Json(&profile.profession))
    .bind(&profile.experience)
    .bind(&profile.city)
    .bind(&profile.address)
    .bind(profile.kyc_verified)
    .bind(profile.bank_verified)
    .bind(&profile.external_kyc_id)
    .bind(profile.created_at)
    .bind(profile.updated_at)
    .execute(pool)
    .await
    .map_err(classify_write_error)?;

    Ok(())
}

/// Fetch a profile by ID.
pub async fn get_by_id(pool: &PgPool, id: ProfileId) -> Result<Option<Profile>, StoreError> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        "SELECT {COLUMNS} FROM profiles WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;

    row.map(ProfileRow::try_into_record).transpose()
}

/// Find a profile by normalized email.
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Profile>, StoreError> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        "SELECT {COLUMNS} FROM profiles WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    row.map(ProfileRow::try_into_record).transpose()
}

/// Find a profile by phone number, exact match.
pub async fn find_by_phone(pool: &PgPool, phone: &str) -> Result<Option<Profile>, StoreError> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        "SELECT {COLUMNS} FROM profiles WHERE phone_number = $1"
    ))
    .bind(phone)
    .fetch_optional(pool)
    .await?;

    row.map(ProfileRow::try_into_record).transpose()
}

/// Replace the location fields and return the updated profile.
pub async fn update_location(
    pool: &PgPool,
    id: ProfileId,
    location: &LocationUpdate,
) -> Result<Profile, StoreError> {
    let mut tx = pool.begin().await?;
    let mut profile = lock(&mut tx, id)
        .await?
        .ok_or(StoreError::ProfileNotFound(id))?;
    location.apply_to(&mut profile);
    profile.updated_at = Utc::now();

    sqlx::query(
        "UPDATE profiles SET flat_building = $1, street_area = $2, landmark = $3, city = $4,
             state = $5, pincode = $6, latitude = $7, longitude = $8, address = $9,
             updated_at = $10
         WHERE id = $11",
    )
    .bind(&profile.flat_building)
    .bind(&profile.street_area)
    .bind(&profile.landmark)
    .bind(&profile.city)
    .bind(&profile.state)
    .bind(&profile.pincode)
    .bind(profile.latitude)
    .bind(profile.longitude)
    .bind(&profile.address)
    .bind(profile.updated_at)
    .bind(id.as_uuid())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(profile)
}

/// Apply descriptive field changes and return the updated profile.
pub async fn update_details(
    pool: &PgPool,
    id: ProfileId,
    update: &ProfileUpdate,
) -> Result<Profile, StoreError> {
    let mut tx = pool.begin().await?;
    let mut profile = lock(&mut tx, id)
        .await?
        .ok_or(StoreError::ProfileNotFound(id))?;
    update.apply_to(&mut profile);
    profile.updated_at = Utc::now();

    sqlx::query(
        "UPDATE profiles SET display_name = $1, bio = $2, profession = $3, experience = $4,
             city = $5, address = $6, updated_at = $7
         WHERE id = $8",
    )
    .bind(&profile.display_name)
    .bind(&profile.bio)
    .bind(Json(&profile.profession))
    .bind(&profile.experience)
    .bind(&profile.city)
    .bind(&profile.address)
    .bind(profile.updated_at)
    .bind(id.as_uuid())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(profile)
}

/// Fetch a profile and hold a row lock until the transaction ends.
pub(crate) async fn lock(
    conn: &mut PgConnection,
    id: ProfileId,
) -> Result<Option<Profile>, StoreError> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!(
        "SELECT {COLUMNS} FROM profiles WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?;

    row.map(ProfileRow::try_into_record).transpose()
}

/// Persist the verification mirror fields of a profile.
pub(crate) async fn write_verification(
    conn: &mut PgConnection,
    profile: &Profile,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE profiles SET kyc_verified = $1, bank_verified = $2, external_kyc_id = $3,
             updated_at = $4
         WHERE id = $5",
    )
    .bind(profile.kyc_verified)
    .bind(profile.bank_verified)
    .bind(&profile.external_kyc_id)
    .bind(profile.updated_at)
    .bind(profile.id.as_uuid())
    .execute(conn)
    .await?;

    Ok(())
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    role: String,
    username: String,
    email: Option<String>,
    phone_number: Option<String>,
    display_name: Option<String>,
    bio: Option<String>,
    profession: Json<Vec<String>>,
    experience: Option<String>,
    city: Option<String>,
    address: Option<String>,
    flat_building: Option<String>,
    street_area: Option<String>,
    landmark: Option<String>,
    pincode: Option<String>,
    state: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    kyc_verified: bool,
    bank_verified: bool,
    external_kyc_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProfileRow {
    fn try_into_record(self) -> Result<Profile, StoreError> {
        let role: ProfileRole = self
            .role
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("profile {}: role {:?}", self.id, self.role)))?;

        Ok(Profile {
            id: ProfileId::from_uuid(self.id),
            role,
            username: self.username,
            email: self.email,
            phone_number: self.phone_number,
            display_name: self.display_name,
            bio: self.bio,
            profession: self.profession.0,
            experience: self.experience,
            city: self.city,
            address: self.address,
            flat_building: self.flat_building,
            street_area: self.street_area,
            landmark: self.landmark,
            pincode: self.pincode,
            state: self.state,
            latitude: self.latitude,
            longitude: self.longitude,
            kyc_verified: self.kyc_verified,
            bank_verified: self.bank_verified,
            external_kyc_id: self.external_kyc_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
