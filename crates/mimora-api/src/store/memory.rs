//! In-memory backend. All tables sit behind one mutex so a unit of work
//! over a request and its profile is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mimora_core::{ProfileId, VerificationRequestId};
use mimora_state::KycStatus;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    EmailOtpChallenge, LocationUpdate, Profile, ProfileUpdate, StoreError, VerificationRequest,
};

#[derive(Debug, Default)]
struct Tables {
    profiles: HashMap<ProfileId, Profile>,
    // Insertion order doubles as creation order for newest-first lookups.
    requests: Vec<VerificationRequest>,
    challenges: Vec<EmailOtpChallenge>,
}

impl Tables {
    fn request_index(&self, id: VerificationRequestId) -> Option<usize> {
        self.requests.iter().position(|r| r.id == id)
    }

    fn check_unique(&self, profile: &Profile) -> Result<(), StoreError> {
        for other in self.profiles.values().filter(|p| p.id != profile.id) {
            if other.username == profile.username {
                return Err(StoreError::Duplicate("username".into()));
            }
            if profile.email.is_some() && other.email == profile.email {
                return Err(StoreError::Duplicate("email".into()));
            }
            if profile.phone_number.is_some() && other.phone_number == profile.phone_number {
                return Err(StoreError::Duplicate("phone_number".into()));
            }
        }
        Ok(())
    }
}

/// Process-local store tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub(super) fn insert_profile(&self, profile: Profile) -> Result<Profile, StoreError> {
        let mut t = self.tables.lock();
        t.check_unique(&profile)?;
        t.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    pub(super) fn get_profile(&self, id: ProfileId) -> Option<Profile> {
        self.tables.lock().profiles.get(&id).cloned()
    }

    pub(super) fn find_profile_by_email(&self, email: &str) -> Option<Profile> {
        self.tables
            .lock()
            .profiles
            .values()
            .find(|p| p.email.as_deref() == Some(email))
            .cloned()
    }

    pub(super) fn find_profile_by_phone(&self, phone: &str) -> Option<Profile> {
        self.tables
            .lock()
            .profiles
            .values()
            .find(|p| p.phone_number.as_deref() == Some(phone))
            .cloned()
    }

    pub(super) fn update_location(
        &self,
        id: ProfileId,
        location: &LocationUpdate,
    ) -> Result<Profile, StoreError> {
        let mut t = self.tables.lock();
        let profile = t
            .profiles
            .get_mut(&id)
            .ok_or(StoreError::ProfileNotFound(id))?;
        location.apply_to(profile);
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    pub(super) fn update_profile(
        &self,
        id: ProfileId,
        update: &ProfileUpdate,
    ) -> Result<Profile, StoreError> {
        let mut t = self.tables.lock();
        let profile = t
            .profiles
            .get_mut(&id)
            .ok_or(StoreError::ProfileNotFound(id))?;
        update.apply_to(profile);
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    pub(super) fn open_request(
        &self,
        owner: ProfileId,
        provider: &str,
    ) -> Result<VerificationRequest, StoreError> {
        let mut t = self.tables.lock();
        if !t.profiles.contains_key(&owner) {
            return Err(StoreError::ProfileNotFound(owner));
        }
        if let Some(active) = t
            .requests
            .iter()
            .rev()
            .find(|r| r.profile_id == owner && r.status.is_active())
        {
            return Ok(active.clone());
        }
        let request = VerificationRequest::new(owner, provider, Utc::now());
        t.requests.push(request.clone());
        Ok(request)
    }

    pub(super) fn get_request(&self, id: VerificationRequestId) -> Option<VerificationRequest> {
        self.tables.lock().requests.iter().find(|r| r.id == id).cloned()
    }

    pub(super) fn active_request(&self, owner: ProfileId) -> Option<VerificationRequest> {
        self.tables
            .lock()
            .requests
            .iter()
            .rev()
            .find(|r| r.profile_id == owner && r.status.is_active())
            .cloned()
    }

    pub(super) fn latest_request(&self, owner: ProfileId) -> Option<VerificationRequest> {
        self.tables
            .lock()
            .requests
            .iter()
            .rev()
            .find(|r| r.profile_id == owner)
            .cloned()
    }

    pub(super) fn request_history(&self, owner: ProfileId) -> Vec<VerificationRequest> {
        self.tables
            .lock()
            .requests
            .iter()
            .rev()
            .filter(|r| r.profile_id == owner)
            .cloned()
            .collect()
    }

    pub(super) fn find_by_session(&self, handle: &str) -> Option<VerificationRequest> {
        self.tables
            .lock()
            .requests
            .iter()
            .rev()
            .find(|r| r.provider_kyc_id.as_deref() == Some(handle))
            .cloned()
    }

    pub(super) fn apply<R, E, F>(&self, id: VerificationRequestId, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut VerificationRequest, &mut Profile) -> Result<R, E>,
        E: From<StoreError>,
    {
        let mut t = self.tables.lock();
        let idx = t
            .request_index(id)
            .ok_or(StoreError::RequestNotFound(id))?;
        let mut request = t.requests[idx].clone();
        let mut profile = t
            .profiles
            .get(&request.profile_id)
            .cloned()
            .ok_or(StoreError::ProfileNotFound(request.profile_id))?;
        let original_profile = profile.clone();

        let out = f(&mut request, &mut profile)?;

        let now = Utc::now();
        request.updated_at = now;
        if profile != original_profile {
            profile.updated_at = now;
        }
        t.requests[idx] = request;
        t.profiles.insert(profile.id, profile);
        Ok(out)
    }

    pub(super) fn reset_verification(&self, owner: ProfileId) -> Result<u64, StoreError> {
        let mut t = self.tables.lock();
        if !t.profiles.contains_key(&owner) {
            return Err(StoreError::ProfileNotFound(owner));
        }
        let now = Utc::now();
        let mut cancelled = 0;
        for request in t
            .requests
            .iter_mut()
            .filter(|r| r.profile_id == owner && r.status.is_active())
        {
            request.status = KycStatus::Cancelled;
            request.updated_at = now;
            cancelled += 1;
        }
        if let Some(profile) = t.profiles.get_mut(&owner) {
            profile.kyc_verified = false;
            profile.external_kyc_id = None;
            profile.updated_at = now;
        }
        Ok(cancelled)
    }

    pub(super) fn insert_challenge(&self, challenge: EmailOtpChallenge) {
        self.tables.lock().challenges.push(challenge);
    }

    pub(super) fn latest_challenge(&self, email: &str) -> Option<EmailOtpChallenge> {
        self.tables
            .lock()
            .challenges
            .iter()
            .rev()
            .find(|c| c.email == email)
            .cloned()
    }

    pub(super) fn delete_challenge(&self, id: Uuid) {
        self.tables.lock().challenges.retain(|c| c.id != id);
    }

    pub(super) fn purge_expired_challenges(&self, email: &str, now: DateTime<Utc>) -> u64 {
        let mut t = self.tables.lock();
        let before = t.challenges.len();
        t.challenges
            .retain(|c| !(c.email == email && c.expires_at <= now));
        (before - t.challenges.len()) as u64
    }
}
