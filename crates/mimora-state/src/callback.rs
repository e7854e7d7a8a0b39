//! # Provider Callback Vocabulary
//!
//! The provider reports results as two loose strings: an outcome status and
//! a verification type. Different workflows use different words for the
//! same thing (`aadhaar`, `pan` and `analyst` are all document checks).
//! [`CallbackOutcome::classify`] folds them into the handful of outcomes the
//! state machine understands.
//!
//! | status family                         | type family                                  | outcome |
//! |---------------------------------------|----------------------------------------------|---------|
//! | success, verified, completed, complete | aadhaar, pan, document, id, analyst         | `DocumentVerified` |
//! | success family                        | face, liveness, selfie, photo, liveimage     | `FaceVerified` |
//! | success family                        | complete, all, full                          | `FullyVerified` |
//! | failed, rejected, error               | any                                          | `Failed` |
//! | anything else                         | any                                          | `Progress` |

use serde::{Deserialize, Serialize};

const SUCCESS_STATUSES: &[&str] = &["success", "verified", "completed", "complete"];
const FAILURE_STATUSES: &[&str] = &["failed", "rejected", "error"];

const DOCUMENT_TYPES: &[&str] = &["aadhaar", "pan", "document", "id", "analyst"];
const FACE_TYPES: &[&str] = &["face", "liveness", "selfie", "photo", "liveimage"];
const COMPLETE_TYPES: &[&str] = &["complete", "all", "full"];

/// Which check a callback claims to report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    /// Identity document check.
    Document,
    /// Face or liveness check.
    Face,
    /// Both checks in one report.
    Complete,
    /// A type word outside the known vocabulary.
    Unrecognized,
}

impl VerificationKind {
    /// Classify a verification type word. Case and surrounding whitespace
    /// are ignored.
    pub fn classify(verification_type: &str) -> Self {
        let t = verification_type.trim().to_ascii_lowercase();
        if DOCUMENT_TYPES.contains(&t.as_str()) {
            Self::Document
        } else if FACE_TYPES.contains(&t.as_str()) {
            Self::Face
        } else if COMPLETE_TYPES.contains(&t.as_str()) {
            Self::Complete
        } else {
            Self::Unrecognized
        }
    }
}

/// Normalised result of one provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// The document check passed.
    DocumentVerified,
    /// The face check passed.
    FaceVerified,
    /// Both checks passed.
    FullyVerified,
    /// The provider rejected the applicant.
    Failed,
    /// Anything that is neither a recognised success nor a failure.
    Progress,
}

impl CallbackOutcome {
    /// Fold a raw `(status, verification_type)` pair into an outcome.
    pub fn classify(status: &str, verification_type: &str) -> Self {
        let s = status.trim().to_ascii_lowercase();
        if FAILURE_STATUSES.contains(&s.as_str()) {
            return Self::Failed;
        }
        if !SUCCESS_STATUSES.contains(&s.as_str()) {
            return Self::Progress;
        }
        match VerificationKind::classify(verification_type) {
            VerificationKind::Document => Self::DocumentVerified,
            VerificationKind::Face => Self::FaceVerified,
            VerificationKind::Complete => Self::FullyVerified,
            VerificationKind::Unrecognized => Self::Progress,
        }
    }
}
