//! # KYC Request State Machine
//!
//! ```text
//!   Pending ──SessionOpened──▶ InProgress ──callback(document)──▶ DocumentVerified
//!                                                                     │
//!                                                          FaceSessionOpened
//!                                                                     ▼
//!                              Verified ◀──callback(face)── FaceVerificationPending
//!
//!   any non-terminal ──callback(failed)──▶ Failed
//!   any non-terminal ──Cancel──▶ Cancelled
//! ```
//!
//! `Verified`, `Failed` and `Cancelled` are terminal. A callback that lands
//! on a terminal request is absorbed: it changes nothing and is not an
//! error, so provider replays are harmless.
//!
//! ## Forward-only progress
//!
//! Successful callbacks only ever raise the status rank
//! (`Pending < InProgress < DocumentVerified < FaceVerificationPending <
//! Verified`) and the step (`Document < Face < Complete`). A late document
//! callback on a request already waiting for its face check keeps it in
//! `FaceVerificationPending`; a "still processing" callback never drags a
//! request back below where it already is.
//!
//! A request reaches `Verified` only once both step flags are set. A face
//! result that arrives before the document result is recorded on the flag
//! and completes the request when the document result lands.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::callback::CallbackOutcome;

/// Status of one verification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    /// Created, no provider session yet.
    Pending,
    /// Provider session issued for the document step.
    InProgress,
    /// Document check passed; face step not yet started.
    DocumentVerified,
    /// Face session issued, awaiting the face result.
    FaceVerificationPending,
    /// Both checks passed. Terminal.
    Verified,
    /// Provider rejected the applicant. Terminal.
    Failed,
    /// Superseded by a retry. Terminal.
    Cancelled,
}

impl KycStatus {
    /// Every status, in declaration order.
    pub const ALL: [KycStatus; 7] = [
        Self::Pending,
        Self::InProgress,
        Self::DocumentVerified,
        Self::FaceVerificationPending,
        Self::Verified,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses that count as an active request.
    pub const ACTIVE: [KycStatus; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::DocumentVerified,
        Self::FaceVerificationPending,
    ];

    /// Whether this is a terminal state (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed | Self::Cancelled)
    }

    /// Whether a request in this state is the owner's active request.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// The storage and wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::DocumentVerified => "document_verified",
            Self::FaceVerificationPending => "face_verification_pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Position on the happy path. Failure states have no rank.
    fn forward_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::InProgress => Some(1),
            Self::DocumentVerified => Some(2),
            Self::FaceVerificationPending => Some(3),
            Self::Verified => Some(4),
            Self::Failed | Self::Cancelled => None,
        }
    }
}

impl std::fmt::Display for KycStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which check the applicant is currently on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStep {
    /// Document check.
    Document,
    /// Face check.
    Face,
    /// Both checks done.
    Complete,
}

impl KycStep {
    /// The storage and wire name of this step.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Face => "face",
            Self::Complete => "complete",
        }
    }

    /// Parse a stored step name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "face" => Some(Self::Face),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for KycStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "outcome")]
pub enum KycEvent {
    /// The provider issued a document-step session.
    SessionOpened,
    /// The provider issued a face-step session.
    FaceSessionOpened,
    /// The provider reported a result.
    Callback(CallbackOutcome),
    /// The owner asked to start over.
    Cancel,
}

impl KycEvent {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionOpened => "session_opened",
            Self::FaceSessionOpened => "face_session_opened",
            Self::Callback(_) => "callback",
            Self::Cancel => "cancel",
        }
    }
}

/// Errors from [`KycProgress::apply`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KycTransitionError {
    /// The request is already terminal.
    #[error("request is already {status}; cannot apply {event}")]
    AlreadyTerminal {
        /// Terminal status the request is in.
        status: KycStatus,
        /// Name of the rejected event.
        event: &'static str,
    },

    /// The event is not valid in the current state.
    #[error("cannot apply {event} in state {from}: {reason}")]
    InvalidTransition {
        /// Current status.
        from: KycStatus,
        /// Name of the rejected event.
        event: &'static str,
        /// Why the event was rejected.
        reason: String,
    },
}

/// Verification progress carried by a request: status, step and the two
/// step flags. These four fields always move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycProgress {
    /// Request status.
    pub status: KycStatus,
    /// Current step.
    pub current_step: KycStep,
    /// Document check passed.
    pub document_verified: bool,
    /// Face check passed.
    pub face_verified: bool,
}

impl Default for KycProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Progress after the event.
    pub progress: KycProgress,
    /// New value for the owning profile's `kyc_verified`, if the event
    /// decides it.
    pub kyc_verified: Option<bool>,
}

impl Transition {
    /// Whether the event changed anything.
    pub fn changed(&self, before: &KycProgress) -> bool {
        &self.progress != before || self.kyc_verified.is_some()
    }
}

impl KycProgress {
    /// Progress of a freshly created request.
    pub fn new() -> Self {
        Self {
            status: KycStatus::Pending,
            current_step: KycStep::Document,
            document_verified: false,
            face_verified: false,
        }
    }

    /// Apply an event, returning the resulting progress and profile effect.
    ///
    /// `self` is not modified; the caller persists the returned progress.
    pub fn apply(&self, event: KycEvent) -> Result<Transition, KycTransitionError> {
        match event {
            KycEvent::Callback(outcome) => Ok(self.apply_callback(outcome)),
            KycEvent::SessionOpened => {
                self.require_live(event)?;
                if self.status != KycStatus::Pending {
                    return Err(KycTransitionError::InvalidTransition {
                        from: self.status,
                        event: event.name(),
                        reason: "a provider session is already open".into(),
                    });
                }
                Ok(self.unchanged_with(KycStatus::InProgress))
            }
            KycEvent::FaceSessionOpened => {
                self.require_live(event)?;
                if !self.document_verified {
                    return Err(KycTransitionError::InvalidTransition {
                        from: self.status,
                        event: event.name(),
                        reason: "document step not verified".into(),
                    });
                }
                if self.face_verified {
                    return Err(KycTransitionError::InvalidTransition {
                        from: self.status,
                        event: event.name(),
                        reason: "face step already verified".into(),
                    });
                }
                let mut next = *self;
                next.status = raise(self.status, KycStatus::FaceVerificationPending);
                next.current_step = self.current_step.max(KycStep::Face);
                Ok(Transition {
                    progress: next,
                    kyc_verified: None,
                })
            }
            KycEvent::Cancel => {
                self.require_live(event)?;
                Ok(self.unchanged_with(KycStatus::Cancelled))
            }
        }
    }

    fn require_live(&self, event: KycEvent) -> Result<(), KycTransitionError> {
        if self.status.is_terminal() {
            Err(KycTransitionError::AlreadyTerminal {
                status: self.status,
                event: event.name(),
            })
        } else {
            Ok(())
        }
    }

    fn unchanged_with(&self, status: KycStatus) -> Transition {
        let mut next = *self;
        next.status = status;
        Transition {
            progress: next,
            kyc_verified: None,
        }
    }

    fn apply_callback(&self, outcome: CallbackOutcome) -> Transition {
        if self.status.is_terminal() {
            return Transition {
                progress: *self,
                kyc_verified: None,
            };
        }

        let mut next = *self;
        match outcome {
            CallbackOutcome::Failed => {
                next.status = KycStatus::Failed;
                return Transition {
                    progress: next,
                    kyc_verified: Some(false),
                };
            }
            CallbackOutcome::DocumentVerified => next.document_verified = true,
            CallbackOutcome::FaceVerified => next.face_verified = true,
            CallbackOutcome::FullyVerified => {
                next.document_verified = true;
                next.face_verified = true;
            }
            CallbackOutcome::Progress => {}
        }

        if next.document_verified && next.face_verified {
            next.status = KycStatus::Verified;
            next.current_step = KycStep::Complete;
            return Transition {
                progress: next,
                kyc_verified: Some(true),
            };
        }

        if next.document_verified && outcome == CallbackOutcome::DocumentVerified {
            next.status = raise(next.status, KycStatus::DocumentVerified);
            next.current_step = next.current_step.max(KycStep::Face);
        } else {
            next.status = raise(next.status, KycStatus::InProgress);
        }
        Transition {
            progress: next,
            kyc_verified: None,
        }
    }
}

/// The higher-ranked of two live statuses.
fn raise(current: KycStatus, target: KycStatus) -> KycStatus {
    match (current.forward_rank(), target.forward_rank()) {
        (Some(c), Some(t)) if c >= t => current,
        _ => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn progress(status: KycStatus, step: KycStep, doc: bool, face: bool) -> KycProgress {
        KycProgress {
            status,
            current_step: step,
            document_verified: doc,
            face_verified: face,
        }
    }

    fn in_progress() -> KycProgress {
        progress(KycStatus::InProgress, KycStep::Document, false, false)
    }

    fn callback(p: &KycProgress, outcome: CallbackOutcome) -> Transition {
        p.apply(KycEvent::Callback(outcome)).unwrap()
    }

    #[test]
    fn new_request_is_pending_on_document_step() {
        let p = KycProgress::new();
        assert_eq!(p.status, KycStatus::Pending);
        assert_eq!(p.current_step, KycStep::Document);
        assert!(!p.document_verified && !p.face_verified);
    }

    #[test]
    fn session_opened_moves_pending_to_in_progress() {
        let t = KycProgress::new().apply(KycEvent::SessionOpened).unwrap();
        assert_eq!(t.progress.status, KycStatus::InProgress);
        assert_eq!(t.kyc_verified, None);
    }

    #[test]
    fn session_opened_twice_is_rejected() {
        let err = in_progress().apply(KycEvent::SessionOpened).unwrap_err();
        assert!(matches!(err, KycTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn document_callback_advances_to_face_step() {
        let t = callback(&in_progress(), CallbackOutcome::DocumentVerified);
        assert_eq!(
            t.progress,
            progress(KycStatus::DocumentVerified, KycStep::Face, true, false)
        );
        assert_eq!(t.kyc_verified, None);
    }

    #[test]
    fn face_callback_after_document_completes() {
        let doc = callback(&in_progress(), CallbackOutcome::DocumentVerified).progress;
        let t = callback(&doc, CallbackOutcome::FaceVerified);
        assert_eq!(
            t.progress,
            progress(KycStatus::Verified, KycStep::Complete, true, true)
        );
        assert_eq!(t.kyc_verified, Some(true));
    }

    #[test]
    fn fully_verified_sets_both_flags() {
        let t = callback(&in_progress(), CallbackOutcome::FullyVerified);
        assert_eq!(
            t.progress,
            progress(KycStatus::Verified, KycStep::Complete, true, true)
        );
        assert_eq!(t.kyc_verified, Some(true));
    }

    #[test]
    fn failure_keeps_flags_and_clears_profile() {
        let doc = callback(&in_progress(), CallbackOutcome::DocumentVerified).progress;
        let t = callback(&doc, CallbackOutcome::Failed);
        assert_eq!(t.progress.status, KycStatus::Failed);
        assert!(t.progress.document_verified);
        assert!(!t.progress.face_verified);
        assert_eq!(t.progress.current_step, KycStep::Face);
        assert_eq!(t.kyc_verified, Some(false));
    }

    #[test]
    fn progress_callback_on_pending_moves_to_in_progress() {
        let t = callback(&KycProgress::new(), CallbackOutcome::Progress);
        assert_eq!(t.progress.status, KycStatus::InProgress);
        assert_eq!(t.progress.current_step, KycStep::Document);
    }

    #[test]
    fn progress_callback_never_regresses_status() {
        let face_pending = progress(
            KycStatus::FaceVerificationPending,
            KycStep::Face,
            true,
            false,
        );
        let t = callback(&face_pending, CallbackOutcome::Progress);
        assert_eq!(t.progress, face_pending);
    }

    #[test]
    fn late_document_callback_keeps_face_pending() {
        let face_pending = progress(
            KycStatus::FaceVerificationPending,
            KycStep::Face,
            true,
            false,
        );
        let t = callback(&face_pending, CallbackOutcome::DocumentVerified);
        assert_eq!(t.progress.status, KycStatus::FaceVerificationPending);
    }

    #[test]
    fn face_before_document_waits_for_document() {
        let t = callback(&in_progress(), CallbackOutcome::FaceVerified);
        assert!(t.progress.face_verified);
        assert!(!t.progress.document_verified);
        assert_eq!(t.progress.status, KycStatus::InProgress);
        assert_eq!(t.progress.current_step, KycStep::Document);
        assert_eq!(t.kyc_verified, None);

        let done = callback(&t.progress, CallbackOutcome::DocumentVerified);
        assert_eq!(done.progress.status, KycStatus::Verified);
        assert_eq!(done.kyc_verified, Some(true));
    }

    #[test]
    fn callbacks_on_terminal_requests_are_absorbed() {
        for status in [KycStatus::Verified, KycStatus::Failed, KycStatus::Cancelled] {
            let p = progress(status, KycStep::Face, true, false);
            for outcome in [
                CallbackOutcome::DocumentVerified,
                CallbackOutcome::FaceVerified,
                CallbackOutcome::Failed,
                CallbackOutcome::Progress,
            ] {
                let t = callback(&p, outcome);
                assert_eq!(t.progress, p);
                assert!(!t.changed(&p));
            }
        }
    }

    #[test]
    fn face_session_requires_document() {
        let err = in_progress().apply(KycEvent::FaceSessionOpened).unwrap_err();
        assert!(err.to_string().contains("document step not verified"));
    }

    #[test]
    fn face_session_rejected_when_face_already_verified() {
        let p = progress(KycStatus::InProgress, KycStep::Document, false, true);
        let p = KycProgress {
            document_verified: true,
            ..p
        };
        let err = p.apply(KycEvent::FaceSessionOpened).unwrap_err();
        assert!(err.to_string().contains("face step already verified"));
    }

    #[test]
    fn face_session_moves_to_face_pending() {
        let doc = progress(KycStatus::DocumentVerified, KycStep::Face, true, false);
        let t = doc.apply(KycEvent::FaceSessionOpened).unwrap();
        assert_eq!(t.progress.status, KycStatus::FaceVerificationPending);
        assert_eq!(t.progress.current_step, KycStep::Face);
    }

    #[test]
    fn cancel_from_every_live_state() {
        for status in KycStatus::ACTIVE {
            let p = progress(status, KycStep::Document, false, false);
            let t = p.apply(KycEvent::Cancel).unwrap();
            assert_eq!(t.progress.status, KycStatus::Cancelled);
        }
    }

    #[test]
    fn cancel_on_terminal_is_error() {
        let p = progress(KycStatus::Verified, KycStep::Complete, true, true);
        let err = p.apply(KycEvent::Cancel).unwrap_err();
        assert_eq!(
            err,
            KycTransitionError::AlreadyTerminal {
                status: KycStatus::Verified,
                event: "cancel",
            }
        );
    }

    #[test]
    fn status_names_round_trip() {
        for status in KycStatus::ALL {
            assert_eq!(KycStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(KycStatus::parse("not_started"), None);
    }

    #[test]
    fn step_names_round_trip() {
        for step in [KycStep::Document, KycStep::Face, KycStep::Complete] {
            assert_eq!(KycStep::parse(step.as_str()), Some(step));
        }
    }

    #[test]
    fn active_and_terminal_partition_all_statuses() {
        for status in KycStatus::ALL {
            assert_ne!(status.is_active(), status.is_terminal());
            assert_eq!(KycStatus::ACTIVE.contains(&status), status.is_active());
        }
    }

    fn arb_event() -> impl Strategy<Value = KycEvent> {
        prop_oneof![
            Just(KycEvent::SessionOpened),
            Just(KycEvent::FaceSessionOpened),
            Just(KycEvent::Callback(CallbackOutcome::DocumentVerified)),
            Just(KycEvent::Callback(CallbackOutcome::FaceVerified)),
            Just(KycEvent::Callback(CallbackOutcome::FullyVerified)),
            Just(KycEvent::Callback(CallbackOutcome::Progress)),
            Just(KycEvent::Callback(CallbackOutcome::Failed)),
        ]
    }

    proptest! {
        #[test]
        fn step_and_flags_never_move_backwards(
            events in proptest::collection::vec(arb_event(), 0..24)
        ) {
            let mut p = KycProgress::new();
            for event in events {
                if let Ok(t) = p.apply(event) {
                    prop_assert!(t.progress.current_step >= p.current_step);
                    prop_assert!(t.progress.document_verified >= p.document_verified);
                    prop_assert!(t.progress.face_verified >= p.face_verified);
                    p = t.progress;
                }
            }
        }

        #[test]
        fn verified_flag_implies_complete_request(
            events in proptest::collection::vec(arb_event(), 0..24)
        ) {
            let mut p = KycProgress::new();
            for event in events {
                if let Ok(t) = p.apply(event) {
                    if t.kyc_verified == Some(true) {
                        prop_assert_eq!(t.progress.status, KycStatus::Verified);
                        prop_assert!(t.progress.document_verified && t.progress.face_verified);
                        prop_assert_eq!(t.progress.current_step, KycStep::Complete);
                    }
                    p = t.progress;
                }
            }
        }

        #[test]
        fn replaying_a_callback_is_idempotent(
            events in proptest::collection::vec(arb_event(), 0..12),
            last in arb_event()
        ) {
            let mut p = KycProgress::new();
            for event in events {
                if let Ok(t) = p.apply(event) {
                    p = t.progress;
                }
            }
            if let KycEvent::Callback(_) = last {
                let once = p.apply(last).unwrap();
                let twice = once.progress.apply(last).unwrap();
                prop_assert_eq!(once.progress, twice.progress);
            }
        }
    }
}
