//! # KYC Orchestrator
//!
//! Sequences the document and face steps of a profile's verification.
//!
//! ## Start (document step)
//!
//! | Situation                                 | Result |
//! |-------------------------------------------|--------|
//! | profile already verified                  | `already_verified` |
//! | active request with a stored session      | `in_progress`, stored session replayed |
//! | otherwise                                 | provider called, `initiated` |
//!
//! The provider call happens between two store units of work: the request
//! is opened (or reused) first, the session is written back after. If a
//! concurrent caller stored a session in between, that session wins and is
//! returned instead of the new one. The losing session is never used; its
//! handle is logged at debug so it can be traced at the provider.
//!
//! A replay returns the most recent session of the request, which is the
//! face session once one has been issued. The message names the step the
//! replayed URL belongs to.
//!
//! ## Face step
//!
//! Requires an active request whose document check passed. The face session
//! URL replaces the stored redirect URL; the stored session handle is kept
//! as the correlation key.

use mimora_core::ProfileId;
use mimora_kyc_client::{KycProviderClient, ProviderError, SessionRequest, Workflow};
use mimora_state::{KycEvent, KycStatus, KycStep};

use super::{KycError, KycStatusView, StartOutcome, StartStatus};
use crate::middleware::metrics::ApiMetrics;
use crate::store::{KycStore, Profile, VerificationRequest};

const MSG_ALREADY_VERIFIED: &str = "KYC already verified";
const MSG_FULLY_VERIFIED: &str = "KYC already fully verified";
const MSG_IN_PROGRESS: &str = "KYC already in progress";
const MSG_FACE_NEXT: &str = "Document verified. Start face verification next";
const MSG_FACE_IN_PROGRESS: &str =
    "Face verification already in progress. Redirect user to redirect_url";
const MSG_INITIATED: &str = "KYC initiated successfully. Redirect user to redirect_url";
const MSG_DOCUMENT_PENDING: &str =
    "Document verification pending. Please complete Aadhaar/PAN verification first.";
const MSG_FACE_DONE: &str = "Face verification already completed";
const MSG_FACE_INITIATED: &str = "Face verification initiated. Redirect user to redirect_url";

/// Drives verification attempts for profiles.
#[derive(Debug, Clone)]
pub struct KycOrchestrator {
    store: KycStore,
    client: Option<KycProviderClient>,
    metrics: Option<ApiMetrics>,
}

impl KycOrchestrator {
    pub fn new(store: KycStore, client: Option<KycProviderClient>) -> Self {
        Self {
            store,
            client,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<ApiMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    fn client(&self) -> Result<&KycProviderClient, KycError> {
        self.client.as_ref().ok_or(KycError::ProviderNotConfigured)
    }

    async fn load_profile(&self, owner: ProfileId) -> Result<Profile, KycError> {
        self.store
            .get_profile(owner)
            .await?
            .ok_or(KycError::ProfileNotFound(owner))
    }

    async fn open_session(
        &self,
        client: &KycProviderClient,
        workflow: Workflow,
        request: &VerificationRequest,
    ) -> Result<mimora_kyc_client::ProviderSession, KycError> {
        let result = client
            .start_session(&SessionRequest {
                workflow,
                profile_id: request.profile_id,
                reference_id: request.id,
            })
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "error",
        };
        if let Some(m) = &self.metrics {
            m.record_provider_call(workflow.as_str(), outcome);
        }

        result.map_err(|e: ProviderError| {
            tracing::warn!(
                profile_id = %request.profile_id,
                request_id = %request.id,
                workflow = workflow.as_str(),
                error = %e,
                "provider session request failed"
            );
            KycError::Provider(e)
        })
    }

    fn record_transition(&self, status: KycStatus) {
        if let Some(m) = &self.metrics {
            m.record_transition(status.as_str());
        }
    }

    /// `StartVerification`: open (or replay) the document-step session.
    pub async fn start_verification(&self, owner: ProfileId) -> Result<StartOutcome, KycError> {
        let profile = self.load_profile(owner).await?;
        if profile.kyc_verified {
            return Ok(StartOutcome::without_session(
                StartStatus::AlreadyVerified,
                MSG_ALREADY_VERIFIED,
            ));
        }

        if let Some(active) = self.store.active_request(owner).await? {
            if active.has_session() {
                return Ok(replay(&active));
            }
        }

        let client = self.client()?;
        let request = self.store.open_request(owner, client.provider_name()).await?;
        if request.has_session() {
            return Ok(replay(&request));
        }

        let session = self.open_session(client, Workflow::Document, &request).await?;

        let (outcome, status) = self
            .store
            .apply(request.id, |req, profile| -> Result<_, KycError> {
                if req.has_session() {
                    return Ok((replay(req), None));
                }
                // A request advanced by a reference-id callback keeps its status.
                if req.status == KycStatus::Pending || req.status.is_terminal() {
                    let transition = req.progress().apply(KycEvent::SessionOpened)?;
                    req.set_progress(transition.progress);
                }
                req.provider_kyc_id = session.session_id.clone();
                req.session_url = Some(session.session_url.clone());
                if let Some(handle) = &session.session_id {
                    profile.external_kyc_id = Some(handle.clone());
                }
                Ok((
                    StartOutcome {
                        status: StartStatus::Initiated,
                        redirect_url: Some(session.session_url.clone()),
                        session_id: session.session_id.clone(),
                        message: MSG_INITIATED.to_string(),
                    },
                    Some(req.status),
                ))
            })
            .await?;

        match status {
            Some(status) => {
                self.record_transition(status);
                tracing::info!(
                    profile_id = %owner,
                    request_id = %request.id,
                    session_id = ?outcome.session_id,
                    "document verification session opened"
                );
            }
            None => tracing::debug!(
                profile_id = %owner,
                request_id = %request.id,
                kept_session_id = ?outcome.session_id,
                discarded_session_id = ?session.session_id,
                discarded_session_url = %session.session_url,
                "concurrent start already stored a session; discarding ours"
            ),
        }
        Ok(outcome)
    }

    /// `StartFaceStep`: open the face/liveness session once the document
    /// check has passed.
    pub async fn start_face_step(&self, owner: ProfileId) -> Result<StartOutcome, KycError> {
        let profile = self.load_profile(owner).await?;
        if profile.kyc_verified {
            return Ok(StartOutcome::without_session(
                StartStatus::AlreadyVerified,
                MSG_FULLY_VERIFIED,
            ));
        }

        let request = match self.store.active_request(owner).await? {
            Some(r) if r.document_verified => r,
            _ => {
                return Ok(StartOutcome::without_session(
                    StartStatus::DocumentPending,
                    MSG_DOCUMENT_PENDING,
                ))
            }
        };
        if request.face_verified {
            return Ok(StartOutcome::without_session(
                StartStatus::FaceAlreadyVerified,
                MSG_FACE_DONE,
            ));
        }

        let client = self.client()?;
        let session = self.open_session(client, Workflow::Face, &request).await?;

        let (outcome, status) = self
            .store
            .apply(request.id, |req, profile| -> Result<_, KycError> {
                if req.face_verified {
                    return Ok((
                        StartOutcome::without_session(StartStatus::FaceAlreadyVerified, MSG_FACE_DONE),
                        None,
                    ));
                }
                let transition = req.progress().apply(KycEvent::FaceSessionOpened)?;
                req.set_progress(transition.progress);
                if req.provider_kyc_id.is_none() {
                    if let Some(handle) = &session.session_id {
                        req.provider_kyc_id = Some(handle.clone());
                        profile.external_kyc_id = Some(handle.clone());
                    }
                }
                req.session_url = Some(session.session_url.clone());
                Ok((
                    StartOutcome {
                        status: StartStatus::Initiated,
                        redirect_url: Some(session.session_url.clone()),
                        session_id: req
                            .provider_kyc_id
                            .clone()
                            .or_else(|| session.session_id.clone()),
                        message: MSG_FACE_INITIATED.to_string(),
                    },
                    Some(req.status),
                ))
            })
            .await?;

        if let Some(status) = status {
            self.record_transition(status);
            tracing::info!(
                profile_id = %owner,
                request_id = %request.id,
                "face verification session opened"
            );
        }
        Ok(outcome)
    }

    /// `RetryVerification`: cancel every active request, clear the
    /// profile's verification mirror, then start over.
    pub async fn retry_verification(&self, owner: ProfileId) -> Result<StartOutcome, KycError> {
        let cancelled = self.store.reset_verification(owner).await?;
        for _ in 0..cancelled {
            self.record_transition(KycStatus::Cancelled);
        }
        tracing::info!(profile_id = %owner, cancelled, "verification reset for retry");
        self.start_verification(owner).await
    }

    /// `GetStatus`: newest request plus profile flags. Read-only.
    pub async fn status(&self, owner: ProfileId) -> Result<KycStatusView, KycError> {
        let profile = self.load_profile(owner).await?;
        let latest = self.store.latest_request(owner).await?;

        let view = match latest {
            Some(req) => KycStatusView {
                profile_id: owner,
                username: profile.username,
                kyc_verified: profile.kyc_verified,
                bank_verified: profile.bank_verified,
                request_status: req.status.as_str().to_string(),
                document_verified: req.document_verified,
                face_verified: req.face_verified,
                current_step: req.current_step.as_str().to_string(),
                external_kyc_id: profile.external_kyc_id,
                last_verification: req
                    .verification_data
                    .latest()
                    .and_then(|entry| serde_json::to_value(entry).ok()),
                last_updated: Some(req.updated_at),
            },
            None => KycStatusView {
                profile_id: owner,
                username: profile.username,
                kyc_verified: profile.kyc_verified,
                bank_verified: profile.bank_verified,
                request_status: "not_started".to_string(),
                document_verified: false,
                face_verified: false,
                current_step: KycStep::Document.as_str().to_string(),
                external_kyc_id: profile.external_kyc_id,
                last_verification: None,
                last_updated: None,
            },
        };
        Ok(view)
    }
}

fn replay(request: &VerificationRequest) -> StartOutcome {
    let message = match request.status {
        KycStatus::FaceVerificationPending => MSG_FACE_IN_PROGRESS,
        KycStatus::DocumentVerified => MSG_FACE_NEXT,
        _ => MSG_IN_PROGRESS,
    };
    StartOutcome {
        status: StartStatus::InProgress,
        redirect_url: request.session_url.clone(),
        session_id: request.provider_kyc_id.clone(),
        message: message.to_string(),
    }
}
