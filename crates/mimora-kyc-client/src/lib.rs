//! # mimora-kyc-client: KYC Provider Adapter
//!
//! Typed client for the external KYC provider's SSO-route API. One call,
//! [`KycProviderClient::start_session`], opens a hosted document or face
//! flow and returns a canonical [`ProviderSession`].
//!
//! ## Boundaries
//!
//! - Exactly one outbound request per call. No retries: the orchestrator
//!   keeps the request record in its prior state on failure and the client
//!   application retries `start`.
//! - No local state. Callers persist whatever comes back.
//! - Raw provider JSON never leaves this crate; [`session::canonicalize_session`]
//!   is the only reader.
//!
//! ## Error Mapping
//!
//! | Condition                               | Error |
//! |-----------------------------------------|-------|
//! | transport timeout                       | [`ProviderError::Timeout`] |
//! | connection / transport failure          | [`ProviderError::Unreachable`] |
//! | non-2xx status                          | [`ProviderError::Rejected`] (body cut to 200 chars) |
//! | 2xx, empty or non-JSON body             | [`ProviderError::BadResponse`] (excerpt cut to 100 chars) |
//! | 2xx, `success:false` / `status:false`   | [`ProviderError::Logical`] |
//! | 2xx, no redirect URL                    | [`ProviderError::BadResponse`] |

pub mod config;
pub mod error;
pub mod session;

pub use config::{ConfigError, ProviderConfig};
pub use error::ProviderError;
pub use session::{ProviderSession, SessionRequest, Workflow};

use std::sync::Arc;
use std::time::Duration;

use session::{excerpt, AdditionalInfo, SsoRouteBody, UniqueKeys};

const SESSION_PATH: &str = "get_sso_kyc_route";
const REJECTED_BODY_LIMIT: usize = 200;
const BAD_BODY_LIMIT: usize = 100;

/// Client for the provider's session-creation endpoint.
#[derive(Debug, Clone)]
pub struct KycProviderClient {
    http: reqwest::Client,
    endpoint: String,
    config: Arc<ProviderConfig>,
}

impl KycProviderClient {
    /// Create a new client from configuration.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let endpoint = format!(
            "{}/{SESSION_PATH}",
            config.base_url.as_str().trim_end_matches('/')
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::CONTENT_TYPE,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()
            .map_err(|e| ProviderError::Unreachable {
                endpoint: "client_init".into(),
                source: e,
            })?;

        Ok(Self {
            http,
            endpoint,
            config: Arc::new(config),
        })
    }

    /// Provider identifier recorded on verification requests.
    pub fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    /// The full session endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open a hosted verification flow.
    pub async fn start_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError> {
        let cfg = &self.config;
        let (workflow_name, additional_info) = match request.workflow {
            Workflow::Document => (cfg.document_workflow.as_str(), None),
            Workflow::Face => (
                cfg.face_workflow.as_str(),
                Some(AdditionalInfo {
                    image_captured: String::new(),
                }),
            ),
        };
        let body = SsoRouteBody {
            company: &cfg.company,
            workflow_name,
            notification: true,
            secret_key: cfg.secret_key.as_str(),
            unique_keys: UniqueKeys {
                profile_id: request.profile_id,
                reference_id: request.reference_id,
            },
            is_redirect: true,
            redirect_url: &cfg.redirect_url,
            additional_info,
        };

        tracing::info!(
            workflow = request.workflow.as_str(),
            profile_id = %request.profile_id,
            reference_id = %request.reference_id,
            "requesting provider session"
        );

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        endpoint: self.endpoint.clone(),
                        timeout_secs: cfg.timeout_secs,
                    }
                } else {
                    ProviderError::Unreachable {
                        endpoint: self.endpoint.clone(),
                        source: e,
                    }
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    endpoint: self.endpoint.clone(),
                    timeout_secs: cfg.timeout_secs,
                }
            } else {
                ProviderError::Unreachable {
                    endpoint: self.endpoint.clone(),
                    source: e,
                }
            }
        })?;

        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                workflow = request.workflow.as_str(),
                "provider rejected session request"
            );
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: excerpt(&text, REJECTED_BODY_LIMIT),
            });
        }

        if text.trim().is_empty() {
            return Err(ProviderError::BadResponse {
                reason: "empty response body".into(),
            });
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::BadResponse {
                reason: format!("invalid JSON ({e}): {}", excerpt(&text, BAD_BODY_LIMIT)),
            })?;

        let session = session::canonicalize_session(&value)?;
        tracing::info!(
            workflow = request.workflow.as_str(),
            reference_id = %request.reference_id,
            session_id = session.session_id.as_deref().unwrap_or("-"),
            "provider session opened"
        );
        Ok(session)
    }
}
