//! Provider client configuration.
//!
//! Every value the adapter needs is read once into [`ProviderConfig`] and
//! injected at construction. Nothing in the request path reads the
//! environment.

use url::Url;
use zeroize::Zeroizing;

/// Default provider SSO-route base URL.
pub const DEFAULT_BASE_URL: &str = "https://live.meon.co.in/get_sso_route";

/// Configuration for the KYC provider client.
///
/// Custom `Debug` implementation redacts `secret_key`.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Base URL of the SSO-route API. The session endpoint is
    /// `{base_url}/get_sso_kyc_route`.
    pub base_url: Url,
    /// Provider identifier stored on each verification request.
    pub provider_name: String,
    /// Company name registered with the provider.
    pub company: String,
    /// Shared secret sent in the request body.
    pub secret_key: Zeroizing<String>,
    /// Workflow name for the document step.
    pub document_workflow: String,
    /// Workflow name for the face step.
    pub face_workflow: String,
    /// Where the provider sends the applicant when the hosted flow ends.
    pub redirect_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("provider_name", &self.provider_name)
            .field("company", &self.company)
            .field("secret_key", &"[REDACTED]")
            .field("document_workflow", &self.document_workflow)
            .field("face_workflow", &self.face_workflow)
            .field("redirect_url", &self.redirect_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `MEON_API_BASE_URL` (default: `https://live.meon.co.in/get_sso_route`)
    /// - `MEON_SECRET_KEY` (required)
    /// - `MEON_COMPANY_NAME` (default: `mimora`)
    /// - `MEON_KYC_WORKFLOW_NAME` (default: `analyst`)
    /// - `MEON_FACE_WORKFLOW_NAME` (default: `image_verification`)
    /// - `MEON_REDIRECT_URL` (default: `https://mimora.app/kyc/complete`)
    /// - `MEON_PROVIDER_NAME` (default: `meon`)
    /// - `MEON_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret_key = std::env::var("MEON_SECRET_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        Ok(Self {
            base_url: env_url("MEON_API_BASE_URL", DEFAULT_BASE_URL)?,
            provider_name: env_or("MEON_PROVIDER_NAME", "meon"),
            company: env_or("MEON_COMPANY_NAME", "mimora"),
            secret_key: Zeroizing::new(secret_key),
            document_workflow: env_or("MEON_KYC_WORKFLOW_NAME", "analyst"),
            face_workflow: env_or("MEON_FACE_WORKFLOW_NAME", "image_verification"),
            redirect_url: env_or("MEON_REDIRECT_URL", "https://mimora.app/kyc/complete"),
            timeout_secs: std::env::var("MEON_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        })
    }

    /// Configuration pointing at a local mock server, with defaults for
    /// everything else.
    pub fn for_base_url(base_url: &str, secret_key: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: Url::parse(base_url)
                .map_err(|e| ConfigError::InvalidUrl(base_url.to_string(), e.to_string()))?,
            provider_name: "meon".into(),
            company: "mimora".into(),
            secret_key: Zeroizing::new(secret_key.to_string()),
            document_workflow: "analyst".into(),
            face_workflow: "image_verification".into(),
            redirect_url: "https://mimora.app/kyc/complete".into(),
            timeout_secs: 5,
        })
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_url(var: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MEON_SECRET_KEY environment variable is required")]
    MissingSecret,
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
}
