//! Provider client error types.

/// Errors from provider calls.
///
/// Every variant except [`ProviderError::Config`] describes a failed
/// session-creation attempt that the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider did not answer within the configured timeout.
    #[error("provider request to {endpoint} timed out after {timeout_secs}s")]
    Timeout { endpoint: String, timeout_secs: u64 },

    /// Connection or transport failure.
    #[error("provider unreachable at {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        source: reqwest::Error,
    },

    /// The provider answered with a non-2xx status.
    #[error("provider returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// 2xx with a body that is empty, not JSON, or has no redirect URL.
    #[error("unusable provider response: {reason}")]
    BadResponse { reason: String },

    /// 2xx with an explicit `success: false` or `status: false`.
    #[error("provider reported failure: {message}")]
    Logical { message: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),
}

impl ProviderError {
    /// Whether the provider timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether a later attempt could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
