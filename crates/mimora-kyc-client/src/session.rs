//! Session request and response shapes.
//!
//! The provider's response schema differs between workflows. The redirect
//! URL may arrive as `sso_url`, `url`, `link`, `redirect_url` or nested at
//! `data.url`; the session id as `request_id`, `id`, `kyc_id` or
//! `session_id`. [`canonicalize_session`] probes those candidates in order
//! and is the only place that looks inside a raw response.

use mimora_core::{ProfileId, VerificationRequestId};
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderError;

/// Candidate keys for the redirect URL, highest priority first.
pub const URL_KEYS: &[&str] = &["sso_url", "url", "link", "redirect_url"];

/// Candidate keys for the session id, highest priority first.
pub const SESSION_ID_KEYS: &[&str] = &["request_id", "id", "kyc_id", "session_id"];

const DEFAULT_FAILURE_MESSAGE: &str = "unknown provider error";

/// Which hosted flow to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    /// Identity document capture and check.
    Document,
    /// Face/liveness capture.
    Face,
}

impl Workflow {
    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Face => "face",
        }
    }
}

/// Intent to open a provider session.
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest {
    /// Flow to open.
    pub workflow: Workflow,
    /// Profile being verified.
    pub profile_id: ProfileId,
    /// Our request id, echoed back by the provider in callbacks.
    pub reference_id: VerificationRequestId,
}

/// Canonical result of session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    /// Where to send the applicant.
    pub session_url: String,
    /// Provider session handle, when the provider returned one.
    pub session_id: Option<String>,
}

/// Wire body for `POST {base}/get_sso_kyc_route`.
#[derive(Debug, Serialize)]
pub(crate) struct SsoRouteBody<'a> {
    pub company: &'a str,
    #[serde(rename = "workflowName")]
    pub workflow_name: &'a str,
    pub notification: bool,
    pub secret_key: &'a str,
    pub unique_keys: UniqueKeys,
    pub is_redirect: bool,
    pub redirect_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<AdditionalInfo>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UniqueKeys {
    pub profile_id: ProfileId,
    pub reference_id: VerificationRequestId,
}

#[derive(Debug, Serialize)]
pub(crate) struct AdditionalInfo {
    pub image_captured: String,
}

/// Turn a 2xx JSON response into a [`ProviderSession`].
pub fn canonicalize_session(body: &Value) -> Result<ProviderSession, ProviderError> {
    let obj = body.as_object().ok_or_else(|| ProviderError::BadResponse {
        reason: "expected a JSON object".into(),
    })?;

    if obj.get("success") == Some(&Value::Bool(false))
        || obj.get("status") == Some(&Value::Bool(false))
    {
        let message = first_string(body, &["msg", "message"])
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        return Err(ProviderError::Logical { message });
    }

    let session_url = first_string(body, URL_KEYS)
        .or_else(|| body.get("data").and_then(|d| first_string(d, &["url"])))
        .ok_or_else(|| ProviderError::BadResponse {
            reason: "no redirect URL in provider response".into(),
        })?;

    Ok(ProviderSession {
        session_url,
        session_id: first_string(body, SESSION_ID_KEYS),
    })
}

/// First candidate key holding a non-empty string or a number.
pub fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// At most `max` characters of `s`.
pub(crate) fn excerpt(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
