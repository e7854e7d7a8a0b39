//! # One-Time Code Mailer
//!
//! Sends login codes through the SendGrid v3 `mail/send` endpoint.
//!
//! | Variable           | Default |
//! |--------------------|---------|
//! | `SENDGRID_API_KEY` | required (absent: mailer disabled) |
//! | `FROM_EMAIL`       | `noreply@mimora.app` |
//! | `SENDGRID_API_URL` | `https://api.sendgrid.com` |

use std::time::Duration;

use serde_json::json;
use url::Url;
use zeroize::Zeroizing;

const DEFAULT_API_URL: &str = "https://api.sendgrid.com";
const DEFAULT_FROM: &str = "noreply@mimora.app";
const SEND_PATH: &str = "v3/mail/send";
const TIMEOUT_SECS: u64 = 10;

/// Mail delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("invalid mailer configuration: {0}")]
    Config(String),
    #[error("mail relay unreachable: {0}")]
    Unreachable(String),
    #[error("mail relay returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// SendGrid client.
#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    endpoint: String,
    api_key: Zeroizing<String>,
    from: String,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("from", &self.from)
            .finish()
    }
}

impl Mailer {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Result<Self, MailerError> {
        let base = Url::parse(api_url)
            .map_err(|e| MailerError::Config(format!("SENDGRID_API_URL {api_url:?}: {e}")))?;
        let endpoint = format!("{}/{SEND_PATH}", base.as_str().trim_end_matches('/'));
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(|e| MailerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            api_key: Zeroizing::new(api_key.to_string()),
            from: from.to_string(),
        })
    }

    /// `Ok(None)` when `SENDGRID_API_KEY` is unset.
    pub fn from_env() -> Result<Option<Self>, MailerError> {
        let Some(key) = std::env::var("SENDGRID_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
        else {
            return Ok(None);
        };
        let api_url =
            std::env::var("SENDGRID_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let from = std::env::var("FROM_EMAIL").unwrap_or_else(|_| DEFAULT_FROM.to_string());
        Self::new(&api_url, &key, &from).map(Some)
    }

    /// Deliver a login code to `to`.
    pub async fn send_login_code(&self, to: &str, code: &str) -> Result<(), MailerError> {
        let minutes = mimora_core::OTP_TTL_SECS / 60;
        let body = json!({
            "personalizations": [{"to": [{"email": to}]}],
            "from": {"email": self.from},
            "subject": "Your Mimora login code",
            "content": [{
                "type": "text/plain",
                "value": format!("Your Mimora login code is {code}. It expires in {minutes} minutes."),
            }],
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| MailerError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
            return Err(MailerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(to = %to, "login code sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_code_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("authorization", "Bearer sg-key"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = Mailer::new(&server.uri(), "sg-key", "noreply@mimora.app").unwrap();
        mailer.send_login_code("ana@mimora.app", "123456").await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "ana@mimora.app");
        assert!(body["content"][0]["value"].as_str().unwrap().contains("123456"));
    }

    #[tokio::test]
    async fn non_2xx_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let mailer = Mailer::new(&server.uri(), "k", "f@mimora.app").unwrap();
        match mailer.send_login_code("a@b.co", "000000").await {
            Err(MailerError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn invalid_url_is_config_error() {
        assert!(matches!(
            Mailer::new("not a url", "k", "f@mimora.app"),
            Err(MailerError::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let mailer = Mailer::new(DEFAULT_API_URL, "sg-secret", DEFAULT_FROM).unwrap();
        assert!(!format!("{mailer:?}").contains("sg-secret"));
    }
}
