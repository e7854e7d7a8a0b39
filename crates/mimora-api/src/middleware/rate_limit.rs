//! # Per-Caller Rate Limiting
//!
//! Fixed-window counter keyed by caller. Authenticated routes key on the
//! bound profile (or the role for unbound callers); public routes key on
//! the first `X-Forwarded-For` address. In-memory only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;

use crate::auth::CallerIdentity;
use crate::error::{ErrorBody, ErrorDetail};

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    /// Limit for the unauthenticated one-time-code routes: 5 per minute.
    pub fn one_time_codes() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
        }
    }

    /// Limit for one-time-code verification attempts: 10 per minute.
    pub fn one_time_code_checks() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }

    /// Limit for the unauthenticated account existence check: 20 per minute.
    pub fn account_checks() -> Self {
        Self {
            max_requests: 20,
            window_secs: 60,
        }
    }

    /// Read `RATE_LIMIT_MAX_REQUESTS` and `RATE_LIMIT_WINDOW_SECS`, keeping
    /// the default for anything absent or unparsable.
    pub fn from_env() -> Self {
        let default = Self::default();
        let read = |var: &str, fallback: u64| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(fallback)
        };
        Self {
            max_requests: read("RATE_LIMIT_MAX_REQUESTS", default.max_requests),
            window_secs: read("RATE_LIMIT_WINDOW_SECS", default.window_secs),
        }
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request from `key` and report whether it is within limits.
    fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();

        let bucket = buckets.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start).as_secs() >= self.config.window_secs {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.max_requests {
            false
        } else {
            bucket.count += 1;
            true
        }
    }
}

fn rate_limit_key(request: &Request) -> String {
    if let Some(caller) = request.extensions().get::<CallerIdentity>() {
        return match caller.profile_id {
            Some(id) => format!("profile:{id}"),
            None => format!("role:{}", caller.role.as_str()),
        };
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| format!("ip:{}", ip.trim()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Middleware that enforces per-caller rate limits.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let limiter = request.extensions().get::<RateLimiter>().cloned();

    if let Some(limiter) = limiter {
        let key = rate_limit_key(&request);
        if !limiter.check(&key) {
            tracing::warn!(key = %key, "rate limit exceeded");
            let body = ErrorBody {
                error: ErrorDetail {
                    code: "RATE_LIMITED".to_string(),
                    message: "rate limit exceeded".to_string(),
                    details: None,
                },
            };
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }
    }

    next.run(request).await
}
