//! # mimora-api: Axum API Service for the Mimora Backend
//!
//! Hosts the KYC flow for artists and customers: a two-step provider
//! verification (identity document, then face match), the callback
//! reconciler that advances stored verification requests, profile
//! registration, and email one-time-code login.
//!
//! ## API Surface
//!
//! | Prefix                    | Module                    | Auth     |
//! |---------------------------|---------------------------|----------|
//! | `/v1/kyc/:profile_id/*`   | [`routes::kyc`]           | Bearer   |
//! | `/v1/kyc/webhook`         | [`routes::kyc`]           | HMAC     |
//! | `/v1/profiles/*`          | [`routes::profiles`]      | Bearer   |
//! | `/v1/profiles/check`      | [`routes::profiles`]      | none     |
//! | `/v1/auth/email/*`        | [`routes::email_login`]   | none     |
//! | `/openapi.json`           | [`openapi`]               | Bearer   |
//! | `/health/*`, `/metrics`   | this module               | none     |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → RateLimitMiddleware → Handler
//! ```
//!
//! The callback route skips auth and rate limiting. Each email login route
//! and the account existence check has its own limiter in place of bearer
//! auth.

pub mod auth;
pub mod db;
pub mod error;
pub mod extractors;
pub mod kyc;
pub mod mailer;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod store;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::middleware::metrics::ApiMetrics;
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use crate::state::AppState;

const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// Check if metrics are enabled via the `MIMORA_METRICS_ENABLED` env var.
/// Defaults to `true` when the variable is absent or set to anything other than `"false"`.
fn metrics_enabled() -> bool {
    std::env::var("MIMORA_METRICS_ENABLED")
        .map(|v| v.to_lowercase() != "false")
        .unwrap_or(true)
}

fn build_metrics() -> Option<ApiMetrics> {
    if !metrics_enabled() {
        return None;
    }
    match ApiMetrics::new() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::error!("Failed to register Prometheus metrics, continuing without: {e}");
            None
        }
    }
}

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) and `/metrics` are mounted outside the auth
/// middleware so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let limiter = RateLimiter::new(state.config.rate_limit.clone());
    let metrics = build_metrics();

    // Auth runs BEFORE rate limiting so unauthenticated requests are rejected
    // without consuming rate limit quota.
    let api = Router::new()
        .merge(routes::kyc::router())
        .merge(routes::profiles::router())
        .merge(openapi::router())
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(from_fn(auth::auth_middleware))
        .layer(Extension(auth_config))
        .layer(Extension(limiter));

    let otp_issue = routes::email_login::issue_router()
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(Extension(RateLimiter::new(RateLimitConfig::one_time_codes())));
    let otp_verify = routes::email_login::verify_router()
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(Extension(RateLimiter::new(
            RateLimitConfig::one_time_code_checks(),
        )));

    let account_check = routes::profiles::check_router()
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(Extension(RateLimiter::new(RateLimitConfig::account_checks())));

    let mut routed = Router::new()
        .merge(api)
        .merge(routes::kyc::webhook_router())
        .merge(otp_issue)
        .merge(otp_verify)
        .merge(account_check)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES));

    if let Some(m) = &metrics {
        routed = routed
            .layer(from_fn(middleware::metrics::metrics_middleware))
            .layer(Extension(m.clone()));
    }

    let routed = routed
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let mut unauthenticated = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    if let Some(m) = metrics {
        unauthenticated = unauthenticated
            .route("/metrics", axum::routing::get(prometheus_metrics))
            .layer(Extension(m));
    }

    let unauthenticated = unauthenticated.with_state(state);

    Router::new().merge(unauthenticated).merge(routed)
}

/// GET /metrics: Prometheus text exposition.
async fn prometheus_metrics(Extension(metrics): Extension<ApiMetrics>) -> impl IntoResponse {
    match metrics.gather_and_encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode Prometheus metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 "ready" once the store answers, 503 otherwise.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.store.ping().await {
        tracing::warn!("Database health check failed: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}
