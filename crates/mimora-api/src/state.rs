//! # Application State
//!
//! Shared state passed to every Axum handler. All fields are cheap to clone:
//! the store is a pool or an `Arc`'d table set, the clients wrap `Arc`'d
//! HTTP connection pools.
//!
//! Optional collaborators are `None` when their environment is missing; the
//! routes that need them answer 503 instead of failing at startup.

use mimora_kyc_client::KycProviderClient;
use sqlx::PgPool;

use crate::kyc::{KycOrchestrator, WebhookReconciler, WebhookVerifier};
use crate::mailer::Mailer;
use crate::middleware::metrics::ApiMetrics;
use crate::middleware::rate_limit::RateLimitConfig;
use crate::store::KycStore;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Bearer token secret. If `None`, authentication is disabled.
    pub auth_token: Option<String>,
    /// Limit for the authenticated API surface.
    pub rate_limit: RateLimitConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Profiles, verification requests, login challenges.
    pub store: KycStore,
    /// KYC provider adapter. `None` when `MEON_SECRET_KEY` is unset.
    pub kyc_client: Option<KycProviderClient>,
    /// Callback signature check. `None` accepts unsigned callbacks.
    pub webhook_verifier: Option<WebhookVerifier>,
    /// Login code delivery. `None` when `SENDGRID_API_KEY` is unset.
    pub mailer: Option<Mailer>,
    /// Pool backing the store, kept for the readiness probe.
    pub db_pool: Option<PgPool>,
    pub config: AppConfig,
}

impl AppState {
    /// In-memory state with default configuration and no collaborators.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), None)
    }

    /// In-memory state with the given configuration and provider client.
    pub fn with_config(config: AppConfig, kyc_client: Option<KycProviderClient>) -> Self {
        Self {
            store: KycStore::default(),
            kyc_client,
            webhook_verifier: None,
            mailer: None,
            db_pool: None,
            config,
        }
    }

    /// Switch the store to Postgres when a pool is given.
    pub fn with_db_pool(mut self, pool: Option<PgPool>) -> Self {
        self.store = KycStore::from_pool(pool.clone());
        self.db_pool = pool;
        self
    }

    pub fn with_webhook_verifier(mut self, verifier: Option<WebhookVerifier>) -> Self {
        self.webhook_verifier = verifier;
        self
    }

    pub fn with_mailer(mut self, mailer: Option<Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Orchestrator over this state's store and provider client.
    pub fn orchestrator(&self, metrics: Option<ApiMetrics>) -> KycOrchestrator {
        KycOrchestrator::new(self.store.clone(), self.kyc_client.clone()).with_metrics(metrics)
    }

    /// Reconciler over this state's store and signature check.
    pub fn reconciler(&self, metrics: Option<ApiMetrics>) -> WebhookReconciler {
        WebhookReconciler::new(self.store.clone(), self.webhook_verifier.clone())
            .with_metrics(metrics)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
