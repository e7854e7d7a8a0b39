//! # mimora-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the Mimora backend.
//! Binds to configurable port (default 8080).

use mimora_api::kyc::WebhookVerifier;
use mimora_api::mailer::Mailer;
use mimora_api::middleware::rate_limit::RateLimitConfig;
use mimora_api::state::{AppConfig, AppState};
use mimora_kyc_client::{KycProviderClient, ProviderConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let auth_token = std::env::var("AUTH_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());
    if auth_token.is_none() {
        tracing::warn!("AUTH_TOKEN not set, every API request runs with the service identity");
    }
    let config = AppConfig {
        port,
        auth_token,
        rate_limit: RateLimitConfig::from_env(),
    };

    // Absent DATABASE_URL means in-memory only.
    let db_pool = mimora_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    let kyc_client = match ProviderConfig::from_env() {
        Ok(provider) => match KycProviderClient::new(provider) {
            Ok(client) => {
                tracing::info!(provider = client.provider_name(), "KYC provider client configured");
                Some(client)
            }
            Err(e) => {
                tracing::error!("Failed to create KYC provider client: {e}");
                return Err(e.into());
            }
        },
        Err(e) => {
            tracing::warn!("KYC provider not configured: {e}. KYC start endpoints will return 503.");
            None
        }
    };

    let webhook_verifier = WebhookVerifier::from_env();
    if webhook_verifier.is_none() {
        tracing::warn!("MEON_WEBHOOK_SECRET not set, provider callbacks are accepted unsigned");
    }

    let mailer = match Mailer::from_env() {
        Ok(Some(mailer)) => Some(mailer),
        Ok(None) => {
            tracing::warn!("SENDGRID_API_KEY not set, email login will return 503");
            None
        }
        Err(e) => {
            tracing::warn!("Mailer not configured: {e}. Email login will return 503.");
            None
        }
    };

    let state = AppState::with_config(config, kyc_client)
        .with_db_pool(db_pool)
        .with_webhook_verifier(webhook_verifier)
        .with_mailer(mailer);
    tracing::info!(store = state.store.backend(), "verification store ready");

    let app = mimora_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Mimora API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
