//! # CRM Config API Main Entry Point

use std::sync::Arc;

use anyhow::Context;
use crm_config::{
    config::ConfigLoader,
    connectors::{SalesforceClient, SalesforceOAuthConfig},
    crypto::{CryptoKey, TokenCipher},
    db,
    oauth_state::StateSigner,
    server::{AppState, run_server},
    telemetry,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;

    telemetry::init_tracing(&config).context("failed to initialize tracing")?;
    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(configuration = %redacted_json, "Effective configuration");
    }

    // Credentials are unusable without the key; refuse to start rather than fail per request.
    let key_bytes = config
        .crypto_key
        .clone()
        .context("CRM_CRYPTO_KEY is required")?;
    let cipher = TokenCipher::new(CryptoKey::new(key_bytes).context("invalid CRM_CRYPTO_KEY")?);
    let signer = StateSigner::new(&config.app_secret).context("invalid CRM_APP_SECRET")?;
    let client = SalesforceClient::new(SalesforceOAuthConfig::from_app_config(&config), signer)
        .context("failed to build Salesforce client")?;

    let db = db::init_schema(&config)
        .await
        .context("failed to prepare database")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
            shutdown.cancel();
        }
    });

    let state = AppState::new(Arc::new(config), db, cipher, client);
    run_server(state, shutdown).await
}
