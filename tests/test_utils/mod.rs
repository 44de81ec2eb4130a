//! Test utilities shared by the integration suites.
//!
//! In-memory SQLite with migrations, a test configuration pointed at a mock
//! Salesforce, and a helper that serves the real router on a random port.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use crm_config::{
    config::AppConfig,
    connectors::{SalesforceClient, SalesforceOAuthConfig},
    crypto::{CryptoKey, TokenCipher},
    db,
    oauth_state::StateSigner,
    repositories::{
        ConnectionRepository, CreateOrganization, OrganizationRepository, UpsertConnection,
    },
    server::{AppState, create_app},
};
use sea_orm::DatabaseConnection;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use uuid::Uuid;

pub const TEST_KEY: [u8; 32] = [0x42; 32];
pub const TEST_CLIENT_ID: &str = "test-client-id";
pub const TEST_CLIENT_SECRET: &str = "test-client-secret";
pub const TEST_APP_SECRET: &str = "integration-test-app-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..AppConfig::default()
    };
    Ok(db::init_schema(&config).await?)
}

pub fn test_cipher() -> TokenCipher {
    TokenCipher::new(CryptoKey::new(TEST_KEY.to_vec()).expect("test key is 32 bytes"))
}

/// Configuration whose Salesforce login host is `login_base`.
pub fn test_config(login_base: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        crypto_key: Some(TEST_KEY.to_vec()),
        app_secret: TEST_APP_SECRET.to_string(),
        salesforce_client_id: Some(TEST_CLIENT_ID.to_string()),
        salesforce_client_secret: Some(TEST_CLIENT_SECRET.to_string()),
        salesforce_login_base: login_base.trim_end_matches('/').to_string(),
        salesforce_token_timeout_seconds: 5,
        salesforce_api_timeout_seconds: 5,
        ..AppConfig::default()
    }
}

pub fn test_signer() -> StateSigner {
    StateSigner::new(TEST_APP_SECRET).expect("non-empty secret")
}

pub fn test_client(config: &AppConfig) -> SalesforceClient {
    SalesforceClient::new(SalesforceOAuthConfig::from_app_config(config), test_signer())
        .expect("client builds")
}

pub struct TestServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl TestServerHandle {
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }

        Ok(())
    }
}

pub struct TestApp {
    pub base_url: String,
    pub db: DatabaseConnection,
    pub http: reqwest::Client,
    pub handle: TestServerHandle,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Serve the full router against a fresh database on `127.0.0.1:0`.
pub async fn spawn_test_app(config: AppConfig) -> TestApp {
    let db = setup_test_db().await.expect("test database");
    let client = test_client(&config);
    let state = AppState::new(Arc::new(config), db.clone(), test_cipher(), client);
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .context("axum server error")
    });

    TestApp {
        base_url: format!("http://{addr}"),
        db,
        http: reqwest::Client::new(),
        handle: TestServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
        },
    }
}

pub async fn create_test_org(db: &DatabaseConnection, slug: &str) -> Result<Uuid> {
    let org = OrganizationRepository::new(db)
        .create(CreateOrganization {
            name: format!("Org {slug}"),
            slug: slug.to_string(),
        })
        .await?;
    Ok(org.id)
}

/// Store a connection with the given plaintext tokens, encrypted with [`TEST_KEY`].
pub async fn seed_connection(
    db: &DatabaseConnection,
    org_id: Uuid,
    instance_url: &str,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<Uuid> {
    let cipher = test_cipher();
    let row = ConnectionRepository::new(db.clone())
        .upsert_from_callback(UpsertConnection {
            org_id,
            access_token: cipher.encrypt(access_token)?,
            refresh_token: refresh_token.map(|rt| cipher.encrypt(rt)).transpose()?,
            instance_url: instance_url.to_string(),
            salesforce_org_id: Some("00Dxx0000001gPL".to_string()),
            token_expires_at: None,
        })
        .await?;
    Ok(row.id)
}

/// Decrypted `(access_token, refresh_token)` currently stored for `org_id`.
pub async fn stored_tokens(
    db: &DatabaseConnection,
    org_id: Uuid,
) -> Result<(String, Option<String>)> {
    let cipher = test_cipher();
    let row = ConnectionRepository::new(db.clone())
        .find_by_org(org_id)
        .await?
        .context("connection row missing")?;
    Ok((
        cipher.decrypt(&row.access_token)?,
        row.refresh_token
            .as_deref()
            .map(|rt| cipher.decrypt(rt))
            .transpose()?,
    ))
}
