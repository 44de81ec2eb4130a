//! # Server Configuration
//!
//! Router assembly, shared state and the serve loop for the CRM config API.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::connectors::{SalesforceApi, SalesforceClient};
use crate::crypto::TokenCipher;
use crate::handlers;
use crate::repositories::ConnectionRepository;
use crate::telemetry;
use crate::token_refresh::ConnectionTester;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub cipher: TokenCipher,
    /// Builds authorization URLs and verifies callback state
    pub oauth: Arc<SalesforceClient>,
    /// Token exchange, refresh and probing
    pub salesforce: Arc<dyn SalesforceApi>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        cipher: TokenCipher,
        client: SalesforceClient,
    ) -> Self {
        let client = Arc::new(client);
        Self {
            config,
            db,
            cipher,
            salesforce: client.clone(),
            oauth: client,
        }
    }

    /// Replace the Salesforce backend used for exchange, refresh and probing.
    pub fn with_salesforce_api(mut self, api: Arc<dyn SalesforceApi>) -> Self {
        self.salesforce = api;
        self
    }

    pub fn connection_tester(&self) -> ConnectionTester {
        ConnectionTester::new(
            ConnectionRepository::new(self.db.clone()),
            self.cipher.clone(),
            Arc::clone(&self.salesforce),
        )
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/orgs", post(handlers::orgs::create_organization))
        .route(
            "/orgs/{org_id}",
            get(handlers::orgs::get_organization).delete(handlers::orgs::delete_organization),
        )
        .route("/auth/salesforce/connect", post(handlers::connect::connect))
        .route("/auth/salesforce/callback", get(handlers::connect::callback))
        .route("/salesforce/test", get(handlers::salesforce::test_connection))
        .route(
            "/salesforce/connection",
            get(handlers::salesforce::get_connection),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Serve `state` until `shutdown` is cancelled.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .with_context(|| format!("invalid bind address '{}'", state.config.api_bind_addr))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server terminated unexpectedly")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::orgs::create_organization,
        crate::handlers::orgs::get_organization,
        crate::handlers::orgs::delete_organization,
        crate::handlers::connect::connect,
        crate::handlers::connect::callback,
        crate::handlers::salesforce::test_connection,
        crate::handlers::salesforce::get_connection,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::HealthResponse,
            crate::error::ApiError,
            crate::handlers::orgs::OrganizationCreate,
            crate::handlers::orgs::OrganizationResponse,
            crate::handlers::connect::SalesforceConnectResponse,
            crate::handlers::connect::SalesforceCallbackResponse,
            crate::handlers::salesforce::SalesforceTestResponse,
            crate::handlers::salesforce::SalesforceConnectionResponse,
        )
    ),
    tags(
        (name = "organizations", description = "Tenant management"),
        (name = "salesforce-auth", description = "Salesforce OAuth flow"),
        (name = "salesforce", description = "Salesforce connection checks"),
    ),
    info(
        title = "CRM Config API",
        description = "Multi-tenant Salesforce connection management",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
