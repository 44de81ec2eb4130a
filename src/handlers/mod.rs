//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the CRM config API.

use axum::{extract::State, response::Json};
use chrono::Utc;

use crate::db;
use crate::models::{HealthResponse, ServiceInfo};
use crate::server::AppState;

pub mod connect;
pub mod orgs;
pub mod salesforce;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe that also pings the database
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up; `database` reports reachability", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match db::health_check(&state.db).await {
        Ok(()) => "ok",
        Err(err) => {
            tracing::warn!(error = %err, "Database health check failed");
            "unavailable"
        }
    };
    let info = ServiceInfo::default();

    Json(HealthResponse {
        status: if database == "ok" { "healthy" } else { "degraded" }.to_string(),
        app: info.service,
        version: info.version,
        database: database.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests;
