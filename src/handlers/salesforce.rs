//! # Salesforce Connection Handlers

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OrgIdHeader, VerifiedOrg};
use crate::connectors::ConnectionInfo;
use crate::error::{ApiError, not_found};
use crate::models::salesforce_connection;
use crate::repositories::ConnectionRepository;
use crate::server::AppState;

/// Outcome of a live connectivity check
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SalesforceTestResponse {
    pub connected: bool,
    #[schema(example = "https://acme.my.salesforce.com")]
    pub instance_url: String,
    #[schema(example = "59.0")]
    pub api_version: String,
    pub org_name: Option<String>,
    #[schema(example = "Enterprise Edition")]
    pub org_type: Option<String>,
    #[schema(example = "00Dxx0000001gPL")]
    pub salesforce_org_id: Option<String>,
    /// RFC 3339 UTC timestamp of the probe
    pub tested_at: String,
}

impl From<ConnectionInfo> for SalesforceTestResponse {
    fn from(info: ConnectionInfo) -> Self {
        Self {
            connected: info.connected,
            instance_url: info.instance_url,
            api_version: info.api_version,
            org_name: info.org_name,
            org_type: info.org_type,
            salesforce_org_id: info.salesforce_org_id,
            tested_at: info.tested_at,
        }
    }
}

/// Stored connection metadata; tokens are never included
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SalesforceConnectionResponse {
    pub id: Uuid,
    pub org_id: Uuid,
    pub instance_url: String,
    pub salesforce_org_id: Option<String>,
    pub token_expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<salesforce_connection::Model> for SalesforceConnectionResponse {
    fn from(row: salesforce_connection::Model) -> Self {
        Self {
            id: row.id,
            org_id: row.org_id,
            instance_url: row.instance_url,
            salesforce_org_id: row.salesforce_org_id,
            token_expires_at: row.token_expires_at.map(|at| at.to_rfc3339()),
            created_at: row.created_at.to_rfc3339(),
            updated_at: row.updated_at.to_rfc3339(),
        }
    }
}

/// Test the organization's Salesforce connection
///
/// Refreshes the access token once if Salesforce rejects it.
#[utoipa::path(
    get,
    path = "/salesforce/test",
    params(OrgIdHeader),
    responses(
        (status = 200, description = "Connection works", body = SalesforceTestResponse),
        (status = 400, description = "Missing or malformed X-Org-ID header", body = ApiError),
        (status = 403, description = "Unknown organization", body = ApiError),
        (status = 404, description = "Organization has no Salesforce connection", body = ApiError),
        (status = 500, description = "Stored credentials unreadable", body = ApiError),
        (status = 502, description = "Salesforce rejected the request", body = ApiError)
    ),
    tag = "salesforce"
)]
pub async fn test_connection(
    State(state): State<AppState>,
    VerifiedOrg(org): VerifiedOrg,
) -> Result<Json<SalesforceTestResponse>, ApiError> {
    let info = state.connection_tester().test_connection(org.id).await?;
    Ok(Json(info.into()))
}

/// Show the organization's stored connection
#[utoipa::path(
    get,
    path = "/salesforce/connection",
    params(OrgIdHeader),
    responses(
        (status = 200, description = "Connection metadata", body = SalesforceConnectionResponse),
        (status = 400, description = "Missing or malformed X-Org-ID header", body = ApiError),
        (status = 403, description = "Unknown organization", body = ApiError),
        (status = 404, description = "Organization has no Salesforce connection", body = ApiError)
    ),
    tag = "salesforce"
)]
pub async fn get_connection(
    State(state): State<AppState>,
    VerifiedOrg(org): VerifiedOrg,
) -> Result<Json<SalesforceConnectionResponse>, ApiError> {
    ConnectionRepository::new(state.db.clone())
        .find_by_org(org.id)
        .await?
        .map(|row| Json(row.into()))
        .ok_or_else(|| not_found("No Salesforce connection found for this organization"))
}
