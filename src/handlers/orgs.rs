//! # Organization Handlers
//!
//! Create, fetch and delete organizations (the tenants that own Salesforce
//! connections).

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header::LOCATION},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, not_found};
use crate::models::organization;
use crate::repositories::{CreateOrganization, OrganizationRepository};
use crate::server::AppState;

/// Request payload for creating an organization
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrganizationCreate {
    /// Display name (1-255 characters)
    #[schema(example = "Acme Corp")]
    pub name: String,
    /// URL-safe slug: lowercase letters, digits and single hyphens
    #[schema(example = "acme")]
    pub slug: String,
}

/// Organization as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrganizationResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "Acme Corp")]
    pub name: String,
    #[schema(example = "acme")]
    pub slug: String,
    /// ISO 8601 timestamp
    pub created_at: String,
    /// ISO 8601 timestamp
    pub updated_at: String,
}

impl From<organization::Model> for OrganizationResponse {
    fn from(org: organization::Model) -> Self {
        Self {
            id: org.id,
            name: org.name,
            slug: org.slug,
            created_at: org.created_at.to_rfc3339(),
            updated_at: org.updated_at.to_rfc3339(),
        }
    }
}

/// Create an organization
#[utoipa::path(
    post,
    path = "/orgs",
    request_body = OrganizationCreate,
    responses(
        (status = 201, description = "Organization created", body = OrganizationResponse, headers(
            ("Location", description = "URL of the created organization")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 409, description = "Slug already taken", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn create_organization(
    State(state): State<AppState>,
    payload: Result<Json<OrganizationCreate>, JsonRejection>,
) -> Result<(StatusCode, [(axum::http::HeaderName, String); 1], Json<OrganizationResponse>), ApiError>
{
    let Json(payload) = payload?;

    let org = OrganizationRepository::new(&state.db)
        .create(CreateOrganization {
            name: payload.name,
            slug: payload.slug,
        })
        .await?;

    tracing::info!(org_id = %org.id, slug = %org.slug, "Organization created");

    let location = format!("/orgs/{}", org.id);
    Ok((StatusCode::CREATED, [(LOCATION, location)], Json(org.into())))
}

/// Get an organization by ID
#[utoipa::path(
    get,
    path = "/orgs/{org_id}",
    params(
        ("org_id" = Uuid, Path, description = "Organization UUID")
    ),
    responses(
        (status = 200, description = "Organization found", body = OrganizationResponse),
        (status = 400, description = "Malformed organization id", body = ApiError),
        (status = 404, description = "Organization not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn get_organization(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<OrganizationResponse>, ApiError> {
    OrganizationRepository::new(&state.db)
        .get(org_id)
        .await?
        .map(|org| Json(org.into()))
        .ok_or_else(|| not_found("Organization not found"))
}

/// Delete an organization together with its connection and saved configs
#[utoipa::path(
    delete,
    path = "/orgs/{org_id}",
    params(
        ("org_id" = Uuid, Path, description = "Organization UUID")
    ),
    responses(
        (status = 204, description = "Organization deleted"),
        (status = 404, description = "Organization not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn delete_organization(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if OrganizationRepository::new(&state.db).delete(org_id).await? {
        tracing::info!(org_id = %org_id, "Organization deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Organization not found"))
    }
}
