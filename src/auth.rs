//! # Tenant Identification
//!
//! Every organization-scoped route names its organization in the `X-Org-ID`
//! header. [`OrgHeader`] parses it; [`VerifiedOrg`] additionally checks that
//! the organization exists.

use axum::{extract::FromRequestParts, http::request::Parts};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::{ApiError, forbidden, validation_error};
use crate::models::organization;
use crate::repositories::OrganizationRepository;
use crate::server::AppState;

pub const ORG_HEADER: &str = "X-Org-ID";

const INVALID_ORG_HEADER: &str = "X-Org-ID header must be a valid UUID";

/// Organization id taken from the `X-Org-ID` header, not yet checked against the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgHeader(pub Uuid);

/// An organization that exists.
#[derive(Debug, Clone)]
pub struct VerifiedOrg(pub organization::Model);

/// OpenAPI header parameter for X-Org-ID
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct OrgIdHeader {
    /// Organization identifier (UUID) that scopes the request
    #[serde(rename = "X-Org-ID")]
    #[param(rename = "X-Org-ID", value_type = String)]
    pub org_id: String,
}

impl<S> FromRequestParts<S> for OrgHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORG_HEADER)
            .ok_or_else(invalid_org_header)?
            .to_str()
            .map_err(|_| invalid_org_header())?;

        raw.trim()
            .parse::<Uuid>()
            .map(OrgHeader)
            .map_err(|_| invalid_org_header())
    }
}

impl FromRequestParts<AppState> for VerifiedOrg {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let OrgHeader(org_id) = OrgHeader::from_request_parts(parts, state).await?;
        resolve_verified_org(&state.db, org_id).await.map(VerifiedOrg)
    }
}

/// Look up the header's organization; an unknown id is a 403, not a 404.
pub async fn resolve_verified_org(
    db: &DatabaseConnection,
    org_id: Uuid,
) -> Result<organization::Model, ApiError> {
    match OrganizationRepository::new(db).get(org_id).await? {
        Some(org) => Ok(org),
        None => {
            tracing::warn!(org_id = %org_id, "Request for unknown organization");
            Err(forbidden(Some("Organization not found or access denied")))
        }
    }
}

fn invalid_org_header() -> ApiError {
    validation_error(
        INVALID_ORG_HEADER,
        serde_json::json!({ ORG_HEADER: "Required header must be a UUID" }),
    )
}
