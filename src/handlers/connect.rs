//! # Salesforce Authorization Handlers
//!
//! `POST /auth/salesforce/connect` issues a signed authorization URL for the
//! caller's organization. `GET /auth/salesforce/callback` is where Salesforce
//! sends the user back; it verifies the state, exchanges the code and stores
//! the encrypted tokens.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{OrgIdHeader, VerifiedOrg};
use crate::error::{ApiError, not_found, salesforce_error, validation_error};
use crate::repositories::{ConnectionRepository, OrganizationRepository, UpsertConnection};
use crate::server::AppState;

/// Authorization URL the client should redirect the user to
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SalesforceConnectResponse {
    #[schema(example = "https://login.salesforce.com/services/oauth2/authorize?response_type=code&...")]
    pub authorization_url: String,
    pub message: String,
}

/// Query parameters Salesforce appends to the redirect URI
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Signed state issued by the connect endpoint
    pub state: Option<String>,
    /// Set when the user denied access or Salesforce rejected the request
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a completed authorization
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SalesforceCallbackResponse {
    #[schema(example = "connected")]
    pub status: String,
    pub org_id: Uuid,
    #[schema(example = "https://acme.my.salesforce.com")]
    pub instance_url: String,
    pub message: String,
}

/// Start the Salesforce authorization flow
#[utoipa::path(
    post,
    path = "/auth/salesforce/connect",
    params(OrgIdHeader),
    responses(
        (status = 200, description = "Authorization URL issued", body = SalesforceConnectResponse),
        (status = 400, description = "Missing or malformed X-Org-ID header", body = ApiError),
        (status = 403, description = "Unknown organization", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "salesforce-auth"
)]
pub async fn connect(
    State(state): State<AppState>,
    VerifiedOrg(org): VerifiedOrg,
) -> Result<Json<SalesforceConnectResponse>, ApiError> {
    let url = state.oauth.build_authorization_url(org.id).map_err(|err| {
        tracing::error!(error = %err, "Failed to build Salesforce authorization URL");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Salesforce OAuth is misconfigured",
        )
    })?;

    tracing::info!(org_id = %org.id, "Salesforce authorization initiated");

    Ok(Json(SalesforceConnectResponse {
        authorization_url: url.into(),
        message: "Redirect the user to this URL to authorize Salesforce access".to_string(),
    }))
}

/// Complete the Salesforce authorization flow
#[utoipa::path(
    get,
    path = "/auth/salesforce/callback",
    params(CallbackParams),
    responses(
        (status = 200, description = "Tokens stored", body = SalesforceCallbackResponse),
        (status = 400, description = "Invalid state, missing code, or authorization denied", body = ApiError),
        (status = 404, description = "Organization no longer exists", body = ApiError),
        (status = 502, description = "Code exchange with Salesforce failed", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "salesforce-auth"
)]
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<SalesforceCallbackResponse>, ApiError> {
    if let Some(error) = params.error.as_deref() {
        tracing::warn!(provider_error = %error, "Salesforce authorization was not granted");
        return Err(validation_error(
            "Salesforce authorization was denied",
            serde_json::json!({
                "error": error,
                "error_description": params.error_description,
            }),
        ));
    }

    let org_id_raw = params
        .state
        .as_deref()
        .and_then(|raw| state.oauth.state_signer().verify(raw))
        .ok_or_else(|| {
            tracing::warn!("Rejected callback with invalid state");
            validation_error(
                "Invalid or tampered state parameter",
                serde_json::json!({ "state": "Signature verification failed" }),
            )
        })?;

    let org_id = Uuid::parse_str(&org_id_raw).map_err(|_| {
        validation_error(
            "Invalid org_id in state parameter",
            serde_json::json!({ "state": "Embedded organization id is not a UUID" }),
        )
    })?;

    let code = params
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or_else(|| {
            validation_error(
                "Missing authorization code",
                serde_json::json!({ "code": "Required query parameter is missing" }),
            )
        })?;

    if OrganizationRepository::new(&state.db)
        .get(org_id)
        .await?
        .is_none()
    {
        return Err(not_found("Organization not found"));
    }

    let grant = state.salesforce.exchange_code(code).await.map_err(|err| {
        tracing::warn!(org_id = %org_id, error = %err, "Salesforce code exchange failed");
        salesforce_error("Failed to exchange code with Salesforce", &err)
    })?;

    let access_token = state.cipher.encrypt(&grant.access_token)?;
    let refresh_token = grant
        .refresh_token
        .as_deref()
        .map(|token| state.cipher.encrypt(token))
        .transpose()?;

    let connection = ConnectionRepository::new(state.db.clone())
        .upsert_from_callback(UpsertConnection {
            org_id,
            access_token,
            refresh_token,
            instance_url: grant.instance_url.clone(),
            salesforce_org_id: grant.salesforce_org_id.clone(),
            token_expires_at: grant.expires_at,
        })
        .await?;

    tracing::info!(
        org_id = %org_id,
        connection_id = %connection.id,
        has_refresh_token = grant.refresh_token.is_some(),
        "Salesforce connection stored"
    );

    Ok(Json(SalesforceCallbackResponse {
        status: "connected".to_string(),
        org_id,
        instance_url: connection.instance_url,
        message: "Salesforce connection established successfully".to_string(),
    }))
}
