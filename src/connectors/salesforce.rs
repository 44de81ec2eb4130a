//! Salesforce OAuth 2.0 and REST client
//!
//! Covers the four calls this service makes to Salesforce:
//! - building the authorization URL (with a signed `state`)
//! - exchanging an authorization code for tokens
//! - refreshing an access token
//! - probing an instance to confirm a token works
//!
//! Every outbound request carries a timeout. Non-2xx responses keep their
//! status code so callers can tell a 401 apart from other failures.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::oauth_state::StateSigner;

/// Provider identifier used in error details and metrics labels.
pub const PROVIDER: &str = "salesforce";
/// Scopes requested on every authorization.
pub const OAUTH_SCOPES: &str = "api refresh_token";

const AUTHORIZE_PATH: &str = "/services/oauth2/authorize";
const TOKEN_PATH: &str = "/services/oauth2/token";
const VERSIONS_PATH: &str = "/services/data/";
const ORGANIZATION_QUERY: &str = "SELECT Id, Name, OrganizationType FROM Organization LIMIT 1";
const UNKNOWN_API_VERSION: &str = "unknown";
const REDACTED: &str = "[REDACTED]";

/// OAuth application settings for the connected app.
#[derive(Clone)]
pub struct SalesforceOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// `https://login.salesforce.com` or a sandbox / My Domain login host
    pub login_base: String,
    pub token_timeout: Duration,
    pub api_timeout: Duration,
}

impl SalesforceOAuthConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            client_id: config.salesforce_client_id.clone().unwrap_or_default(),
            client_secret: config.salesforce_client_secret.clone().unwrap_or_default(),
            redirect_uri: config.salesforce_redirect_uri.clone(),
            login_base: config.salesforce_login_base.trim_end_matches('/').to_string(),
            token_timeout: config.salesforce_token_timeout(),
            api_timeout: config.salesforce_api_timeout(),
        }
    }
}

impl fmt::Debug for SalesforceOAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SalesforceOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .field("redirect_uri", &self.redirect_uri)
            .field("login_base", &self.login_base)
            .field("token_timeout", &self.token_timeout)
            .field("api_timeout", &self.api_timeout)
            .finish()
    }
}

/// Salesforce client error types
#[derive(Debug, Error)]
pub enum SalesforceError {
    #[error("Salesforce returned HTTP {status}")]
    Http { status: u16, body: String },
    #[error("failed to reach Salesforce: {0}")]
    Transport(String),
    #[error("unexpected Salesforce response: {0}")]
    MalformedResponse(String),
    #[error("Salesforce returned incomplete token data (missing {0})")]
    IncompleteTokenResponse(&'static str),
    #[error("Salesforce client misconfigured: {0}")]
    Config(String),
}

impl SalesforceError {
    /// Upstream HTTP status, when the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            SalesforceError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The access token was rejected; a refresh may help.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Tokens and identity returned by the authorization-code exchange.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub instance_url: String,
    /// Salesforce organization id parsed from the identity URL
    pub salesforce_org_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &REDACTED)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("instance_url", &self.instance_url)
            .field("salesforce_org_id", &self.salesforce_org_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a refresh-token grant.
#[derive(Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub instance_url: Option<String>,
    /// Echoed by some Salesforce orgs; the stored refresh token is never replaced by it
    pub refresh_token: Option<String>,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &REDACTED)
            .field("instance_url", &self.instance_url)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .finish()
    }
}

/// Outcome of a successful connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub instance_url: String,
    pub api_version: String,
    pub org_name: Option<String>,
    pub org_type: Option<String>,
    pub salesforce_org_id: Option<String>,
    /// RFC 3339 UTC timestamp
    pub tested_at: String,
}

/// Operations the service needs from Salesforce.
#[async_trait]
pub trait SalesforceApi: Send + Sync {
    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SalesforceError>;

    /// Obtain a new access token from a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedToken, SalesforceError>;

    /// Confirm the token works by listing API versions and reading the
    /// Organization record.
    async fn probe_connection(
        &self,
        instance_url: &str,
        access_token: &str,
    ) -> Result<ConnectionInfo, SalesforceError>;
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    instance_url: Option<String>,
    /// Identity URL: `https://login.salesforce.com/id/{orgId}/{userId}`
    id: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiVersion {
    version: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    records: Vec<OrganizationRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrganizationRecord {
    id: Option<String>,
    name: Option<String>,
    organization_type: Option<String>,
}

/// reqwest-backed Salesforce client.
#[derive(Clone)]
pub struct SalesforceClient {
    config: SalesforceOAuthConfig,
    signer: StateSigner,
    http: reqwest::Client,
}

impl fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SalesforceClient {
    pub fn new(config: SalesforceOAuthConfig, signer: StateSigner) -> Result<Self, SalesforceError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crm-config/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SalesforceError::Config(e.to_string()))?;

        Ok(Self {
            config,
            signer,
            http,
        })
    }

    pub fn config(&self) -> &SalesforceOAuthConfig {
        &self.config
    }

    /// Signer used for the `state` parameter; the callback verifies with it.
    pub fn state_signer(&self) -> &StateSigner {
        &self.signer
    }

    /// Build the URL the user is redirected to for consent.
    ///
    /// `prompt=login consent` forces Salesforce to show the login and consent
    /// screens even when a session exists, so one browser cannot silently
    /// bind a different org's account.
    pub fn build_authorization_url(&self, org_id: Uuid) -> Result<Url, SalesforceError> {
        let mut url = Url::parse(&format!("{}{}", self.config.login_base, AUTHORIZE_PATH))
            .map_err(|e| SalesforceError::Config(format!("invalid login base: {e}")))?;

        let state = self.signer.generate(org_id);
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.config.client_id.as_str())
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", OAUTH_SCOPES)
            .append_pair("state", &state)
            .append_pair("prompt", "login consent");

        Ok(url)
    }

    fn token_url(&self) -> String {
        format!("{}{}", self.config.login_base, TOKEN_PATH)
    }

    async fn post_token_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<RawTokenResponse, SalesforceError> {
        let response = self
            .http
            .post(self.token_url())
            .header(ACCEPT, "application/json")
            .timeout(self.config.token_timeout)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;

        let response = self.ensure_success(response).await?;
        response
            .json::<RawTokenResponse>()
            .await
            .map_err(|e| SalesforceError::MalformedResponse(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SalesforceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .query(query)
            .timeout(self.config.api_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let response = self.ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SalesforceError::MalformedResponse(e.to_string()))
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SalesforceError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!(status, "Salesforce request failed");
        Err(SalesforceError::Http {
            status,
            body: self.redact(&body),
        })
    }

    fn redact(&self, body: &str) -> String {
        if self.config.client_secret.is_empty() {
            body.to_string()
        } else {
            body.replace(&self.config.client_secret, REDACTED)
        }
    }
}

#[async_trait]
impl SalesforceApi for SalesforceClient {
    #[instrument(skip_all, fields(provider = PROVIDER))]
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SalesforceError> {
        let raw = self
            .post_token_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;

        let access_token = non_empty(raw.access_token)
            .ok_or(SalesforceError::IncompleteTokenResponse("access_token"))?;
        let instance_url = non_empty(raw.instance_url)
            .ok_or(SalesforceError::IncompleteTokenResponse("instance_url"))?;

        let expires_at = raw.expires_in.map(expiry_from_now).transpose()?;

        Ok(TokenGrant {
            access_token,
            refresh_token: non_empty(raw.refresh_token),
            instance_url: normalize_instance_url(&instance_url)?,
            salesforce_org_id: raw.id.as_deref().and_then(org_id_from_identity_url),
            expires_at,
        })
    }

    #[instrument(skip_all, fields(provider = PROVIDER))]
    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedToken, SalesforceError> {
        let raw = self
            .post_token_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;

        let access_token = non_empty(raw.access_token)
            .ok_or(SalesforceError::IncompleteTokenResponse("access_token"))?;
        let instance_url = match non_empty(raw.instance_url) {
            Some(url) => Some(normalize_instance_url(&url)?),
            None => None,
        };

        Ok(RefreshedToken {
            access_token,
            instance_url,
            refresh_token: non_empty(raw.refresh_token),
        })
    }

    #[instrument(skip(self, access_token), fields(provider = PROVIDER))]
    async fn probe_connection(
        &self,
        instance_url: &str,
        access_token: &str,
    ) -> Result<ConnectionInfo, SalesforceError> {
        let base = instance_url.trim_end_matches('/');

        let versions: Vec<ApiVersion> = self
            .get_json(&format!("{base}{VERSIONS_PATH}"), access_token, &[])
            .await?;
        let latest = versions.last();

        let api_version = latest
            .and_then(|v| v.version.clone())
            .unwrap_or_else(|| UNKNOWN_API_VERSION.to_string());

        let organization = match latest.and_then(|v| v.url.as_deref()) {
            Some(version_path) => {
                let result: QueryResponse = self
                    .get_json(
                        &format!("{base}{version_path}/query"),
                        access_token,
                        &[("q", ORGANIZATION_QUERY)],
                    )
                    .await?;
                result.records.into_iter().next()
            }
            None => None,
        };

        let (salesforce_org_id, org_name, org_type) = match organization {
            Some(record) => (record.id, record.name, record.organization_type),
            None => (None, None, None),
        };

        Ok(ConnectionInfo {
            connected: true,
            instance_url: base.to_string(),
            api_version,
            org_name,
            org_type,
            salesforce_org_id,
            tested_at: Utc::now().to_rfc3339(),
        })
    }
}

fn transport_error(err: reqwest::Error) -> SalesforceError {
    if err.is_timeout() {
        SalesforceError::Transport("request timed out".to_string())
    } else {
        SalesforceError::Transport(err.without_url().to_string())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn normalize_instance_url(raw: &str) -> Result<String, SalesforceError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed)
        .map_err(|e| SalesforceError::MalformedResponse(format!("invalid instance_url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SalesforceError::MalformedResponse(
            "instance_url must be http(s)".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Absolute expiry for an `expires_in` lifetime; negative or unrepresentable
/// lifetimes are a malformed grant.
fn expiry_from_now(seconds: i64) -> Result<DateTime<Utc>, SalesforceError> {
    if seconds < 0 {
        return Err(SalesforceError::MalformedResponse(format!(
            "negative expires_in: {seconds}"
        )));
    }
    chrono::TimeDelta::try_seconds(seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            SalesforceError::MalformedResponse(format!("expires_in out of range: {seconds}"))
        })
}

/// Extract `{orgId}` from `https://login.salesforce.com/id/{orgId}/{userId}`.
fn org_id_from_identity_url(identity_url: &str) -> Option<String> {
    let url = Url::parse(identity_url).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == "id")?;
    segments
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
