//! # Tests for Handlers
//!
//! Router-level tests driven through `tower::ServiceExt::oneshot` against an
//! in-memory database. Nothing here talks to Salesforce.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::connectors::{SalesforceClient, SalesforceOAuthConfig};
use crate::crypto::{CryptoKey, TokenCipher};
use crate::models::ServiceInfo;
use crate::oauth_state::StateSigner;
use crate::server::{AppState, create_app};

async fn test_state() -> AppState {
    let config = AppConfig {
        salesforce_client_id: Some("test-client-id".to_string()),
        salesforce_client_secret: Some("test-client-secret".to_string()),
        crypto_key: Some(vec![7u8; 32]),
        ..AppConfig::default()
    };
    let db = crate::db::migrated_memory_db().await;
    let cipher = TokenCipher::new(CryptoKey::new(vec![7u8; 32]).unwrap());
    let signer = StateSigner::new(&config.app_secret).unwrap();
    let client =
        SalesforceClient::new(SalesforceOAuthConfig::from_app_config(&config), signer).unwrap();

    AppState::new(Arc::new(config), db, cipher, client)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn create_org_request(name: &str, slug: &str) -> Request<Body> {
    Request::post("/orgs")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "name": name, "slug": slug }).to_string()))
        .unwrap()
}

async fn create_org(app: &Router, slug: &str) -> Uuid {
    let (status, body) = send(app, create_org_request("Acme Corp", slug)).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let app = create_app(test_state().await);

    let (status, body) = send(&app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "crm-config-api");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_service_info_default() {
    let service_info = ServiceInfo::default();
    assert_eq!(service_info.service, "crm-config-api");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_health_reports_database_ok() {
    let app = create_app(test_state().await);

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_responses_carry_trace_id_header() {
    let app = create_app(test_state().await);

    let response = app
        .clone()
        .oneshot(
            Request::get("/")
                .header("x-request-id", "req-abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-trace-id"], "req-abc-123");
}

#[tokio::test]
async fn test_openapi_document_lists_salesforce_routes() {
    let app = create_app(test_state().await);

    let (status, body) = send(&app, get("/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/auth/salesforce/connect",
        "/auth/salesforce/callback",
        "/salesforce/test",
        "/orgs",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}

#[tokio::test]
async fn test_create_and_get_organization() {
    let app = create_app(test_state().await);

    let org_id = create_org(&app, "acme").await;
    let (status, body) = send(&app, get(&format!("/orgs/{org_id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slug"], "acme");
    assert_eq!(body["name"], "Acme Corp");
}

#[tokio::test]
async fn test_duplicate_slug_is_conflict() {
    let app = create_app(test_state().await);
    create_org(&app, "acme").await;

    let (status, body) = send(&app, create_org_request("Other", "acme")).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(body["message"], "Slug 'acme' is already taken");
}

#[tokio::test]
async fn test_invalid_slug_is_validation_error() {
    let app = create_app(test_state().await);

    let (status, body) = send(&app, create_org_request("Acme", "Not A Slug")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let app = create_app(test_state().await);

    let request = Request::post("/orgs")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{\"name\":"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_unknown_organization_is_not_found() {
    let app = create_app(test_state().await);

    let (status, body) = send(&app, get(&format!("/orgs/{}", Uuid::new_v4()))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["trace_id"].as_str().is_some());
}

#[tokio::test]
async fn test_delete_organization_then_not_found() {
    let app = create_app(test_state().await);
    let org_id = create_org(&app, "acme").await;

    let delete = Request::delete(format!("/orgs/{org_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let delete_again = Request::delete(format!("/orgs/{org_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete_again).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connect_requires_org_header() {
    let app = create_app(test_state().await);

    let request = Request::post("/auth/salesforce/connect")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "X-Org-ID header must be a valid UUID");
}

#[tokio::test]
async fn test_connect_unknown_org_is_forbidden() {
    let app = create_app(test_state().await);

    let request = Request::post("/auth/salesforce/connect")
        .header("X-Org-ID", Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Organization not found or access denied");
}

#[tokio::test]
async fn test_connect_returns_signed_authorization_url() {
    let state = test_state().await;
    let signer = state.oauth.state_signer().clone();
    let app = create_app(state);
    let org_id = create_org(&app, "acme").await;

    let request = Request::post("/auth/salesforce/connect")
        .header("X-Org-ID", org_id.to_string())
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    let url = url::Url::parse(body["authorization_url"].as_str().unwrap()).unwrap();
    assert_eq!(url.path(), "/services/oauth2/authorize");
    let state_param = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(signer.verify(&state_param), Some(org_id.to_string()));
    assert_eq!(
        body["message"],
        "Redirect the user to this URL to authorize Salesforce access"
    );
}

#[tokio::test]
async fn test_callback_rejects_tampered_state() {
    let app = create_app(test_state().await);

    let (status, body) = send(
        &app,
        get("/auth/salesforce/callback?code=abc&state=nonce:org:deadbeefdeadbeef"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid or tampered state parameter");
}

#[tokio::test]
async fn test_callback_rejects_missing_state() {
    let app = create_app(test_state().await);

    let (status, _) = send(&app, get("/auth/salesforce/callback?code=abc")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_surfaces_provider_denial() {
    let app = create_app(test_state().await);

    let (status, body) = send(
        &app,
        get("/auth/salesforce/callback?error=access_denied&error_description=end-user+denied"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["error"], "access_denied");
    assert_eq!(body["details"]["error_description"], "end-user denied");
}

#[tokio::test]
async fn test_callback_for_deleted_org_is_not_found() {
    let state = test_state().await;
    let signer = state.oauth.state_signer().clone();
    let app = create_app(state);

    let signed = signer.generate(Uuid::new_v4());
    let uri = format!(
        "/auth/salesforce/callback?code=abc&state={}",
        url::form_urlencoded::byte_serialize(signed.as_bytes()).collect::<String>()
    );
    let (status, _) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_salesforce_test_without_connection_is_not_found() {
    let app = create_app(test_state().await);
    let org_id = create_org(&app, "acme").await;

    let request = Request::get("/salesforce/test")
        .header("X-Org-ID", org_id.to_string())
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["message"],
        "No Salesforce connection found for this organization. Use POST /auth/salesforce/connect first."
    );
}

#[tokio::test]
async fn test_error_responses_use_problem_json() {
    let app = create_app(test_state().await);

    let response = app
        .clone()
        .oneshot(get("/salesforce/connection"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[CONTENT_TYPE],
        "application/problem+json"
    );
}
