//! # Connection Test with Refresh-and-Retry
//!
//! Probes an organization's Salesforce instance with the stored access token.
//! When Salesforce answers 401, the refresh token is exchanged for a new
//! access token, the new token is persisted, and the probe runs exactly once
//! more. Any other failure, or a failure after the refresh, is final.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use sea_orm::DbErr;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::connectors::salesforce::{ConnectionInfo, SalesforceApi, SalesforceError};
use crate::credentials::{ConnectionResolver, DecryptedConnection, ResolveError};
use crate::crypto::{CryptoError, TokenCipher};
use crate::repositories::ConnectionRepository;

#[derive(Debug, Error)]
pub enum ConnectionTestError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Probe failed with something other than 401; no refresh attempted.
    #[error("Salesforce probe failed: {0}")]
    Upstream(#[source] SalesforceError),
    #[error("access token rejected and no refresh token is stored")]
    MissingRefreshToken,
    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] SalesforceError),
    /// Probe failed again with the freshly refreshed token.
    #[error("Salesforce probe failed after token refresh: {0}")]
    RetryFailed(#[source] SalesforceError),
    #[error("failed to persist refreshed token: {0}")]
    Persist(#[source] DbErr),
    #[error("failed to encrypt refreshed token: {0}")]
    Encrypt(#[source] CryptoError),
}

/// Runs connectivity checks for organizations.
#[derive(Clone)]
pub struct ConnectionTester {
    resolver: ConnectionResolver,
    repository: ConnectionRepository,
    cipher: TokenCipher,
    salesforce: Arc<dyn SalesforceApi>,
}

impl ConnectionTester {
    pub fn new(
        repository: ConnectionRepository,
        cipher: TokenCipher,
        salesforce: Arc<dyn SalesforceApi>,
    ) -> Self {
        Self {
            resolver: ConnectionResolver::new(repository.clone(), cipher.clone()),
            repository,
            cipher,
            salesforce,
        }
    }

    /// Probe the organization's Salesforce connection, refreshing once on 401.
    #[instrument(skip_all, fields(org_id = %org_id))]
    pub async fn test_connection(
        &self,
        org_id: Uuid,
    ) -> Result<ConnectionInfo, ConnectionTestError> {
        let started = Instant::now();
        let connection = self.resolver.resolve(org_id).await?;

        let result = match self
            .salesforce
            .probe_connection(&connection.instance_url, &connection.access_token)
            .await
        {
            Ok(info) => Ok(info),
            Err(err) if err.is_unauthorized() => {
                info!(
                    connection_id = %connection.connection_id,
                    "Salesforce rejected access token, refreshing"
                );
                self.refresh_and_retry(&connection).await
            }
            Err(err) => Err(ConnectionTestError::Upstream(err)),
        };

        let outcome = match &result {
            Ok(_) => "connected",
            Err(ConnectionTestError::Upstream(_)) => "upstream_error",
            Err(_) => "refresh_error",
        };
        counter!("salesforce_connection_tests_total", "outcome" => outcome).increment(1);
        histogram!("salesforce_connection_test_latency_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        result
    }

    async fn refresh_and_retry(
        &self,
        connection: &DecryptedConnection,
    ) -> Result<ConnectionInfo, ConnectionTestError> {
        let refresh_token = connection
            .refresh_token
            .as_deref()
            .ok_or(ConnectionTestError::MissingRefreshToken)?;

        counter!("salesforce_token_refresh_attempts_total").increment(1);
        let refreshed = match self.salesforce.refresh_token(refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                counter!("salesforce_token_refresh_failure_total").increment(1);
                warn!(
                    connection_id = %connection.connection_id,
                    upstream_status = ?err.status(),
                    "Salesforce token refresh failed"
                );
                return Err(ConnectionTestError::RefreshFailed(err));
            }
        };

        let access_ciphertext = self
            .cipher
            .encrypt(&refreshed.access_token)
            .map_err(ConnectionTestError::Encrypt)?;

        // Persist before retrying so a failed retry still leaves the new token stored.
        // The stored refresh token and Salesforce org id stay as they are.
        self.repository
            .update_refreshed_token(
                connection.connection_id,
                access_ciphertext,
                refreshed.instance_url.clone(),
            )
            .await
            .map_err(ConnectionTestError::Persist)?;

        counter!("salesforce_token_refresh_success_total").increment(1);
        info!(
            connection_id = %connection.connection_id,
            instance_url_changed = refreshed.instance_url.is_some(),
            "Stored refreshed Salesforce access token"
        );

        let instance_url = refreshed
            .instance_url
            .as_deref()
            .unwrap_or(&connection.instance_url);
        self.salesforce
            .probe_connection(instance_url, &refreshed.access_token)
            .await
            .map_err(ConnectionTestError::RetryFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sea_orm::DatabaseConnection;

    use crate::connectors::salesforce::{RefreshedToken, TokenGrant};
    use crate::crypto::CryptoKey;
    use crate::repositories::{
        CreateOrganization, OrganizationRepository, UpsertConnection,
    };

    const INSTANCE: &str = "https://acme.my.salesforce.com";

    #[derive(Default)]
    struct ScriptedSalesforce {
        probes: Mutex<VecDeque<Result<ConnectionInfo, SalesforceError>>>,
        refreshes: Mutex<VecDeque<Result<RefreshedToken, SalesforceError>>>,
        probe_tokens: Mutex<Vec<String>>,
        refresh_calls: Mutex<u32>,
    }

    impl ScriptedSalesforce {
        fn probe(self, result: Result<ConnectionInfo, SalesforceError>) -> Self {
            self.probes.lock().unwrap().push_back(result);
            self
        }

        fn refresh(self, result: Result<RefreshedToken, SalesforceError>) -> Self {
            self.refreshes.lock().unwrap().push_back(result);
            self
        }

        fn refresh_calls(&self) -> u32 {
            *self.refresh_calls.lock().unwrap()
        }

        fn probe_tokens(&self) -> Vec<String> {
            self.probe_tokens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SalesforceApi for ScriptedSalesforce {
        async fn exchange_code(&self, _code: &str) -> Result<TokenGrant, SalesforceError> {
            Err(SalesforceError::Config("not scripted".into()))
        }

        async fn refresh_token(
            &self,
            _refresh_token: &str,
        ) -> Result<RefreshedToken, SalesforceError> {
            *self.refresh_calls.lock().unwrap() += 1;
            self.refreshes
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected refresh call")
        }

        async fn probe_connection(
            &self,
            _instance_url: &str,
            access_token: &str,
        ) -> Result<ConnectionInfo, SalesforceError> {
            self.probe_tokens
                .lock()
                .unwrap()
                .push(access_token.to_string());
            self.probes
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected probe call")
        }
    }

    fn connected() -> Result<ConnectionInfo, SalesforceError> {
        Ok(ConnectionInfo {
            connected: true,
            instance_url: INSTANCE.to_string(),
            api_version: "59.0".to_string(),
            org_name: Some("Acme".to_string()),
            org_type: Some("Enterprise Edition".to_string()),
            salesforce_org_id: Some("00Dxx0000001gPL".to_string()),
            tested_at: "2025-01-01T00:00:00+00:00".to_string(),
        })
    }

    fn http(status: u16) -> SalesforceError {
        SalesforceError::Http {
            status,
            body: format!("status {status}"),
        }
    }

    fn refreshed(
        access: &str,
        returned_refresh: Option<&str>,
    ) -> Result<RefreshedToken, SalesforceError> {
        Ok(RefreshedToken {
            access_token: access.to_string(),
            instance_url: None,
            refresh_token: returned_refresh.map(str::to_string),
        })
    }

    struct Fixture {
        db: DatabaseConnection,
        cipher: TokenCipher,
        org_id: Uuid,
    }

    impl Fixture {
        async fn new(refresh_token: Option<&str>) -> Self {
            let db = crate::db::migrated_memory_db().await;
            let cipher = TokenCipher::new(CryptoKey::new(vec![9u8; 32]).unwrap());

            let org = OrganizationRepository::new(&db)
                .create(CreateOrganization {
                    name: "Acme Corp".to_string(),
                    slug: "acme".to_string(),
                })
                .await
                .expect("org");

            ConnectionRepository::new(db.clone())
                .upsert_from_callback(UpsertConnection {
                    org_id: org.id,
                    access_token: cipher.encrypt("AT1").unwrap(),
                    refresh_token: refresh_token.map(|rt| cipher.encrypt(rt).unwrap()),
                    instance_url: INSTANCE.to_string(),
                    salesforce_org_id: Some("00Dxx0000001gPL".to_string()),
                    token_expires_at: None,
                })
                .await
                .expect("connection");

            Self {
                db,
                cipher,
                org_id: org.id,
            }
        }

        fn tester(&self, salesforce: Arc<ScriptedSalesforce>) -> ConnectionTester {
            ConnectionTester::new(
                ConnectionRepository::new(self.db.clone()),
                self.cipher.clone(),
                salesforce,
            )
        }

        async fn stored_tokens(&self) -> (String, Option<String>) {
            let row = ConnectionRepository::new(self.db.clone())
                .find_by_org(self.org_id)
                .await
                .unwrap()
                .unwrap();
            (
                self.cipher.decrypt(&row.access_token).unwrap(),
                row.refresh_token
                    .map(|rt| self.cipher.decrypt(&rt).unwrap()),
            )
        }
    }

    #[tokio::test]
    async fn valid_token_skips_refresh() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(ScriptedSalesforce::default().probe(connected()));

        let info = fixture
            .tester(salesforce.clone())
            .test_connection(fixture.org_id)
            .await
            .expect("connected");

        assert!(info.connected);
        assert_eq!(salesforce.refresh_calls(), 0);
        assert_eq!(salesforce.probe_tokens(), vec!["AT1"]);
    }

    #[tokio::test]
    async fn unauthorized_probe_refreshes_and_retries_with_new_token() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(
            ScriptedSalesforce::default()
                .probe(Err(http(401)))
                .probe(connected())
                .refresh(refreshed("AT2", None)),
        );

        fixture
            .tester(salesforce.clone())
            .test_connection(fixture.org_id)
            .await
            .expect("connected after refresh");

        assert_eq!(salesforce.refresh_calls(), 1);
        assert_eq!(salesforce.probe_tokens(), vec!["AT1", "AT2"]);
        assert_eq!(
            fixture.stored_tokens().await,
            ("AT2".to_string(), Some("RT1".to_string()))
        );
    }

    #[tokio::test]
    async fn second_unauthorized_is_final_but_token_is_kept() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(
            ScriptedSalesforce::default()
                .probe(Err(http(401)))
                .probe(Err(http(401)))
                .refresh(refreshed("AT2", None)),
        );

        let err = fixture
            .tester(salesforce.clone())
            .test_connection(fixture.org_id)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionTestError::RetryFailed(_)));
        assert_eq!(salesforce.refresh_calls(), 1);
        assert_eq!(fixture.stored_tokens().await.0, "AT2");
    }

    #[tokio::test]
    async fn non_unauthorized_failure_does_not_refresh() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(ScriptedSalesforce::default().probe(Err(http(500))));

        let err = fixture
            .tester(salesforce.clone())
            .test_connection(fixture.org_id)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionTestError::Upstream(ref e) if e.status() == Some(500)));
        assert_eq!(salesforce.refresh_calls(), 0);
        assert_eq!(fixture.stored_tokens().await.0, "AT1");
    }

    #[tokio::test]
    async fn failed_refresh_leaves_stored_token_untouched() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(
            ScriptedSalesforce::default()
                .probe(Err(http(401)))
                .refresh(Err(http(400))),
        );

        let err = fixture
            .tester(salesforce.clone())
            .test_connection(fixture.org_id)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionTestError::RefreshFailed(_)));
        assert_eq!(salesforce.probe_tokens().len(), 1);
        assert_eq!(fixture.stored_tokens().await.0, "AT1");
    }

    #[tokio::test]
    async fn refresh_keeps_stored_refresh_token_even_if_salesforce_returns_one() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(
            ScriptedSalesforce::default()
                .probe(Err(http(401)))
                .probe(connected())
                .refresh(refreshed("AT2", Some("RT2"))),
        );

        fixture
            .tester(salesforce)
            .test_connection(fixture.org_id)
            .await
            .expect("connected");

        assert_eq!(
            fixture.stored_tokens().await,
            ("AT2".to_string(), Some("RT1".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_calling_salesforce() {
        let fixture = Fixture::new(None).await;
        let salesforce = Arc::new(ScriptedSalesforce::default().probe(Err(http(401))));

        let err = fixture
            .tester(salesforce.clone())
            .test_connection(fixture.org_id)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionTestError::MissingRefreshToken));
        assert_eq!(salesforce.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_org_is_not_found() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(ScriptedSalesforce::default());

        let err = fixture
            .tester(salesforce)
            .test_connection(Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConnectionTestError::Resolve(ResolveError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn tokens_under_another_key_are_unreadable() {
        let fixture = Fixture::new(Some("RT1")).await;
        let salesforce = Arc::new(ScriptedSalesforce::default());
        let other_cipher = TokenCipher::new(CryptoKey::new(vec![1u8; 32]).unwrap());
        let tester = ConnectionTester::new(
            ConnectionRepository::new(fixture.db.clone()),
            other_cipher,
            salesforce.clone(),
        );

        let err = tester.test_connection(fixture.org_id).await.unwrap_err();

        assert!(matches!(
            err,
            ConnectionTestError::Resolve(ResolveError::CredentialsUnreadable(_))
        ));
        assert!(salesforce.probe_tokens().is_empty());
    }
}
