//! Connection resolution
//!
//! Loads an organization's stored Salesforce connection and decrypts its
//! tokens into a [`DecryptedConnection`]. That type lives only for the
//! duration of a request: it cannot be serialized, its `Debug` output hides
//! the tokens, and its memory is wiped on drop.

use std::fmt;

use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{CryptoError, TokenCipher};
use crate::models::salesforce_connection;
use crate::repositories::ConnectionRepository;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no Salesforce connection for organization {org_id}")]
    NotFound { org_id: Uuid },
    /// Stored ciphertext could not be decrypted, usually after a key change.
    #[error("stored Salesforce credentials are unreadable: {0}")]
    CredentialsUnreadable(#[source] CryptoError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Plaintext credentials for one request.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DecryptedConnection {
    #[zeroize(skip)]
    pub connection_id: Uuid,
    #[zeroize(skip)]
    pub org_id: Uuid,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub instance_url: String,
    pub salesforce_org_id: Option<String>,
}

impl fmt::Debug for DecryptedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedConnection")
            .field("connection_id", &self.connection_id)
            .field("org_id", &self.org_id)
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("instance_url", &self.instance_url)
            .finish()
    }
}

/// Turns an organization id into usable Salesforce credentials.
#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    repository: ConnectionRepository,
    cipher: TokenCipher,
}

impl ConnectionResolver {
    pub fn new(repository: ConnectionRepository, cipher: TokenCipher) -> Self {
        Self { repository, cipher }
    }

    pub async fn resolve(&self, org_id: Uuid) -> Result<DecryptedConnection, ResolveError> {
        let row = self
            .repository
            .find_by_org(org_id)
            .await?
            .ok_or(ResolveError::NotFound { org_id })?;

        self.decrypt(&row)
    }

    fn decrypt(
        &self,
        row: &salesforce_connection::Model,
    ) -> Result<DecryptedConnection, ResolveError> {
        let access_token = self
            .cipher
            .decrypt(&row.access_token)
            .map_err(|err| unreadable(row, err))?;
        let refresh_token = row
            .refresh_token
            .as_deref()
            .map(|ciphertext| self.cipher.decrypt(ciphertext))
            .transpose()
            .map_err(|err| unreadable(row, err))?;

        Ok(DecryptedConnection {
            connection_id: row.id,
            org_id: row.org_id,
            access_token,
            refresh_token,
            instance_url: row.instance_url.clone(),
            salesforce_org_id: row.salesforce_org_id.clone(),
        })
    }
}

fn unreadable(row: &salesforce_connection::Model, err: CryptoError) -> ResolveError {
    tracing::error!(
        org_id = %row.org_id,
        connection_id = %row.id,
        "Token decryption failed"
    );
    ResolveError::CredentialsUnreadable(err)
}
