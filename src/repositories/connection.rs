//! Salesforce connection repository
//!
//! Stores at most one encrypted credential set per organization. All token
//! arguments are ciphertext produced by [`TokenCipher`]; this layer never
//! sees plaintext.
//!
//! [`TokenCipher`]: crate::crypto::TokenCipher

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::models::salesforce_connection::{self, Column, Entity as SalesforceConnection};

/// Encrypted fields captured from a successful authorization callback.
#[derive(Debug, Clone)]
pub struct UpsertConnection {
    pub org_id: Uuid,
    pub access_token: String,
    /// Kept from the previous row when `None`
    pub refresh_token: Option<String>,
    pub instance_url: String,
    pub salesforce_org_id: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// Repository for Salesforce connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: DatabaseConnection,
}

impl ConnectionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_org(
        &self,
        org_id: Uuid,
    ) -> Result<Option<salesforce_connection::Model>, DbErr> {
        SalesforceConnection::find()
            .filter(Column::OrgId.eq(org_id))
            .one(&self.db)
            .await
    }

    /// Insert or update the organization's connection in one statement.
    ///
    /// Access token, instance URL, Salesforce org id and expiry always
    /// describe the latest grant. The refresh token only overwrites when
    /// provided.
    /// Concurrent callbacks for one organization resolve last-writer-wins.
    pub async fn upsert_from_callback(
        &self,
        input: UpsertConnection,
    ) -> Result<salesforce_connection::Model, DbErr> {
        let now = Utc::now();

        let mut update_columns = vec![
            Column::AccessToken,
            Column::InstanceUrl,
            Column::SalesforceOrgId,
            Column::TokenExpiresAt,
            Column::UpdatedAt,
        ];
        if input.refresh_token.is_some() {
            update_columns.push(Column::RefreshToken);
        }

        let row = salesforce_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            org_id: Set(input.org_id),
            access_token: Set(input.access_token),
            refresh_token: Set(input.refresh_token),
            instance_url: Set(input.instance_url),
            salesforce_org_id: Set(input.salesforce_org_id),
            token_expires_at: Set(input.token_expires_at.map(Into::into)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        SalesforceConnection::insert(row)
            .on_conflict(
                OnConflict::column(Column::OrgId)
                    .update_columns(update_columns)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        self.find_by_org(input.org_id).await?.ok_or_else(|| {
            DbErr::RecordNotFound(format!("salesforce connection for org {}", input.org_id))
        })
    }

    /// Persist a refreshed access token.
    ///
    /// `instance_url` is only written when Salesforce returned a new one. The
    /// refresh token and Salesforce org id are never touched; the expiry is
    /// cleared since the refresh grant carries no lifetime.
    pub async fn update_refreshed_token(
        &self,
        connection_id: Uuid,
        access_token: String,
        instance_url: Option<String>,
    ) -> Result<salesforce_connection::Model, DbErr> {
        let mut active = salesforce_connection::ActiveModel {
            id: Set(connection_id),
            access_token: Set(access_token),
            token_expires_at: Set(None),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        if let Some(instance_url) = instance_url {
            active.instance_url = Set(instance_url);
        }

        active.update(&self.db).await
    }

    /// Overwrite both token ciphertexts, used when rotating the cipher key.
    pub async fn replace_ciphertexts(
        &self,
        connection_id: Uuid,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<salesforce_connection::Model, DbErr> {
        salesforce_connection::ActiveModel {
            id: Set(connection_id),
            access_token: Set(access_token),
            refresh_token: Set(refresh_token),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .update(&self.db)
        .await
    }

    pub async fn list_all(&self) -> Result<Vec<salesforce_connection::Model>, DbErr> {
        SalesforceConnection::find()
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
    }
}
