//! # Organization Repository
//!
//! CRUD operations for organizations, including slug validation and
//! cascade deletion of everything an organization owns.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::organization::{self, Entity as Organization};
use crate::models::{salesforce_connection, saved_config};

const MAX_FIELD_CHARS: usize = 255;

static SLUG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern is a valid regex")
});

/// Request data for creating an organization
#[derive(Debug, Clone)]
pub struct CreateOrganization {
    pub name: String,
    pub slug: String,
}

/// Repository for organization database operations
pub struct OrganizationRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> OrganizationRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create an organization with a unique slug.
    pub async fn create(
        &self,
        request: CreateOrganization,
    ) -> Result<organization::Model, RepositoryError> {
        let name = request.name.trim().to_string();
        validate_name(&name)?;
        validate_slug(&request.slug)?;

        if self.find_by_slug(&request.slug).await?.is_some() {
            return Err(slug_taken(&request.slug));
        }

        let now = Utc::now();
        let organization = organization::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            slug: Set(request.slug.clone()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        // A concurrent insert can still win the race; the unique index decides.
        organization.insert(self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                slug_taken(&request.slug)
            } else {
                RepositoryError::Database(err)
            }
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<organization::Model>, RepositoryError> {
        Ok(Organization::find_by_id(id).one(self.db).await?)
    }

    pub async fn find_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<organization::Model>, RepositoryError> {
        Ok(Organization::find()
            .filter(organization::Column::Slug.eq(slug))
            .one(self.db)
            .await?)
    }

    /// Delete an organization together with its connection and saved configs.
    ///
    /// Returns `false` when the organization did not exist.
    pub async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let txn = self.db.begin().await?;

        saved_config::Entity::delete_many()
            .filter(saved_config::Column::OrgId.eq(id))
            .exec(&txn)
            .await?;
        salesforce_connection::Entity::delete_many()
            .filter(salesforce_connection::Column::OrgId.eq(id))
            .exec(&txn)
            .await?;
        let result = Organization::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }
}

fn slug_taken(slug: &str) -> RepositoryError {
    RepositoryError::Conflict(format!("Slug '{slug}' is already taken"))
}

fn validate_name(name: &str) -> Result<(), RepositoryError> {
    let length = name.chars().count();
    if length == 0 || length > MAX_FIELD_CHARS {
        return Err(RepositoryError::Validation {
            field: "name",
            message: format!("must be between 1 and {MAX_FIELD_CHARS} characters"),
        });
    }
    Ok(())
}

fn validate_slug(slug: &str) -> Result<(), RepositoryError> {
    if slug.is_empty() || slug.chars().count() > MAX_FIELD_CHARS {
        return Err(RepositoryError::Validation {
            field: "slug",
            message: format!("must be between 1 and {MAX_FIELD_CHARS} characters"),
        });
    }
    if !SLUG_PATTERN.is_match(slug) {
        return Err(RepositoryError::Validation {
            field: "slug",
            message: "must be lowercase alphanumeric words separated by single hyphens"
                .to_string(),
        });
    }
    Ok(())
}
