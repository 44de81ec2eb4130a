//! Organization entity model
//!
//! Organizations are the tenants of the service. Deleting one cascades to its
//! Salesforce connection and saved configs.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Display name, 1..=255 characters
    pub name: String,

    /// URL-safe unique handle
    #[sea_orm(unique)]
    pub slug: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::salesforce_connection::Entity")]
    SalesforceConnection,
    #[sea_orm(has_many = "super::saved_config::Entity")]
    SavedConfigs,
}

impl Related<super::salesforce_connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SalesforceConnection.def()
    }
}

impl Related<super::saved_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SavedConfigs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
