//! Salesforce connection entity model
//!
//! One row per organization. Token columns hold [`TokenCipher`] output only;
//! plaintext tokens never reach this table.
//!
//! [`TokenCipher`]: crate::crypto::TokenCipher

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "salesforce_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning organization (unique)
    #[sea_orm(unique)]
    pub org_id: Uuid,

    /// Encrypted access token
    #[sea_orm(column_type = "Text")]
    pub access_token: String,

    /// Encrypted refresh token, absent when Salesforce never issued one
    #[sea_orm(column_type = "Text", nullable)]
    pub refresh_token: Option<String>,

    /// Base URL of the tenant's Salesforce instance, no trailing slash
    pub instance_url: String,

    /// Salesforce's own organization id (`00D...`)
    pub salesforce_org_id: Option<String>,

    pub token_expires_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrgId",
        to = "super::organization::Column::Id",
        on_delete = "Cascade"
    )]
    Organization,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
