//! Migration to create the salesforce_connections table.
//!
//! Holds at most one encrypted credential set per organization. The unique
//! index on `org_id` is the conflict target for the callback upsert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SalesforceConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SalesforceConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::OrgId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::AccessToken)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::RefreshToken)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::InstanceUrl)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::SalesforceOrgId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SalesforceConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_salesforce_connections_org_id")
                            .from(SalesforceConnections::Table, SalesforceConnections::OrgId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One connection per organization
        manager
            .create_index(
                Index::create()
                    .name("idx_salesforce_connections_org_id")
                    .table(SalesforceConnections::Table)
                    .col(SalesforceConnections::OrgId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_salesforce_connections_org_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SalesforceConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SalesforceConnections {
    Table,
    Id,
    OrgId,
    AccessToken,
    RefreshToken,
    InstanceUrl,
    SalesforceOrgId,
    TokenExpiresAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}
