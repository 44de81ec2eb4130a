//! Migration to create the saved_configs table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SavedConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SavedConfigs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SavedConfigs::OrgId).uuid().not_null())
                    .col(ColumnDef::new(SavedConfigs::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(SavedConfigs::ConfigType)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SavedConfigs::ConfigData).json().not_null())
                    .col(ColumnDef::new(SavedConfigs::Description).text().null())
                    .col(
                        ColumnDef::new(SavedConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SavedConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_saved_configs_org_id")
                            .from(SavedConfigs::Table, SavedConfigs::OrgId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_saved_configs_org_id")
                    .table(SavedConfigs::Table)
                    .col(SavedConfigs::OrgId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_saved_configs_org_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SavedConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SavedConfigs {
    Table,
    Id,
    OrgId,
    Name,
    ConfigType,
    ConfigData,
    Description,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}
