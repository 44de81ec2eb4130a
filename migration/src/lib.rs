//! Database migrations for the CRM Config API.
//!
//! Run in order at startup by the service binary and by the test harness.

pub use sea_orm_migration::prelude::*;

mod m2025_01_01_000001_create_organizations;
mod m2025_01_01_000002_create_salesforce_connections;
mod m2025_01_01_000003_create_saved_configs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_01_000001_create_organizations::Migration),
            Box::new(m2025_01_01_000002_create_salesforce_connections::Migration),
            Box::new(m2025_01_01_000003_create_saved_configs::Migration),
        ]
    }
}
