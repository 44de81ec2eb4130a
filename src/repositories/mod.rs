//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! organization and Salesforce connection tables.

pub mod connection;
pub mod organization;

pub use connection::{ConnectionRepository, UpsertConnection};
pub use organization::{CreateOrganization, OrganizationRepository};
