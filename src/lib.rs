//! # CRM Config API Library
//!
//! Multi-tenant Salesforce connection management: organizations, the OAuth
//! authorization flow, encrypted token storage and connection testing with
//! automatic token refresh.

pub mod auth;
pub mod config;
pub mod connectors;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth_state;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
