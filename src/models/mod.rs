//! # Data Models
//!
//! SeaORM entities plus the small service-level response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod organization;
pub mod salesforce_connection;
pub mod saved_config;

pub use organization::Entity as Organization;
pub use salesforce_connection::Entity as SalesforceConnection;
pub use saved_config::Entity as SavedConfig;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "crm-config-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Liveness and database reachability
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` when every dependency answered, `degraded` otherwise
    #[schema(example = "healthy")]
    pub status: String,
    /// Service name
    pub app: String,
    /// Service version
    pub version: String,
    /// `ok` or `unavailable`
    pub database: String,
    /// RFC 3339 timestamp of the check
    pub timestamp: String,
}
