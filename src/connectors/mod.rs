//! Connectors module
//!
//! Outbound clients for the CRM providers this service integrates with.
//! Salesforce is the only provider; its client sits behind the
//! [`SalesforceApi`] trait so the refresh orchestrator can be driven by a
//! scripted fake in tests.

pub mod salesforce;

pub use salesforce::{
    ConnectionInfo, RefreshedToken, SalesforceApi, SalesforceClient, SalesforceError,
    SalesforceOAuthConfig, TokenGrant,
};
