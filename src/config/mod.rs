//! Configuration loading for the CRM Config API.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CRM_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::crypto::KEY_LEN;

const ENV_PREFIX: &str = "CRM_";
const REDACTED: &str = "[REDACTED]";

/// Placeholder secret shipped in sample env files; rejected outside local/test.
pub const DEFAULT_APP_SECRET: &str = "change-me-in-production";

/// Application configuration derived from `CRM_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default = "default_app_secret")]
    pub app_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salesforce_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salesforce_client_secret: Option<String>,
    #[serde(default = "default_salesforce_redirect_uri")]
    pub salesforce_redirect_uri: String,
    #[serde(default = "default_salesforce_login_base")]
    pub salesforce_login_base: String,
    #[serde(default = "default_salesforce_token_timeout_seconds")]
    pub salesforce_token_timeout_seconds: u64,
    #[serde(default = "default_salesforce_api_timeout_seconds")]
    pub salesforce_api_timeout_seconds: u64,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            app_secret: default_app_secret(),
            salesforce_client_id: None,
            salesforce_client_secret: None,
            salesforce_redirect_uri: default_salesforce_redirect_uri(),
            salesforce_login_base: default_salesforce_login_base(),
            salesforce_token_timeout_seconds: default_salesforce_token_timeout_seconds(),
            salesforce_api_timeout_seconds: default_salesforce_api_timeout_seconds(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Local and test profiles tolerate placeholder credentials.
    pub fn is_development_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    pub fn salesforce_token_timeout(&self) -> Duration {
        Duration::from_secs(self.salesforce_token_timeout_seconds)
    }

    pub fn salesforce_api_timeout(&self) -> Duration {
        Duration::from_secs(self.salesforce_api_timeout_seconds)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        config.app_secret = REDACTED.to_string();
        if config.salesforce_client_secret.is_some() {
            config.salesforce_client_secret = Some(REDACTED.to_string());
        }
        if let Ok(mut url) = Url::parse(&config.database_url) {
            if url.password().is_some() && url.set_password(Some(REDACTED)).is_ok() {
                config.database_url = url.to_string();
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != KEY_LEN => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if self.app_secret.trim().is_empty() {
            return Err(ConfigError::MissingAppSecret);
        }

        if !self.is_development_profile() {
            if self.app_secret == DEFAULT_APP_SECRET {
                return Err(ConfigError::DefaultAppSecret {
                    profile: self.profile.clone(),
                });
            }
            if self.salesforce_client_id.is_none() {
                return Err(ConfigError::MissingSalesforceClientId);
            }
            if self.salesforce_client_secret.is_none() {
                return Err(ConfigError::MissingSalesforceClientSecret);
            }
        }

        for (field, value) in [
            (
                "SALESFORCE_TOKEN_TIMEOUT_SECONDS",
                self.salesforce_token_timeout_seconds,
            ),
            (
                "SALESFORCE_API_TIMEOUT_SECONDS",
                self.salesforce_api_timeout_seconds,
            ),
        ] {
            if !(1..=120).contains(&value) {
                return Err(ConfigError::InvalidTimeout {
                    field: field.to_string(),
                    value,
                });
            }
        }

        for (field, value) in [
            ("SALESFORCE_LOGIN_BASE", &self.salesforce_login_base),
            ("SALESFORCE_REDIRECT_URI", &self.salesforce_redirect_uri),
        ] {
            let parsed = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
                field: field.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidUrl {
                    field: field.to_string(),
                    value: value.clone(),
                    reason: "scheme must be http or https".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/crm_config".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_app_secret() -> String {
    DEFAULT_APP_SECRET.to_string()
}

fn default_salesforce_redirect_uri() -> String {
    "http://localhost:8000/auth/salesforce/callback".to_string()
}

fn default_salesforce_login_base() -> String {
    "https://login.salesforce.com".to_string()
}

fn default_salesforce_token_timeout_seconds() -> u64 {
    30
}

fn default_salesforce_api_timeout_seconds() -> u64 {
    15
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("crypto key is missing; set CRM_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("app secret is missing; set CRM_APP_SECRET environment variable")]
    MissingAppSecret,
    #[error("app secret still has its placeholder value in profile '{profile}'")]
    DefaultAppSecret { profile: String },
    #[error("Salesforce client ID is missing; set CRM_SALESFORCE_CLIENT_ID environment variable")]
    MissingSalesforceClientId,
    #[error(
        "Salesforce client secret is missing; set CRM_SALESFORCE_CLIENT_SECRET environment variable"
    )]
    MissingSalesforceClientSecret,
    #[error("{field} must be between 1 and 120 seconds, got {value}")]
    InvalidTimeout { field: String, value: u64 },
    #[error("{field} '{value}' is not a valid URL: {reason}")]
    InvalidUrl {
        field: String,
        value: String,
        reason: String,
    },
}

/// Loads configuration using layered `.env` files and `CRM_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration. Process environment wins over env files.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let crypto_key = match take_string(&mut layered, "CRYPTO_KEY") {
            Some(key_str) => Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(
                |e| ConfigError::InvalidCryptoKeyBase64 {
                    error: e.to_string(),
                },
            )?),
            None => None,
        };

        let app_secret = take_string(&mut layered, "APP_SECRET").unwrap_or_else(default_app_secret);
        let salesforce_client_id = take_string(&mut layered, "SALESFORCE_CLIENT_ID");
        let salesforce_client_secret = take_string(&mut layered, "SALESFORCE_CLIENT_SECRET");
        let salesforce_redirect_uri = take_string(&mut layered, "SALESFORCE_REDIRECT_URI")
            .unwrap_or_else(default_salesforce_redirect_uri);
        let salesforce_login_base = take_string(&mut layered, "SALESFORCE_LOGIN_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(default_salesforce_login_base);
        let salesforce_token_timeout_seconds =
            take_parsed(&mut layered, "SALESFORCE_TOKEN_TIMEOUT_SECONDS")
                .unwrap_or_else(default_salesforce_token_timeout_seconds);
        let salesforce_api_timeout_seconds =
            take_parsed(&mut layered, "SALESFORCE_API_TIMEOUT_SECONDS")
                .unwrap_or_else(default_salesforce_api_timeout_seconds);
        let cors_origins = take_string(&mut layered, "CORS_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(default_cors_origins);

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            crypto_key,
            app_secret,
            salesforce_client_id,
            salesforce_client_secret,
            salesforce_redirect_uri,
            salesforce_login_base,
            salesforce_token_timeout_seconds,
            salesforce_api_timeout_seconds,
            cors_origins,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove a key, treating blank values as unset.
fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    take_string(values, key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            crypto_key: Some(vec![0u8; 32]),
            ..AppConfig::default()
        }
    }

    #[test]
    fn local_profile_accepts_placeholder_credentials() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_or_short_crypto_key_is_rejected() {
        let missing = AppConfig::default();
        assert!(matches!(
            missing.validate(),
            Err(ConfigError::MissingCryptoKey)
        ));

        let short = AppConfig {
            crypto_key: Some(vec![0u8; 16]),
            ..AppConfig::default()
        };
        assert!(matches!(
            short.validate(),
            Err(ConfigError::InvalidCryptoKeyLength { length: 16 })
        ));
    }

    #[test]
    fn production_profile_requires_real_secrets() {
        let mut config = AppConfig {
            profile: "prod".to_string(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DefaultAppSecret { .. })
        ));

        config.app_secret = "a-real-secret".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSalesforceClientId)
        ));

        config.salesforce_client_id = Some("client".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSalesforceClientSecret)
        ));

        config.salesforce_client_secret = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timeouts_must_be_bounded() {
        let config = AppConfig {
            salesforce_api_timeout_seconds: 0,
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { value: 0, .. })
        ));
    }

    #[test]
    fn login_base_must_be_http_url() {
        let config = AppConfig {
            salesforce_login_base: "ftp://login.salesforce.com".to_string(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let config = AppConfig {
            app_secret: "super-secret-signing-key".to_string(),
            salesforce_client_secret: Some("sf-client-secret".to_string()),
            database_url: "postgres://crm:hunter2@db:5432/crm".to_string(),
            ..valid_config()
        };
        let json = config.redacted_json().expect("serializes");

        assert!(!json.contains("super-secret-signing-key"));
        assert!(!json.contains("sf-client-secret"));
        assert!(!json.contains("hunter2"));
        assert!(json.contains(REDACTED));
    }
}
