//! Runtime configuration read from the environment.

use std::env;
use std::time::Duration;

use crate::domain::aggregates::SecurityPolicy;

const DEV_JWT_SECRET: &str = "myshop-dev-secret-change-me";
const DEFAULT_MAIL_FROM: &str = "MyShop <noreply@myshop.local>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub public_base_url: String,
    pub mail_from: String,
    /// Outgoing mail server; mail is only logged when unset.
    pub smtp_url: Option<String>,
    pub security: SecurityPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = match env::var("STORE").unwrap_or_else(|_| "postgres".to_string()).as_str() {
            "postgres" => StoreKind::Postgres,
            "memory" => StoreKind::Memory,
            other => return Err(ConfigError::Invalid { key: "STORE", value: other.to_string() }),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if store == StoreKind::Memory => DEV_JWT_SECRET.to_string(),
            Err(_) => return Err(ConfigError::Missing("JWT_SECRET")),
        };

        let mut security = SecurityPolicy::default();
        security.apply_delays = match env::var("LOGIN_DELAYS").unwrap_or_else(|_| "on".to_string()).as_str() {
            "on" | "true" | "1" => true,
            "off" | "false" | "0" => false,
            other => return Err(ConfigError::Invalid { key: "LOGIN_DELAYS", value: other.to_string() }),
        };

        let port = parse_var("PORT", 8083)?;
        Ok(Self {
            port,
            store,
            database_url,
            nats_url: env::var("NATS_URL").ok(),
            jwt_secret,
            access_token_ttl: Duration::from_secs(parse_var("ACCESS_TOKEN_MINUTES", 60u64)? * 60),
            refresh_token_ttl: Duration::from_secs(parse_var("REFRESH_TOKEN_DAYS", 7u64)? * 86_400),
            public_base_url: env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}")),
            mail_from: env::var("MAIL_FROM").unwrap_or_else(|_| DEFAULT_MAIL_FROM.to_string()),
            smtp_url: env::var("SMTP_URL").ok().filter(|url| !url.trim().is_empty()),
            security,
        })
    }

    /// Settings for tests and local runs against the memory store.
    pub fn for_memory() -> Self {
        let mut security = SecurityPolicy::default();
        security.apply_delays = false;
        Self {
            port: 8083,
            store: StoreKind::Memory,
            database_url: None,
            nats_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            access_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(7 * 86_400),
            public_base_url: "http://localhost:8083".to_string(),
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            smtp_url: None,
            security,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_disables_delays() {
        let config = Config::for_memory();
        assert_eq!(config.store, StoreKind::Memory);
        assert!(!config.security.apply_delays);
        assert_eq!(config.refresh_token_ttl.as_secs(), 604_800);
        assert!(config.smtp_url.is_none());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid { key: "PORT", value: "abc".into() };
        assert_eq!(err.to_string(), "invalid value \"abc\" for PORT");
        assert_eq!(ConfigError::Missing("JWT_SECRET").to_string(), "missing required environment variable JWT_SECRET");
        let source: &dyn std::error::Error = &err;
        assert!(source.source().is_none());
    }
}
