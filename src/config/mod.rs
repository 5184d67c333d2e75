//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Deployment environment, decides defaults and store backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::Invalid("APP_ENV")),
        }
    }
}

/// Which table store backs the entity services
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Database gateway over HTTP
    Postgrest,
    /// In-process tables, lost on restart
    Memory,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,
    pub environment: Environment,

    pub store_backend: StoreBackend,
    /// Database gateway base URL
    pub database_rest_url: String,
    /// Gateway service key (bypasses RLS - server only!)
    pub database_service_key: String,

    /// HS256 secret for access token verification
    pub jwt_secret: String,

    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Requests per second allowed per tenant
    pub api_rate_limit: u32,
    /// Upper bound for a single request
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let environment = match env::var("APP_ENV") {
            Ok(value) => Environment::parse(&value)?,
            Err(_) => Environment::Development,
        };

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("postgrest") => StoreBackend::Postgrest,
            Ok(_) => return Err(ConfigError::Invalid("STORE_BACKEND")),
            Err(_) if environment == Environment::Test => StoreBackend::Memory,
            Err(_) => StoreBackend::Postgrest,
        };

        // Gateway credentials are only mandatory when the gateway is used
        let (database_rest_url, database_service_key) = match store_backend {
            StoreBackend::Postgrest => (
                required("DATABASE_REST_URL")?,
                required("DATABASE_SERVICE_KEY")?,
            ),
            StoreBackend::Memory => (
                env::var("DATABASE_REST_URL").unwrap_or_default(),
                env::var("DATABASE_SERVICE_KEY").unwrap_or_default(),
            ),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(environment == Environment::Production),
            environment,

            store_backend,
            database_rest_url,
            database_service_key,

            jwt_secret: required("JWT_SECRET")?,
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            api_rate_limit: parse_or("API_RATE_LIMIT", 50)?,
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 15)?),
        })
    }
}

/// Settings for the incremental database sync tool
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Source database (the local one)
    pub database_url: String,
    /// Target database
    pub cloud_database_url: String,
    /// Only rows changed after this instant are considered
    pub since: Option<DateTime<Utc>>,
    pub log_level: String,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let since = match env::var("SYNC_SINCE") {
            Ok(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| ConfigError::Invalid("SYNC_SINCE"))?
                    .with_timezone(&Utc),
            ),
            Err(_) => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            cloud_database_url: required("CLOUD_DATABASE_URL")?,
            since,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Settings for the entitlement seeder
#[derive(Clone, Debug)]
pub struct SeedConfig {
    pub database_rest_url: String,
    pub database_service_key: String,
    pub tenant_ids: Vec<Uuid>,
    pub log_level: String,
}

impl SeedConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let tenant_ids = required("SEED_TENANT_IDS")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Uuid>().map_err(|_| ConfigError::Invalid("SEED_TENANT_IDS")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            database_rest_url: required("DATABASE_REST_URL")?,
            database_service_key: required("DATABASE_SERVICE_KEY")?,
            tenant_ids,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

impl Config {
    /// In-memory store on an ephemeral port; used by tests
    pub fn for_tests() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            log_json: false,
            environment: Environment::Test,
            store_backend: StoreBackend::Memory,
            database_rest_url: String::new(),
            database_service_key: String::new(),
            jwt_secret: "test-secret".to_string(),
            client_origin: "http://localhost:3000".to_string(),
            api_rate_limit: 1000,
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_names() {
        assert_eq!(Environment::parse("production").unwrap(), Environment::Production);
        assert_eq!(Environment::parse("DEV").unwrap(), Environment::Development);
        assert!(Environment::parse("staging").is_err());
    }
}
