/// Configuration management for Gatehouse
use crate::error::{GateError, GateResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub notifications: NotificationConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret the identity verifier signs session tokens with
    pub jwt_secret: String,
    /// External ids allowed into the admin panel (comma-separated in env)
    pub admin_ids: Vec<String>,
}

/// Outbound notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook receiving new access request announcements
    pub webhook_url: Option<String>,
    /// Base URL avatar references are resolved against
    pub avatar_base_url: String,
    pub timeout_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Read logging settings from the environment.
    ///
    /// Split out so logging can be initialized before the rest of the
    /// configuration is loaded and validated.
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "gatehouse=debug,tower_http=debug".to_string());
        let format = match env::var("GATEHOUSE_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self { level, format }
    }
}

/// Split a comma-separated env value into trimmed, non-empty entries
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> GateResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("GATEHOUSE_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("GATEHOUSE_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| GateError::Validation("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let data_directory: PathBuf = env::var("GATEHOUSE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("GATEHOUSE_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("gatehouse.sqlite"));

        let jwt_secret = env::var("GATEHOUSE_JWT_SECRET")
            .map_err(|_| GateError::Validation("JWT secret required".to_string()))?;
        let admin_ids = split_list(&env::var("GATEHOUSE_ADMIN_IDS").unwrap_or_default());

        let webhook_url = env::var("GATEHOUSE_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let avatar_base_url = env::var("GATEHOUSE_AVATAR_BASE_URL")
            .unwrap_or_else(|_| "https://cdn.discordapp.com".to_string());
        let timeout_secs = env::var("GATEHOUSE_WEBHOOK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let rate_limit_enabled = env::var("GATEHOUSE_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig {
                jwt_secret,
                admin_ids,
            },
            notifications: NotificationConfig {
                webhook_url,
                avatar_base_url,
                timeout_secs,
            },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
            },
            logging: LoggingConfig::from_env(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> GateResult<()> {
        if self.service.hostname.is_empty() {
            return Err(GateError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(GateError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.admin_ids.is_empty() {
            tracing::warn!("No admin ids configured; the admin panel will be unreachable");
        }

        Ok(())
    }
}
