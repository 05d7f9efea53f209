//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g. `0.0.0.0:5000`).
    pub server_addr: SocketAddr,
    /// PostgreSQL connection URL. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// HS256 secret shared with the storefront auth API that issues session tokens.
    pub jwt_secret: String,
    /// Key the order service presents in `x-app-key` when reporting orders.
    pub app_key: String,
    /// Origins allowed by CORS (the storefront frontends).
    pub allowed_origins: Vec<String>,
    /// A visitor whose last heartbeat is older than this is evicted.
    pub heartbeat_timeout: Duration,
    /// How often the visitor sweep runs.
    pub sweep_interval: Duration,
    /// Reject `register` from sockets that did not present a valid token.
    pub require_register_token: bool,
    /// User id of the store admin that shoppers chat with, if any.
    pub admin_user_id: Option<String>,
    /// Default number of days returned by the visitor stats API.
    pub stats_history_days: u32,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (environment, test maps).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string());
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;

        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());
        let jwt_secret = lookup("JWT_SECRET")
            .unwrap_or_else(|| "storefront_jwt_secret_change_in_production".to_string());
        let app_key = lookup("APP_KEY").unwrap_or_else(|| "storefront_app_key".to_string());
        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let heartbeat_timeout =
            Duration::from_secs(parse_number(&lookup, "HEARTBEAT_TIMEOUT_SECS", 10)?);
        let sweep_interval = Duration::from_secs(parse_number(&lookup, "SWEEP_INTERVAL_SECS", 5)?);
        if sweep_interval.is_zero() {
            return Err(ConfigLoadError::InvalidNumber("SWEEP_INTERVAL_SECS"));
        }

        let require_register_token = match lookup("REQUIRE_REGISTER_TOKEN") {
            None => false,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => return Err(ConfigLoadError::InvalidBool("REQUIRE_REGISTER_TOKEN")),
            },
        };
        let admin_user_id = lookup("ADMIN_USER_ID")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let stats_history_days = parse_number(&lookup, "STATS_HISTORY_DAYS", 7)? as u32;
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            server_addr,
            database_url,
            jwt_secret,
            app_key,
            allowed_origins,
            heartbeat_timeout,
            sweep_interval,
            require_register_token,
            admin_user_id,
            stats_history_days,
            log_level,
        })
    }
}

fn parse_number<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(key)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
    #[error("Invalid boolean in {0}")]
    InvalidBool(&'static str),
}
