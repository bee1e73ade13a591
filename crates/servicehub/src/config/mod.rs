use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

const RETENTION_PREFIX: &str = "NOTIFY_RETENTION_";
const RETENTION_SUFFIX: &str = "_DAYS";

/// Top-level configuration for the application, read once at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub notifications: NotificationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            notifications: NotificationConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for dispatch, retention and the expiry reaper.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub reaper_interval: Duration,
    pub delivery_timeout: Duration,
    pub accept_retry_limit: u32,
    pub admin_ids: Vec<String>,
    /// Retention in days keyed by event kind. Kinds without an entry never expire.
    pub retention_days: HashMap<String, u32>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let mut retention_days = HashMap::new();
        retention_days.insert("system_announcement".to_string(), 30);

        Self {
            reaper_interval: Duration::from_secs(3600),
            delivery_timeout: Duration::from_millis(2000),
            accept_retry_limit: 3,
            admin_ids: Vec::new(),
            retention_days,
        }
    }
}

impl NotificationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("NOTIFY_REAPER_INTERVAL_SECS") {
            let secs = parse_number::<u64>("NOTIFY_REAPER_INTERVAL_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::InvalidNumber {
                    key: "NOTIFY_REAPER_INTERVAL_SECS".to_string(),
                    value: raw,
                });
            }
            config.reaper_interval = Duration::from_secs(secs);
        }

        if let Ok(raw) = env::var("NOTIFY_DELIVERY_TIMEOUT_MS") {
            let millis = parse_number::<u64>("NOTIFY_DELIVERY_TIMEOUT_MS", &raw)?;
            config.delivery_timeout = Duration::from_millis(millis);
        }

        if let Ok(raw) = env::var("NOTIFY_ACCEPT_RETRY_LIMIT") {
            config.accept_retry_limit = parse_number::<u32>("NOTIFY_ACCEPT_RETRY_LIMIT", &raw)?;
        }

        if let Ok(raw) = env::var("NOTIFY_ADMIN_IDS") {
            config.admin_ids = raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }

        for (key, value) in env::vars() {
            let Some(kind) = key
                .strip_prefix(RETENTION_PREFIX)
                .and_then(|rest| rest.strip_suffix(RETENTION_SUFFIX))
            else {
                continue;
            };
            let days = parse_number::<u32>(&key, &value)?;
            let kind = kind.to_ascii_lowercase();
            if days == 0 {
                config.retention_days.remove(&kind);
            } else {
                config.retention_days.insert(kind, days);
            }
        }

        Ok(config)
    }

    pub fn retention_for(&self, kind: &str) -> Option<chrono::Duration> {
        self.retention_days
            .get(kind)
            .map(|days| chrono::Duration::days(i64::from(*days)))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer (found '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
