use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::access::WatchOptions;

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

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub geofence: GeofenceConfig,
    pub storage: StorageConfig,
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

        let radius_meters = positive_meters("GEOFENCE_RADIUS_METERS", 30.0)?;
        let distance_filter_meters = non_negative_meters("LOCATION_DISTANCE_FILTER_METERS", 10.0)?;
        let high_accuracy = flag("LOCATION_HIGH_ACCURACY", true)?;
        let fallback_owner_phone = env::var("OWNER_FALLBACK_PHONE")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let session_idle_timeout = seconds("SESSION_IDLE_TIMEOUT_SECS", 300)?;

        let data_dir = env::var("APP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let catalog_path = env::var("ESTATE_CATALOG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            geofence: GeofenceConfig {
                radius_meters,
                distance_filter_meters,
                high_accuracy,
                fallback_owner_phone,
                session_idle_timeout,
            },
            storage: StorageConfig {
                data_dir,
                catalog_path,
            },
        })
    }
}

fn meters(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| ConfigError::InvalidDistance {
                name,
                value: raw.clone(),
            }),
        Err(_) => Ok(default),
    }
}

fn positive_meters(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value = meters(name, default)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidDistance {
            name,
            value: value.to_string(),
        })
    }
}

fn non_negative_meters(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value = meters(name, default)?;
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidDistance {
            name,
            value: value.to_string(),
        })
    }
}

fn seconds(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs = match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| ConfigError::InvalidDuration {
                name,
                value: raw.clone(),
            })?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { name, value: raw }),
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Geofence radius and the watch options handed to location sources.
#[derive(Debug, Clone)]
pub struct GeofenceConfig {
    pub radius_meters: f64,
    pub distance_filter_meters: f64,
    pub high_accuracy: bool,
    /// Dialed when a listing has no owner phone of its own.
    pub fallback_owner_phone: Option<String>,
    /// Detail sessions with no client activity for this long are closed.
    pub session_idle_timeout: Duration,
}

impl GeofenceConfig {
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: self.high_accuracy,
            distance_filter_meters: self.distance_filter_meters,
        }
    }
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            radius_meters: 30.0,
            distance_filter_meters: 10.0,
            high_accuracy: true,
            fallback_owner_phone: None,
            session_idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Where persisted state and the listing catalog live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidDistance { name: &'static str, value: String },
    InvalidFlag { name: &'static str, value: String },
    InvalidDuration { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidDistance { name, value } => {
                write!(f, "{name} must be a valid distance in meters (got '{value}')")
            }
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be true or false (got '{value}')")
            }
            ConfigError::InvalidDuration { name, value } => {
                write!(f, "{name} must be a positive number of seconds (got '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidDistance { .. }
            | ConfigError::InvalidFlag { .. }
            | ConfigError::InvalidDuration { .. } => None,
        }
    }
}
