/// Configuration management for Heartline
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub presence: PresenceConfig,
    pub calls: CallConfig,
    pub realtime: RealtimeConfig,
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
///
/// Tokens are issued by the account service; this process only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Typing and online presence windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    pub typing_ttl_secs: u64,
    pub online_window_secs: i64,
    pub typing_max_entries: usize,
}

/// Call polling windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// How long an unanswered call keeps ringing
    pub ring_window_secs: i64,
    /// How long a status change stays visible to pollers
    pub status_window_secs: i64,
}

/// Realtime gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub connection_buffer: usize,
    pub send_timeout_ms: u64,
    pub ping_interval_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            typing_ttl_secs: 3,
            online_window_secs: 120,
            typing_max_entries: 10_000,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_window_secs: 45,
            status_window_secs: 10,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connection_buffer: 64,
            send_timeout_ms: 5000,
            ping_interval_secs: 30,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            authenticated_rps: 100,
            unauthenticated_rps: 10,
            burst_size: 50,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("HEARTLINE_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("HEARTLINE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| AppError::Validation("Invalid port number".to_string()))?;
        let version = env::var("HEARTLINE_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("HEARTLINE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("HEARTLINE_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("heartline.sqlite"));

        let jwt_secret = env::var("HEARTLINE_JWT_SECRET")
            .map_err(|_| AppError::Validation("JWT secret required".to_string()))?;

        let presence_defaults = PresenceConfig::default();
        let call_defaults = CallConfig::default();
        let realtime_defaults = RealtimeConfig::default();
        let rate_defaults = RateLimitConfig::default();

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
            authentication: AuthConfig { jwt_secret },
            presence: PresenceConfig {
                typing_ttl_secs: env_or("HEARTLINE_TYPING_TTL_SECS", presence_defaults.typing_ttl_secs),
                online_window_secs: env_or(
                    "HEARTLINE_ONLINE_WINDOW_SECS",
                    presence_defaults.online_window_secs,
                ),
                typing_max_entries: env_or(
                    "HEARTLINE_TYPING_MAX_ENTRIES",
                    presence_defaults.typing_max_entries,
                ),
            },
            calls: CallConfig {
                ring_window_secs: env_or("HEARTLINE_CALL_RING_SECS", call_defaults.ring_window_secs),
                status_window_secs: env_or(
                    "HEARTLINE_CALL_STATUS_SECS",
                    call_defaults.status_window_secs,
                ),
            },
            realtime: RealtimeConfig {
                connection_buffer: env_or(
                    "HEARTLINE_REALTIME_BUFFER",
                    realtime_defaults.connection_buffer,
                ),
                send_timeout_ms: env_or(
                    "HEARTLINE_REALTIME_SEND_TIMEOUT_MS",
                    realtime_defaults.send_timeout_ms,
                ),
                ping_interval_secs: env_or(
                    "HEARTLINE_REALTIME_PING_SECS",
                    realtime_defaults.ping_interval_secs,
                ),
            },
            rate_limit: RateLimitConfig {
                enabled: env_or("HEARTLINE_RATE_LIMITS_ENABLED", rate_defaults.enabled),
                authenticated_rps: env_or(
                    "HEARTLINE_RATE_LIMIT_AUTH_RPS",
                    rate_defaults.authenticated_rps,
                ),
                unauthenticated_rps: env_or(
                    "HEARTLINE_RATE_LIMIT_ANON_RPS",
                    rate_defaults.unauthenticated_rps,
                ),
                burst_size: env_or("HEARTLINE_RATE_LIMIT_BURST", rate_defaults.burst_size),
            },
            logging: LoggingConfig {
                level: env::var("HEARTLINE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AppError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(AppError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.realtime.connection_buffer == 0 {
            return Err(AppError::Validation(
                "Realtime connection buffer must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration suitable for tests: in-memory defaults, fixed secret
    pub fn for_tests() -> Self {
        Self {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                database: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            },
            presence: PresenceConfig::default(),
            calls: CallConfig::default(),
            realtime: RealtimeConfig::default(),
            rate_limit: RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
            },
        }
    }
}
