//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Session verification configuration.
    pub auth: AuthConfig,
    /// Room registry configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,
    /// Poll engine configuration.
    #[serde(default)]
    pub polls: PollsConfig,
    /// Log output configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Session token verification.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared HS256 secret of the session issuer.
    pub jwt_secret: String,
    /// Expected `iss` claim, if the issuer sets one.
    #[serde(default)]
    pub issuer: Option<String>,
}

/// Room registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Maximum number of active rooms a single host may own.
    #[serde(default = "default_max_active_rooms_per_host")]
    pub max_active_rooms_per_host: u64,
    /// Capacity of each room's broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Interval of the stale presence reaper, in seconds.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

/// Poll engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollsConfig {
    /// Interval of the expiration reconciliation sweep, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum poll creations per room within the rate limit window.
    #[serde(default = "default_max_polls_per_window")]
    pub max_polls_per_window: u64,
    /// Rolling rate limit window, in seconds.
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: i64,
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_active_rooms_per_host: default_max_active_rooms_per_host(),
            broadcast_capacity: default_broadcast_capacity(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_polls_per_window: default_max_polls_per_window(),
            rate_window_secs: default_rate_window_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

const fn default_max_active_rooms_per_host() -> u64 {
    5
}

const fn default_broadcast_capacity() -> usize {
    256
}

const fn default_reaper_interval_secs() -> u64 {
    3600
}

const fn default_sweep_interval_secs() -> u64 {
    30
}

const fn default_max_polls_per_window() -> u64 {
    3
}

const fn default_rate_window_secs() -> i64 {
    60
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `LOUNGE_ENV`)
    /// 4. Environment variables with `LOUNGE__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("LOUNGE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("LOUNGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("LOUNGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
