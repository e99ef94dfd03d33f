//! Configuration management

use std::time::Duration;

use shopledger_observability::LogFormat;

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default wait for a pooled connection, in seconds.
pub const DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Shared secret used when `JWT_SECRET` is unset. Development only.
pub const DEV_JWT_SECRET: &str = "dev-secret";

/// Default number of sample rows per dependent set.
pub const DEFAULT_DEPENDENCY_SAMPLE_LIMIT: usize = 5;

pub const MAX_DEPENDENCY_SAMPLE_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt_secret: String,
    pub dependency_sample_limit: usize,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// `None` runs the server on the in-memory retail store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    parse_setting(key, std::env::var(key).ok().as_deref(), default)
}

/// Unset or blank falls back to `default`; anything else must parse.
fn parse_setting<T: std::str::FromStr>(key: &str, raw: Option<&str>, default: T) -> anyhow::Result<T> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => match value.parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => anyhow::bail!("{key} has an invalid value '{value}'"),
        },
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let config = Config {
            server: ServerConfig {
                host: std::env::var("SHOPLEDGER_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("SHOPLEDGER_PORT", DEFAULT_SERVER_PORT)?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
                acquire_timeout_secs: env_or("DATABASE_ACQUIRE_TIMEOUT", DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS)?,
                run_migrations: env_or("RUN_MIGRATIONS", true)?,
            },
            jwt_secret,
            dependency_sample_limit: env_or("DEPENDENCY_SAMPLE_LIMIT", DEFAULT_DEPENDENCY_SAMPLE_LIMIT)?,
            log_format: env_or("LOG_FORMAT", LogFormat::default())?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.acquire_timeout_secs == 0 {
            anyhow::bail!("Database acquire timeout must be greater than 0");
        }

        if self.jwt_secret.is_empty() {
            anyhow::bail!("JWT secret cannot be empty");
        }

        if !(1..=MAX_DEPENDENCY_SAMPLE_LIMIT).contains(&self.dependency_sample_limit) {
            anyhow::bail!(
                "Dependency sample limit ({}) must be between 1 and {}",
                self.dependency_sample_limit,
                MAX_DEPENDENCY_SAMPLE_LIMIT
            );
        }

        if self.database.url.is_none() {
            tracing::warn!("DATABASE_URL not set - using the in-memory store, data is lost on exit");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                acquire_timeout_secs: DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS,
                run_migrations: true,
            },
            jwt_secret: DEV_JWT_SECRET.to_string(),
            dependency_sample_limit: DEFAULT_DEPENDENCY_SAMPLE_LIMIT,
            log_format: LogFormat::default(),
        }
    }
}
