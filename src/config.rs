//! Configuration handling for the SQL gateway.
//!
//! [`GatewayConfig`] is what the library consumes; how it gets filled is up to
//! the embedding process. The `sql-gateway` binary builds one from CLI
//! arguments and environment variables via [`Config`].

use crate::error::{GatewayError, GatewayResult};
use crate::models::{ConnectionParams, Driver};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 10;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
/// Waiting for a free connection is not rejected; this only stops a caller
/// from hanging forever on a dead pool.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 60;

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum connections per pool (default: 10)
    pub max_connections: Option<u32>,
    /// Minimum connections kept open per pool (default: 0)
    pub min_connections: Option<u32>,
    /// Idle connection timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// How long a caller may wait for a free connection (default: one day)
    pub acquire_timeout_secs: Option<u64>,
    /// Ping connections before handing them out (default: true)
    pub test_before_acquire: Option<bool>,
    /// Close whole pools that stayed unused this long. Disabled when unset.
    pub eviction_idle_secs: Option<u64>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Idle period after which a whole pool is evicted, if enabled.
    pub fn eviction_idle(&self) -> Option<Duration> {
        self.eviction_idle_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min > self.max_connections_or_default() {
                return Err(format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    min,
                    self.max_connections_or_default()
                ));
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Settings consumed by [`Gateway`](crate::Gateway).
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Secret the credential key is derived from. Required.
    pub encryption_secret: Option<String>,
    /// Port used when a request omits one. Falls back to the driver default.
    #[serde(default)]
    pub default_port: Option<u16>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    /// Include a password digest in pool fingerprints.
    #[serde(default)]
    pub key_pools_by_password: bool,
    #[serde(default)]
    pub pool: PoolOptions,
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_close_timeout_secs() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_SECS
}

impl GatewayConfig {
    /// Create a configuration with defaults and the given secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            encryption_secret: Some(secret.into()),
            ..Self::default()
        }
    }

    /// Get the connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the pool close timeout as a Duration.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    /// Check everything except the secret, which the cipher validates.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.connect_timeout_secs == 0 {
            return Err(GatewayError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }
        self.pool.validate().map_err(GatewayError::configuration)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            encryption_secret: None,
            default_port: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
            key_pools_by_password: false,
            pool: PoolOptions::default(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field(
                "encryption_secret",
                &self.encryption_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("default_port", &self.default_port)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("close_timeout_secs", &self.close_timeout_secs)
            .field("key_pools_by_password", &self.key_pools_by_password)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Command line configuration for the `sql-gateway` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-gateway",
    about = "Run SQL against remote databases through a pooled, credential-safe gateway",
    version,
    author
)]
pub struct Config {
    /// Secret used to derive the credential encryption key
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Default port when a target omits one
    #[arg(long, env = "GATEWAY_DEFAULT_PORT")]
    pub default_port: Option<u16>,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "GATEWAY_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Maximum connections per pool
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        env = "GATEWAY_POOL_SIZE"
    )]
    pub pool_size: u32,

    /// Include a password digest in pool keys
    #[arg(long, env = "GATEWAY_KEY_POOLS_BY_PASSWORD")]
    pub key_pools_by_password: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "GATEWAY_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Encrypt a credential for storage
    Encrypt { plaintext: String },
    /// Decrypt a stored credential
    Decrypt { blob: String },
    /// Test that a target accepts the given credentials
    Test(TargetArgs),
    /// Execute one SQL statement
    Exec {
        #[command(flatten)]
        target: TargetArgs,
        sql: String,
    },
    /// List tables in the target database
    Tables(TargetArgs),
    /// Describe the columns of a table
    Describe {
        #[command(flatten)]
        target: TargetArgs,
        table: String,
    },
    /// List databases visible to the user
    Databases(TargetArgs),
    /// Show the first rows of a table
    Preview {
        #[command(flatten)]
        target: TargetArgs,
        table: String,
        #[arg(long)]
        limit: Option<u32>,
    },
}

/// Connection target arguments shared by subcommands.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Database driver (mysql, postgres, sqlite)
    #[arg(long, default_value = "mysql", env = "GATEWAY_DRIVER")]
    pub driver: Driver,

    #[arg(long, default_value = "localhost", env = "GATEWAY_HOST")]
    pub host: String,

    #[arg(long, env = "GATEWAY_PORT")]
    pub port: Option<u16>,

    #[arg(short, long, default_value = "", env = "GATEWAY_USER")]
    pub user: String,

    /// Plaintext password
    #[arg(long, env = "GATEWAY_PASSWORD", hide_env_values = true, conflicts_with = "password_blob")]
    pub password: Option<String>,

    /// Encrypted password as stored in a connection profile
    #[arg(long)]
    pub password_blob: Option<String>,

    /// Database name (file path for sqlite)
    #[arg(short, long, default_value = "", env = "GATEWAY_DATABASE")]
    pub database: String,
}

impl TargetArgs {
    /// Build connection parameters with an already-resolved password.
    pub fn to_params(&self, password: String) -> ConnectionParams {
        ConnectionParams {
            driver: self.driver,
            host: self.host.clone(),
            port: self.port,
            username: self.user.clone(),
            password,
            database: self.database.clone(),
        }
    }
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Convert into the library configuration.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            encryption_secret: self.encryption_key.clone(),
            default_port: self.default_port,
            connect_timeout_secs: self.connect_timeout,
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
            key_pools_by_password: self.key_pools_by_password,
            pool: PoolOptions {
                max_connections: Some(self.pool_size),
                ..PoolOptions::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(), 10);
        assert_eq!(opts.min_connections_or_default(), 0);
        assert_eq!(opts.idle_timeout_or_default(), Duration::from_secs(600));
        assert_eq!(
            opts.acquire_timeout_or_default(),
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)
        );
        assert!(opts.test_before_acquire_or_default());
        assert!(opts.eviction_idle().is_none());
    }

    #[test]
    fn test_pool_options_eviction_zero_disables() {
        let opts = PoolOptions {
            eviction_idle_secs: Some(0),
            ..PoolOptions::default()
        };
        assert!(opts.eviction_idle().is_none());
    }

    #[test]
    fn test_pool_options_validation() {
        let zero_max = PoolOptions {
            max_connections: Some(0),
            ..PoolOptions::default()
        };
        assert!(zero_max.validate().unwrap_err().contains("max_connections"));

        let min_exceeds = PoolOptions {
            max_connections: Some(5),
            min_connections: Some(10),
            ..PoolOptions::default()
        };
        assert!(min_exceeds.validate().unwrap_err().contains("cannot exceed"));

        assert!(PoolOptions::default().validate().is_ok());
    }

    #[test]
    fn test_gateway_config_defaults() {
        let config = GatewayConfig::with_secret("s");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.close_timeout(), Duration::from_secs(10));
        assert!(!config.key_pools_by_password);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gateway_config_debug_redacts_secret() {
        let shown = format!("{:?}", GatewayConfig::with_secret("top-secret"));
        assert!(!shown.contains("top-secret"));
    }

    #[test]
    fn test_gateway_config_deserializes_with_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"encryption_secret": "s", "pool": {"max_connections": 4}}"#)
                .unwrap();
        assert_eq!(config.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
        assert_eq!(config.pool.max_connections_or_default(), 4);
    }

    #[test]
    fn test_cli_parses_exec() {
        let config = Config::try_parse_from([
            "sql-gateway",
            "--encryption-key",
            "k",
            "exec",
            "--host",
            "db",
            "--user",
            "app",
            "--password",
            "pw",
            "--database",
            "sales",
            "SELECT 1",
        ])
        .unwrap();

        let gateway_config = config.gateway_config();
        assert_eq!(gateway_config.encryption_secret.as_deref(), Some("k"));
        assert_eq!(gateway_config.pool.max_connections, Some(DEFAULT_MAX_CONNECTIONS));

        match config.command {
            Command::Exec { target, sql } => {
                assert_eq!(sql, "SELECT 1");
                assert_eq!(target.driver, Driver::MySql);
                let params = target.to_params("pw".to_string());
                assert_eq!(params.database, "sales");
                assert_eq!(params.username, "app");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
