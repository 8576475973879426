//! Connection-related data models.
//!
//! This module defines the plaintext connection parameters the gateway is called
//! with, the fingerprint that keys the pool registry, and the encrypted profile
//! shape the external store persists.

use crate::crypto::{CredentialCipher, EncryptedSecret};
use crate::error::GatewayResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Supported database drivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Includes MariaDB
    #[default]
    MySql,
    Postgres,
    /// `database` is a file path
    Sqlite,
}

impl Driver {
    /// Get the display name for this driver.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// URL-style scheme used in fingerprints and logs.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Get the default port for this driver.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }

    /// Quote an identifier for this driver's dialect.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", name.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown driver '{}'", other)),
        }
    }
}

/// Plaintext parameters for one remote database target.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(default)]
    pub driver: Driver,
    pub host: String,
    /// Falls back to the configured default, then the driver default.
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    /// Contains sensitive data - never log
    pub password: String,
    pub database: String,
}

impl ConnectionParams {
    /// Create MySQL parameters.
    pub fn mysql(
        host: impl Into<String>,
        port: Option<u16>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            driver: Driver::MySql,
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    /// Create parameters for a SQLite database file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: Driver::Sqlite,
            host: String::new(),
            port: None,
            username: String::new(),
            password: String::new(),
            database: path.into(),
        }
    }

    /// Set the driver.
    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Resolve the effective port.
    pub fn resolved_port(&self, default_port: Option<u16>) -> u16 {
        self.port
            .or(default_port)
            .or_else(|| self.driver.default_port())
            .unwrap_or(0)
    }

    /// Compute the pool registry key for these parameters.
    ///
    /// The password is only part of the key when `key_by_password` is set, and
    /// then only as a digest.
    pub fn fingerprint(
        &self,
        default_port: Option<u16>,
        key_by_password: bool,
    ) -> ConnectionFingerprint {
        let port = match self.driver {
            Driver::Sqlite => 0,
            _ => self.resolved_port(default_port),
        };
        let credential_digest =
            key_by_password.then(|| hex::encode(Sha256::digest(self.password.as_bytes())));

        ConnectionFingerprint {
            driver: self.driver,
            host: self.host.clone(),
            port,
            username: self.username.clone(),
            database: self.database.clone(),
            credential_digest,
        }
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Deterministic registry key for a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionFingerprint {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
    credential_digest: Option<String>,
}

impl std::fmt::Display for ConnectionFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.driver {
            Driver::Sqlite => write!(f, "sqlite:{}", self.database),
            _ => write!(
                f,
                "{}://{}@{}:{}/{}",
                self.driver.scheme(),
                self.username,
                self.host,
                self.port,
                self.database
            ),
        }
    }
}

/// A saved connection with its password encrypted at rest.
///
/// Persistence belongs to the profile store; the gateway only seals and opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub name: String,
    #[serde(default)]
    pub driver: Driver,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: EncryptedSecret,
    pub database: String,
    #[serde(default)]
    pub is_default: bool,
}

impl ConnectionProfile {
    /// Encrypt the password of `params` into a new profile.
    pub fn seal(
        name: impl Into<String>,
        params: &ConnectionParams,
        cipher: &CredentialCipher,
    ) -> GatewayResult<Self> {
        Ok(Self {
            name: name.into(),
            driver: params.driver,
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
            password: cipher.encrypt(&params.password)?,
            database: params.database.clone(),
            is_default: false,
        })
    }

    /// Decrypt the profile back into plaintext connection parameters.
    pub fn open(&self, cipher: &CredentialCipher) -> GatewayResult<ConnectionParams> {
        Ok(ConnectionParams {
            driver: self.driver,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: cipher.decrypt(&self.password)?,
            database: self.database.clone(),
        })
    }
}
