//! Error types for the SQL gateway.
//!
//! Every gateway operation returns [`GatewayError`]. Driver errors are classified
//! by the operation that produced them rather than by their `sqlx` variant, so a
//! caller can tell a failed credential test from a failed statement without
//! inspecting driver internals.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Fatal at startup; the gateway refuses to run without it.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Deliberately vague: cipher internals are never surfaced.
    #[error("Cannot access credential: {reason}")]
    Decryption { reason: String },

    #[error("Connection test failed: {message}")]
    Connect { message: String },

    #[error("Failed to create pool for {fingerprint}: {message}")]
    PoolCreation {
        fingerprint: String,
        message: String,
    },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "42S02" for unknown table
        sql_state: Option<String>,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Failed to close pool {fingerprint}: {message}")]
    PoolClose {
        fingerprint: String,
        message: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl GatewayError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a decryption error.
    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    /// Create a connection test error from a driver error.
    pub fn connect(err: &sqlx::Error) -> Self {
        Self::Connect {
            message: driver_message(err),
        }
    }

    /// Create a pool creation error.
    pub fn pool_creation(fingerprint: impl ToString, message: impl Into<String>) -> Self {
        Self::PoolCreation {
            fingerprint: fingerprint.to_string(),
            message: message.into(),
        }
    }

    /// Create a query error from a driver error, keeping the SQL state if the
    /// server reported one.
    pub fn query(err: &sqlx::Error) -> Self {
        Self::Query {
            message: driver_message(err),
            sql_state: sql_state(err),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a pool close error.
    pub fn pool_close(fingerprint: impl ToString, message: impl Into<String>) -> Self {
        Self::PoolClose {
            fingerprint: fingerprint.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// SQL state code reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Hint for callers that implement their own retry policy.
    ///
    /// The gateway itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::PoolCreation { .. })
    }
}

/// Render a driver error as a caller-facing message.
///
/// Server-side errors use the server's own message; everything else falls back
/// to the driver's display form.
pub(crate) fn driver_message(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        sqlx::Error::PoolTimedOut => "Timed out waiting for a pooled connection".to_string(),
        sqlx::Error::PoolClosed => "Connection pool is closed".to_string(),
        sqlx::Error::Io(io_err) => format!("I/O error: {}", io_err),
        other => other.to_string(),
    }
}

fn sql_state(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
        _ => None,
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
