//! One-shot connection checks outside the pool registry.
//!
//! Every call opens its own connection with a bounded connect timeout and
//! closes it before returning, whatever the outcome. No pool is registered.

use crate::db::pool::{mysql_options, postgres_options, sqlite_options};
use crate::db::schema;
use crate::error::{GatewayError, GatewayResult, driver_message};
use crate::models::{ConnectionParams, Driver};
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

enum OneShotConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl OneShotConnection {
    async fn ping(&mut self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySql(conn) => conn.ping().await,
            Self::Postgres(conn) => conn.ping().await,
            Self::Sqlite(conn) => conn.ping().await,
        }
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySql(conn) => conn.close().await,
            Self::Postgres(conn) => conn.close().await,
            Self::Sqlite(conn) => conn.close().await,
        }
    }
}

/// Counts a tester connection as open for as long as it lives.
struct OpenConnectionGuard(Arc<AtomicUsize>);

impl OpenConnectionGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Validates credentials with a connect, ping, disconnect cycle.
#[derive(Debug, Clone)]
pub struct ConnectionTester {
    default_port: Option<u16>,
    connect_timeout: Duration,
    open_connections: Arc<AtomicUsize>,
}

impl ConnectionTester {
    pub fn new(default_port: Option<u16>, connect_timeout: Duration) -> Self {
        Self {
            default_port,
            connect_timeout,
            open_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connect, ping and disconnect.
    ///
    /// Every failure (timeout, authentication, unknown host or database) is
    /// reported as [`GatewayError::Connect`] carrying the driver's message.
    pub async fn test(&self, params: &ConnectionParams) -> GatewayResult<()> {
        let (mut conn, _open) = self.connect(params).await?;

        let ping = conn.ping().await;
        self.close(conn).await;

        match ping {
            Ok(()) => {
                info!(driver = %params.driver, host = %params.host, "Connection test succeeded");
                Ok(())
            }
            Err(e) => {
                warn!(driver = %params.driver, host = %params.host, error = %e, "Ping failed");
                Err(GatewayError::connect(&e))
            }
        }
    }

    /// List databases visible to the user.
    ///
    /// Runs on a one-shot connection, so `params.database` may be empty for
    /// MySQL and PostgreSQL.
    pub async fn list_databases(&self, params: &ConnectionParams) -> GatewayResult<Vec<String>> {
        let (mut conn, _open) = self.connect(params).await?;

        let listed = match &mut conn {
            OneShotConnection::MySql(c) => schema::mysql::list_databases(&mut *c).await,
            OneShotConnection::Postgres(c) => schema::postgres::list_databases(&mut *c).await,
            OneShotConnection::Sqlite(c) => schema::sqlite::list_databases(&mut *c).await,
        };
        self.close(conn).await;

        let databases = listed
            .map_err(|e| GatewayError::schema(driver_message(&e), params.host.clone()))?;
        debug!(count = databases.len(), "Listed databases");
        Ok(databases)
    }

    /// Number of tester connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> GatewayResult<(OneShotConnection, OpenConnectionGuard)> {
        debug!(driver = %params.driver, host = %params.host, "Opening test connection");

        let connecting = async {
            match params.driver {
                Driver::MySql => {
                    MySqlConnection::connect_with(&mysql_options(params, self.default_port))
                        .await
                        .map(OneShotConnection::MySql)
                }
                Driver::Postgres => {
                    PgConnection::connect_with(&postgres_options(params, self.default_port))
                        .await
                        .map(OneShotConnection::Postgres)
                }
                Driver::Sqlite => SqliteConnection::connect_with(&sqlite_options(params))
                    .await
                    .map(OneShotConnection::Sqlite),
            }
        };

        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(conn)) => Ok((conn, OpenConnectionGuard::new(&self.open_connections))),
            Ok(Err(e)) => {
                warn!(driver = %params.driver, host = %params.host, error = %e, "Connect failed");
                Err(GatewayError::connect(&e))
            }
            Err(_) => {
                warn!(driver = %params.driver, host = %params.host, "Connect timed out");
                Err(GatewayError::Connect {
                    message: format!(
                        "connect timed out after {}s",
                        self.connect_timeout.as_secs()
                    ),
                })
            }
        }
    }

    async fn close(&self, conn: OneShotConnection) {
        // The socket is gone either way once `conn` is consumed.
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Test connection did not close gracefully");
        }
    }
}
