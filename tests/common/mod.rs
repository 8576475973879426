//! Shared fixtures for integration tests.

#![allow(dead_code)]

use sql_gateway::models::{ConnectionFingerprint, ConnectionParams};
use sql_gateway::{Gateway, GatewayConfig};
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Directory of SQLite files that lives as long as the test.
pub struct TestDatabases {
    dir: TempDir,
}

impl TestDatabases {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Create an empty database file and return parameters for it.
    pub fn create(&self, name: &str) -> ConnectionParams {
        let params = self.missing(name);
        std::fs::File::create(&params.database).unwrap();
        params
    }

    /// Parameters for a file that does not exist (yet).
    pub fn missing(&self, name: &str) -> ConnectionParams {
        let path = self.dir.path().join(name);
        ConnectionParams::sqlite(path.to_string_lossy())
    }
}

pub fn gateway() -> Gateway {
    Gateway::new(GatewayConfig::with_secret(TEST_SECRET)).unwrap()
}

pub fn gateway_with(configure: impl FnOnce(&mut GatewayConfig)) -> Gateway {
    let mut config = GatewayConfig::with_secret(TEST_SECRET);
    configure(&mut config);
    Gateway::new(config).unwrap()
}

/// Borrowed connections go back to the pool asynchronously; wait for it.
pub async fn wait_until_released(gateway: &Gateway, fingerprint: &ConnectionFingerprint) {
    for _ in 0..200 {
        match gateway.pool_stats(fingerprint).await {
            Some(stats) if stats.in_use() > 0 => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            _ => return,
        }
    }
    panic!("connections of {fingerprint} were never released");
}

/// Create `users` with five rows.
pub async fn seed_users(gateway: &Gateway, params: &ConnectionParams) {
    gateway
        .execute(
            params,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER DEFAULT 1, note TEXT)",
        )
        .await
        .unwrap();
    gateway
        .execute(
            params,
            "INSERT INTO users (id, name, note) VALUES (1, 'ada', NULL), (2, 'bob', 'x'), (3, 'cy', NULL), (4, 'di', NULL), (5, 'ed', 'y')",
        )
        .await
        .unwrap();
}
