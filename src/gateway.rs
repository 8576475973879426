//! The gateway context.
//!
//! [`Gateway`] owns the derived credential key and the pool registry. It is
//! constructed explicitly and passed to request handlers, so independent
//! instances never share state.

use crate::config::GatewayConfig;
use crate::crypto::{CredentialCipher, EncryptedSecret};
use crate::db::{ConnectionTester, PoolManager, PoolStats, QueryExecutor, SchemaInspector};
use crate::error::GatewayResult;
use crate::history::{HistoryDispatcher, HistoryEntry};
use crate::models::{
    ColumnDescriptor, ConnectionFingerprint, ConnectionParams, ConnectionProfile, ExecutionResult,
};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    cipher: CredentialCipher,
    pools: Arc<PoolManager>,
    executor: QueryExecutor,
    inspector: SchemaInspector,
    tester: ConnectionTester,
    history: Option<HistoryDispatcher>,
}

impl Gateway {
    /// Build a gateway from configuration.
    ///
    /// Fails with a configuration error when the encryption secret is missing
    /// or the settings are invalid. Spawns the eviction task when enabled, so
    /// call this inside a tokio runtime in that case.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let cipher = CredentialCipher::from_secret(config.encryption_secret.as_deref())?;

        let pools = PoolManager::new(config.clone());
        let tester = ConnectionTester::new(config.default_port, config.connect_timeout());

        info!(
            max_connections = config.pool.max_connections_or_default(),
            connect_timeout_secs = config.connect_timeout_secs,
            key_pools_by_password = config.key_pools_by_password,
            "Gateway initialized"
        );

        Ok(Self {
            executor: QueryExecutor::new(Arc::clone(&pools)),
            inspector: SchemaInspector::new(Arc::clone(&pools)),
            tester,
            pools,
            cipher,
            config,
            history: None,
        })
    }

    /// Hand every execution outcome to `dispatcher`.
    pub fn with_history(mut self, dispatcher: HistoryDispatcher) -> Self {
        self.history = Some(dispatcher);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    /// Encrypt a credential for storage.
    pub fn encrypt(&self, plaintext: &str) -> GatewayResult<EncryptedSecret> {
        self.cipher.encrypt(plaintext)
    }

    /// Decrypt a stored credential.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> GatewayResult<String> {
        self.cipher.decrypt(secret)
    }

    /// Check credentials with a one-shot connection. Registers no pool.
    pub async fn test_connection(&self, params: &ConnectionParams) -> GatewayResult<()> {
        self.tester.test(params).await
    }

    /// Execute one SQL statement on the pool for `params`.
    pub async fn execute(
        &self,
        params: &ConnectionParams,
        sql: &str,
    ) -> GatewayResult<ExecutionResult> {
        let outcome = self.executor.execute(params, sql).await;
        self.record(params, sql, &outcome);
        outcome
    }

    /// Decrypt a stored profile, then execute against it.
    pub async fn execute_profile(
        &self,
        profile: &ConnectionProfile,
        sql: &str,
    ) -> GatewayResult<ExecutionResult> {
        let params = profile.open(&self.cipher)?;
        self.execute(&params, sql).await
    }

    pub async fn list_tables(&self, params: &ConnectionParams) -> GatewayResult<Vec<String>> {
        self.inspector.list_tables(params).await
    }

    pub async fn describe_table(
        &self,
        params: &ConnectionParams,
        table: &str,
    ) -> GatewayResult<Vec<ColumnDescriptor>> {
        self.inspector.describe_table(params, table).await
    }

    /// List databases visible to the user over a one-shot connection.
    pub async fn list_databases(&self, params: &ConnectionParams) -> GatewayResult<Vec<String>> {
        self.tester.list_databases(params).await
    }

    /// First `limit` rows of `table` (default 100, at most 10000).
    pub async fn preview_table(
        &self,
        params: &ConnectionParams,
        table: &str,
        limit: Option<u32>,
    ) -> GatewayResult<ExecutionResult> {
        self.executor.preview_table(params, table, limit).await
    }

    /// Fingerprint `params` the way the pool registry keys them.
    pub fn fingerprint(&self, params: &ConnectionParams) -> ConnectionFingerprint {
        self.pools.fingerprint(params)
    }

    pub async fn close_pool(&self, fingerprint: &ConnectionFingerprint) -> GatewayResult<()> {
        self.pools.close_pool(fingerprint).await
    }

    /// Close every pool. Intended for process shutdown.
    pub async fn close_all(&self) -> GatewayResult<()> {
        self.pools.close_all().await
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.pool_count().await
    }

    pub fn pools_created(&self) -> u64 {
        self.pools.pools_created()
    }

    pub async fn pool_stats(&self, fingerprint: &ConnectionFingerprint) -> Option<PoolStats> {
        self.pools.stats(fingerprint).await
    }

    /// Tester connections currently open.
    pub fn open_test_connections(&self) -> usize {
        self.tester.open_connections()
    }

    /// Shared pool registry, for embedding processes that drive it directly.
    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    fn record(&self, params: &ConnectionParams, sql: &str, outcome: &GatewayResult<ExecutionResult>) {
        if let Some(history) = &self.history {
            history.dispatch(HistoryEntry::from_outcome(params.database.clone(), sql, outcome));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    #[test]
    fn test_missing_secret_refuses_to_start() {
        let err = Gateway::new(GatewayConfig::default()).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_pool_options_refuse_to_start() {
        let mut config = GatewayConfig::with_secret("s");
        config.pool.max_connections = Some(0);
        assert!(matches!(
            Gateway::new(config).unwrap_err(),
            GatewayError::Configuration { .. }
        ));
    }

    #[tokio::test]
    async fn test_independent_instances() {
        let a = Gateway::new(GatewayConfig::with_secret("one")).unwrap();
        let b = Gateway::new(GatewayConfig::with_secret("two")).unwrap();

        let blob = a.encrypt("pw").unwrap();
        assert_eq!(a.decrypt(&blob).unwrap(), "pw");
        assert!(b.decrypt(&blob).map(|p| p != "pw").unwrap_or(true));
        assert_eq!(a.pool_count().await, 0);
    }
}
