//! Execution history hand-off.
//!
//! The gateway does not store history. After an execution, an entry is handed
//! to a [`HistorySink`] on a detached task; the caller already has its result
//! and never learns whether the write succeeded. Failures are logged.

use crate::error::GatewayResult;
use crate::models::ExecutionResult;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Error type sinks report back; only ever logged.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// One recorded execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub database: String,
    pub sql: String,
    /// Prompt the SQL was generated from, empty for hand-written SQL
    #[serde(default)]
    pub natural_language: String,
    pub success: bool,
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Build an entry from the outcome of an execution.
    pub fn from_outcome(
        database: impl Into<String>,
        sql: impl Into<String>,
        outcome: &GatewayResult<ExecutionResult>,
    ) -> Self {
        let (success, row_count, error, execution_time_ms) = match outcome {
            Ok(result) => (
                result.success,
                result.row_count,
                result.error.clone(),
                result.execution_time_ms,
            ),
            Err(e) => (false, 0, Some(e.to_string()), 0),
        };

        Self {
            id: Uuid::new_v4(),
            database: database.into(),
            sql: sql.into(),
            natural_language: String::new(),
            success,
            row_count,
            error,
            execution_time_ms,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_natural_language(mut self, prompt: impl Into<String>) -> Self {
        self.natural_language = prompt.into();
        self
    }
}

/// External store that persists history entries.
pub trait HistorySink: Send + Sync {
    fn record(&self, entry: HistoryEntry) -> BoxFuture<'static, Result<(), SinkError>>;
}

/// Hands entries to a sink without waiting for the write.
#[derive(Clone)]
pub struct HistoryDispatcher {
    sink: Arc<dyn HistorySink>,
}

impl HistoryDispatcher {
    pub fn new(sink: Arc<dyn HistorySink>) -> Self {
        Self { sink }
    }

    /// Spawn the write and return immediately.
    ///
    /// The handle is only useful for tests and shutdown; dropping it does not
    /// cancel the write.
    pub fn dispatch(&self, entry: HistoryEntry) -> JoinHandle<()> {
        let id = entry.id;
        let write = self.sink.record(entry);

        tokio::spawn(async move {
            match write.await {
                Ok(()) => debug!(history_id = %id, "History entry recorded"),
                Err(e) => warn!(history_id = %id, error = %e, "Failed to record history entry"),
            }
        })
    }
}

impl std::fmt::Debug for HistoryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryDispatcher").finish_non_exhaustive()
    }
}

/// Process-local sink, handy for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl HistorySink for InMemoryHistory {
    fn record(&self, entry: HistoryEntry) -> BoxFuture<'static, Result<(), SinkError>> {
        let stored = self
            .entries
            .lock()
            .map(|mut entries| entries.push(entry))
            .map_err(|_| SinkError::from("history store lock poisoned"));
        Box::pin(async move { stored })
    }
}
