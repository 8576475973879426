//! Query-related data models.
//!
//! This module defines the normalized result of a single SQL execution.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default row limit for table previews.
pub const DEFAULT_PREVIEW_LIMIT: u32 = 100;

/// Maximum allowed preview limit.
pub const MAX_PREVIEW_LIMIT: u32 = 10000;

/// One result row: column name to decoded value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Normalized outcome of one SQL execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Empty for statements that do not return rows.
    pub rows: Vec<Row>,
    /// Column names of the returned rows, empty when no rows came back.
    pub columns: Vec<String>,
    /// Rows returned, or rows affected for mutations.
    pub row_count: u64,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Build a result for a statement that returned rows.
    pub fn from_rows(rows: Vec<Row>, execution_time_ms: u64) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            success: true,
            row_count: rows.len() as u64,
            rows,
            columns,
            execution_time_ms,
            error: None,
        }
    }

    /// Build a result for a statement that only reported affected rows.
    pub fn from_affected(rows_affected: u64, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: rows_affected,
            execution_time_ms,
            error: None,
        }
    }
}
