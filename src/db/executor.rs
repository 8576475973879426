//! Query execution engine.
//!
//! One call runs one caller-supplied statement on one pooled connection:
//! acquire, run, shape the result, release. The statement is sent as-is with
//! no bind arguments, splitting or transaction wrapping.
//!
//! The borrowed connection is a scoped guard, so it goes back to its pool on
//! every exit path, driver errors included.

use crate::db::pool::{DbPool, PoolManager};
use crate::db::types::RowToJson;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    ConnectionParams, DEFAULT_PREVIEW_LIMIT, ExecutionResult, MAX_PREVIEW_LIMIT, Row,
};
use futures_util::TryStreamExt;
use sqlx::{Column, Either};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything a statement produced on the wire.
struct StatementOutcome {
    rows: Vec<Row>,
    /// Result columns of a statement that returned no rows, if it has any.
    empty_result_columns: Option<Vec<String>>,
    rows_affected: u64,
    elapsed: Duration,
}

impl StatementOutcome {
    /// Row-returning statements report their row count, everything else the
    /// affected-row count.
    ///
    /// SQLite repeats the change count of the last mutation on the connection
    /// for statements that change nothing, so a row-returning statement never
    /// falls back to `rows_affected`, even when it matched no rows.
    fn into_result(self) -> ExecutionResult {
        let elapsed_ms = self.elapsed.as_millis() as u64;
        if !self.rows.is_empty() {
            return ExecutionResult::from_rows(self.rows, elapsed_ms);
        }
        match self.empty_result_columns {
            Some(columns) => ExecutionResult {
                columns,
                ..ExecutionResult::from_rows(Vec::new(), elapsed_ms)
            },
            None => ExecutionResult::from_affected(self.rows_affected, elapsed_ms),
        }
    }
}

/// Column names a statement would return, or `None` for statements without a
/// result set. Statements the driver cannot describe count as row-less.
async fn result_columns<DB>(
    conn: &mut sqlx::pool::PoolConnection<DB>,
    sql: &str,
) -> Option<Vec<String>>
where
    DB: sqlx::Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
{
    match sqlx::Executor::describe(&mut **conn, sql).await {
        Ok(described) if !described.columns().is_empty() => Some(
            described
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect(),
        ),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Statement could not be described");
            None
        }
    }
}

/// Acquire a connection from `$pool`, stream `$sql` through it and collect
/// rows and affected counts. Evaluates to `Result<StatementOutcome, sqlx::Error>`.
macro_rules! run_statement {
    ($pool:expr, $sql:expr) => {
        async {
            let mut conn = $pool.acquire().await?;
            let started = Instant::now();
            let mut rows = Vec::new();
            let mut rows_affected = 0u64;

            {
                let mut stream = sqlx::raw_sql($sql).fetch_many(&mut *conn);
                while let Some(step) = stream.try_next().await? {
                    match step {
                        Either::Left(done) => rows_affected += done.rows_affected(),
                        Either::Right(row) => rows.push(row.to_json_row()),
                    }
                }
            }
            let elapsed = started.elapsed();

            // No rows tells us nothing about the shape; ask the driver.
            let empty_result_columns = if rows.is_empty() {
                result_columns(&mut conn, $sql).await
            } else {
                None
            };

            Ok::<_, sqlx::Error>(StatementOutcome {
                rows,
                empty_result_columns,
                rows_affected,
                elapsed,
            })
        }
    };
}

/// Executes SQL against pooled connections.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pools: Arc<PoolManager>,
}

impl QueryExecutor {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }

    /// Execute one statement for `params`, creating the pool on first use.
    ///
    /// Driver failures are returned as [`GatewayError::Query`]; nothing is
    /// retried.
    pub async fn execute(
        &self,
        params: &ConnectionParams,
        sql: &str,
    ) -> GatewayResult<ExecutionResult> {
        let pool = self.pools.get_or_create_pool(params).await?;
        let fingerprint = self.pools.fingerprint(params);

        debug!(fingerprint = %fingerprint, sql_len = sql.len(), "Executing statement");

        match Self::run_on_pool(&pool, sql).await {
            Ok(result) => {
                debug!(
                    fingerprint = %fingerprint,
                    rows = result.row_count,
                    elapsed_ms = result.execution_time_ms,
                    "Statement completed"
                );
                Ok(result)
            }
            Err(e) => {
                let err = GatewayError::query(&e);
                warn!(fingerprint = %fingerprint, error = %err, "Statement failed");
                Err(err)
            }
        }
    }

    /// Run a statement on an already resolved pool.
    pub async fn run_on_pool(pool: &DbPool, sql: &str) -> Result<ExecutionResult, sqlx::Error> {
        let outcome = impl_db_dispatch!(pool, {
            MySql(p) => run_statement!(p, sql).await,
            Postgres(p) => run_statement!(p, sql).await,
            Sqlite(p) => run_statement!(p, sql).await,
        })?;
        Ok(outcome.into_result())
    }

    /// Return the first rows of `table`.
    ///
    /// `limit` defaults to 100 and is clamped to `[1, 10000]`.
    pub async fn preview_table(
        &self,
        params: &ConnectionParams,
        table: &str,
        limit: Option<u32>,
    ) -> GatewayResult<ExecutionResult> {
        let sql = preview_sql(params, table, limit)?;
        self.execute(params, &sql).await
    }
}

fn preview_sql(params: &ConnectionParams, table: &str, limit: Option<u32>) -> GatewayResult<String> {
    if table.trim().is_empty() {
        return Err(GatewayError::invalid_input("Table name cannot be empty"));
    }
    let limit = limit
        .map(|l| l.clamp(1, MAX_PREVIEW_LIMIT))
        .unwrap_or(DEFAULT_PREVIEW_LIMIT);

    Ok(format!(
        "SELECT * FROM {} LIMIT {}",
        params.driver.quote_identifier(table),
        limit
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Driver;
    use serde_json::json;

    #[test]
    fn test_outcome_with_rows_counts_rows() {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(1));
        let outcome = StatementOutcome {
            rows: vec![row.clone(), row],
            empty_result_columns: None,
            rows_affected: 0,
            elapsed: Duration::from_millis(12),
        };

        let result = outcome.into_result();
        assert!(result.success);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns, vec!["id".to_string()]);
        assert_eq!(result.execution_time_ms, 12);
    }

    #[test]
    fn test_outcome_without_rows_uses_affected() {
        let outcome = StatementOutcome {
            rows: Vec::new(),
            empty_result_columns: None,
            rows_affected: 3,
            elapsed: Duration::from_millis(1),
        };

        let result = outcome.into_result();
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 3);
    }

    #[test]
    fn test_outcome_with_columns_but_no_rows_ignores_affected() {
        let outcome = StatementOutcome {
            rows: Vec::new(),
            empty_result_columns: Some(vec!["id".to_string()]),
            rows_affected: 5,
            elapsed: Duration::from_millis(1),
        };

        let result = outcome.into_result();
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
        assert_eq!(result.columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_preview_sql_quotes_and_clamps() {
        let mysql = ConnectionParams::mysql("h", None, "u", "p", "d");
        assert_eq!(
            preview_sql(&mysql, "orders", None).unwrap(),
            "SELECT * FROM `orders` LIMIT 100"
        );
        assert_eq!(
            preview_sql(&mysql, "orders", Some(0)).unwrap(),
            "SELECT * FROM `orders` LIMIT 1"
        );

        let pg = mysql.clone().with_driver(Driver::Postgres);
        assert_eq!(
            preview_sql(&pg, "big", Some(50_000)).unwrap(),
            "SELECT * FROM \"big\" LIMIT 10000"
        );
    }

    #[test]
    fn test_preview_sql_rejects_empty_table() {
        let params = ConnectionParams::sqlite("/tmp/x.db");
        let err = preview_sql(&params, "  ", None).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }
}
