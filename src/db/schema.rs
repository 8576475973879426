//! Schema introspection.
//!
//! Lists tables and describes columns through the same pooled connections the
//! executor uses. SQL lives in the `queries` submodule per driver; the driver
//! submodules map result rows into [`ColumnDescriptor`]s.
//!
//! Identifiers that have to be spliced into metadata statements are quoted
//! for the target dialect. This is quoting, not validation.

use crate::db::pool::{DbPool, PoolManager};
use crate::error::{GatewayError, GatewayResult, driver_message};
use crate::models::{ColumnDescriptor, ConnectionParams};
use std::sync::Arc;
use tracing::debug;

/// Schema inspector backed by the pool registry.
#[derive(Debug, Clone)]
pub struct SchemaInspector {
    pools: Arc<PoolManager>,
}

impl SchemaInspector {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }

    /// List table names in the target database.
    pub async fn list_tables(&self, params: &ConnectionParams) -> GatewayResult<Vec<String>> {
        let pool = self.pools.get_or_create_pool(params).await?;

        let tables = match &pool {
            DbPool::MySql(p) => mysql::list_tables(p).await,
            DbPool::Postgres(p) => postgres::list_tables(p).await,
            DbPool::Sqlite(p) => sqlite::list_tables(p).await,
        }
        .map_err(|e| GatewayError::schema(driver_message(&e), params.database.clone()))?;

        debug!(
            fingerprint = %self.pools.fingerprint(params),
            count = tables.len(),
            "Listed tables"
        );
        Ok(tables)
    }

    /// Describe the columns of `table`.
    pub async fn describe_table(
        &self,
        params: &ConnectionParams,
        table: &str,
    ) -> GatewayResult<Vec<ColumnDescriptor>> {
        if table.trim().is_empty() {
            return Err(GatewayError::invalid_input("Table name cannot be empty"));
        }

        let pool = self.pools.get_or_create_pool(params).await?;

        let columns = match &pool {
            DbPool::MySql(p) => mysql::describe_table(p, table).await,
            DbPool::Postgres(p) => postgres::describe_table(p, table).await,
            DbPool::Sqlite(p) => sqlite::describe_table(p, table).await,
        }
        .map_err(|e| GatewayError::schema(driver_message(&e), table))?;

        // MySQL rejects unknown tables itself; the others just return nothing.
        if columns.is_empty() {
            return Err(GatewayError::schema(
                format!("Table '{}' not found", table),
                table,
            ));
        }

        debug!(table = %table, count = columns.len(), "Described table");
        Ok(columns)
    }
}

/// SQL queries organized by driver.
pub(crate) mod queries {
    pub mod postgres {
        pub const LIST_DATABASES: &str = r#"
            SELECT datname::text
            FROM pg_database
            WHERE datistemplate = false AND datallowconn
            ORDER BY datname
        "#;

        pub const LIST_TABLES: &str = r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema()
              AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                c.column_name::text AS name,
                c.data_type::text AS data_type,
                c.is_nullable::text AS is_nullable,
                c.column_default::text AS column_default,
                COALESCE((
                    SELECT CASE tc.constraint_type
                        WHEN 'PRIMARY KEY' THEN 'PRI'
                        WHEN 'UNIQUE' THEN 'UNI'
                        ELSE 'MUL'
                    END
                    FROM information_schema.key_column_usage k
                    JOIN information_schema.table_constraints tc
                        ON tc.constraint_name = k.constraint_name
                       AND tc.table_schema = k.table_schema
                       AND tc.table_name = k.table_name
                    WHERE k.table_schema = c.table_schema
                      AND k.table_name = c.table_name
                      AND k.column_name = c.column_name
                    ORDER BY CASE tc.constraint_type
                        WHEN 'PRIMARY KEY' THEN 0
                        WHEN 'UNIQUE' THEN 1
                        ELSE 2
                    END
                    LIMIT 1
                ), '') AS key_role,
                CASE
                    WHEN c.is_identity = 'YES' THEN 'identity'
                    WHEN c.column_default LIKE 'nextval(%' THEN 'auto_increment'
                    ELSE ''
                END AS extra
            FROM information_schema.columns c
            WHERE c.table_schema = current_schema() AND c.table_name = $1
            ORDER BY c.ordinal_position
        "#;
    }

    pub mod mysql {
        pub const LIST_DATABASES: &str = "SHOW DATABASES";
        pub const LIST_TABLES: &str = "SHOW TABLES";
        /// Same result shape as `DESCRIBE`; takes a quoted table name.
        pub const DESCRIBE_PREFIX: &str = "SHOW COLUMNS FROM";
    }

    pub mod sqlite {
        pub const LIST_DATABASES: &str = "PRAGMA database_list";
        pub const LIST_TABLES: &str = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY name
        "#;
    }
}

pub(crate) mod postgres {
    use super::*;
    use crate::models::parse_nullable;
    use sqlx::{PgPool, Postgres, Row};

    pub async fn list_databases<'c, E>(executor: E) -> Result<Vec<String>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let rows = sqlx::query(queries::postgres::LIST_DATABASES)
            .fetch_all(executor)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .collect())
    }

    pub async fn list_tables(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .collect())
    }

    pub async fn describe_table(
        pool: &PgPool,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                let nullable: String = row.try_get("is_nullable")?;
                Ok(ColumnDescriptor::new(
                    row.try_get::<String, _>("name")?,
                    row.try_get::<String, _>("data_type")?,
                    parse_nullable(&nullable),
                )
                .with_key(row.try_get::<String, _>("key_role")?)
                .with_default(row.try_get("column_default")?)
                .with_extra(row.try_get::<String, _>("extra")?))
            })
            .collect()
    }
}

pub(crate) mod mysql {
    use super::*;
    use crate::models::{Driver, parse_nullable};
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySql, MySqlPool, Row};

    /// MySQL may return VARBINARY instead of VARCHAR depending on charset
    /// configuration, so fall back to raw bytes.
    fn get_string(row: &MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    fn get_string_by_index(row: &MySqlRow, index: usize) -> Option<String> {
        row.try_get::<String, _>(index).ok().or_else(|| {
            row.try_get::<Vec<u8>, _>(index)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    pub async fn list_databases<'c, E>(executor: E) -> Result<Vec<String>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        let rows = sqlx::query(queries::mysql::LIST_DATABASES)
            .fetch_all(executor)
            .await?;
        // SHOW DATABASES returns a single column "Database"
        Ok(rows.iter().filter_map(|row| get_string_by_index(row, 0)).collect())
    }

    pub async fn list_tables(pool: &MySqlPool) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        // Column is named "Tables_in_<db>", so read it by position
        Ok(rows.iter().filter_map(|row| get_string_by_index(row, 0)).collect())
    }

    pub async fn describe_table(
        pool: &MySqlPool,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, sqlx::Error> {
        let sql = format!(
            "{} {}",
            queries::mysql::DESCRIBE_PREFIX,
            Driver::MySql.quote_identifier(table)
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(
                    get_string(row, "Field"),
                    get_string(row, "Type"),
                    parse_nullable(&get_string(row, "Null")),
                )
                .with_key(get_string(row, "Key"))
                .with_default(get_optional_string(row, "Default"))
                .with_extra(get_string(row, "Extra"))
            })
            .collect())
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::models::Driver;
    use sqlx::{Row, Sqlite, SqlitePool};

    pub async fn list_databases<'c, E>(executor: E) -> Result<Vec<String>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let rows = sqlx::query(queries::sqlite::LIST_DATABASES)
            .fetch_all(executor)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect())
    }

    pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(queries::sqlite::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect())
    }

    pub async fn describe_table(
        pool: &SqlitePool,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, sqlx::Error> {
        let sql = format!(
            "PRAGMA table_info({})",
            Driver::Sqlite.quote_identifier(table)
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;

        rows.iter()
            .map(|row| {
                let notnull: i64 = row.try_get("notnull")?;
                let pk: i64 = row.try_get("pk")?;
                let key = if pk > 0 { "PRI" } else { "" };

                Ok(ColumnDescriptor::new(
                    row.try_get::<String, _>("name")?,
                    row.try_get::<String, _>("type")?,
                    notnull == 0,
                )
                .with_key(key)
                .with_default(row.try_get::<Option<String>, _>("dflt_value").ok().flatten()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::models::Driver;

    #[test]
    fn test_mysql_describe_statement_quotes_table() {
        let sql = format!(
            "{} {}",
            queries::mysql::DESCRIBE_PREFIX,
            Driver::MySql.quote_identifier("user`s")
        );
        assert_eq!(sql, "SHOW COLUMNS FROM `user``s`");
    }

    #[tokio::test]
    async fn test_describe_rejects_empty_table_without_connecting() {
        let pools = PoolManager::new(GatewayConfig::with_secret("test"));
        let inspector = SchemaInspector::new(Arc::clone(&pools));
        let params = ConnectionParams::sqlite("/nonexistent/never.db");

        let err = inspector.describe_table(&params, "").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
        assert_eq!(pools.pools_created(), 0);
    }
}
