//! Integration tests for statement execution.
//!
//! Tests verify that:
//! - Mutations report affected rows and no row set
//! - Queries report their rows and matching row count
//! - Connections go back to the pool after success and after failure
//! - Previews, profiles and history hand-off work end to end

mod common;

use common::{TestDatabases, gateway, seed_users, wait_until_released};
use serde_json::json;
use sql_gateway::GatewayError;
use sql_gateway::EncryptedSecret;
use sql_gateway::history::{HistoryDispatcher, InMemoryHistory};
use sql_gateway::models::ConnectionProfile;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_update_returns_affected_count_and_no_rows() {
    let dbs = TestDatabases::new();
    let params = dbs.create("shape.db");
    let gateway = gateway();
    seed_users(&gateway, &params).await;

    let result = gateway
        .execute(&params, "UPDATE users SET active = 0 WHERE id <= 3")
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.rows.is_empty());
    assert!(result.columns.is_empty());
    assert_eq!(result.row_count, 3);
}

#[tokio::test]
async fn test_select_returns_rows_and_matching_count() {
    let dbs = TestDatabases::new();
    let params = dbs.create("select.db");
    let gateway = gateway();
    seed_users(&gateway, &params).await;

    let result = gateway
        .execute(&params, "SELECT id, name, note FROM users ORDER BY id")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.rows.len(), 5);
    assert_eq!(result.row_count, 5);
    assert_eq!(result.columns, vec!["id", "name", "note"]);
    assert_eq!(result.rows[0]["id"], json!(1));
    assert_eq!(result.rows[0]["name"], json!("ada"));
    assert_eq!(result.rows[0]["note"], json!(null));
    assert_eq!(result.rows[1]["note"], json!("x"));
}

#[tokio::test]
async fn test_empty_select_after_update_counts_zero_rows() {
    let dbs = TestDatabases::new();
    let params = dbs.create("empty_after_update.db");
    let gateway = gateway();
    seed_users(&gateway, &params).await;

    let updated = gateway
        .execute(&params, "UPDATE users SET active = 0 WHERE id <= 3")
        .await
        .unwrap();
    assert_eq!(updated.row_count, 3);

    let result = gateway
        .execute(&params, "SELECT id FROM users WHERE id > 100")
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.rows.is_empty());
    assert_eq!(result.row_count, 0);
    assert_eq!(result.columns, vec!["id"]);
}

#[tokio::test]
async fn test_empty_select_on_fresh_pool_counts_zero_rows() {
    let dbs = TestDatabases::new();
    let params = dbs.create("empty_fresh.db");
    let gateway = gateway();

    let result = gateway
        .execute(&params, "SELECT name FROM sqlite_master WHERE type = 'view'")
        .await
        .unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(result.row_count, 0);
    assert_eq!(gateway.pools_created(), 1);
}

#[tokio::test]
async fn test_delete_matching_nothing_reports_zero_affected() {
    let dbs = TestDatabases::new();
    let params = dbs.create("delete_none.db");
    let gateway = gateway();
    seed_users(&gateway, &params).await;

    let result = gateway
        .execute(&params, "DELETE FROM users WHERE id > 100")
        .await
        .unwrap();
    assert!(result.rows.is_empty());
    assert!(result.columns.is_empty());
    assert_eq!(result.row_count, 0);
}

#[tokio::test]
async fn test_expression_columns_are_decoded() {
    let dbs = TestDatabases::new();
    let params = dbs.create("expr.db");
    let gateway = gateway();

    let result = gateway
        .execute(&params, "SELECT 1 + 1 AS two, 2.5 AS half, 'hi' AS greeting, x'0102' AS raw")
        .await
        .unwrap();

    let row = &result.rows[0];
    assert_eq!(row["two"], json!(2));
    assert_eq!(row["half"], json!(2.5));
    assert_eq!(row["greeting"], json!("hi"));
    assert_eq!(row["raw"], json!("AQI="));
}

#[tokio::test]
async fn test_connection_released_after_success() {
    let dbs = TestDatabases::new();
    let params = dbs.create("release_ok.db");
    let gateway = gateway();
    let fingerprint = gateway.fingerprint(&params);

    gateway.execute(&params, "SELECT 1").await.unwrap();
    wait_until_released(&gateway, &fingerprint).await;
    let before = gateway.pool_stats(&fingerprint).await.unwrap();

    gateway.execute(&params, "SELECT 2").await.unwrap();
    wait_until_released(&gateway, &fingerprint).await;
    let after = gateway.pool_stats(&fingerprint).await.unwrap();

    assert_eq!(before.in_use(), 0);
    assert_eq!(after.in_use(), 0);
    assert_eq!(after.idle, before.idle);
}

#[tokio::test]
async fn test_connection_released_after_failure() {
    let dbs = TestDatabases::new();
    let params = dbs.create("release_err.db");
    let gateway = gateway();
    let fingerprint = gateway.fingerprint(&params);

    gateway.execute(&params, "SELECT 1").await.unwrap();
    wait_until_released(&gateway, &fingerprint).await;
    let before = gateway.pool_stats(&fingerprint).await.unwrap();

    let err = gateway
        .execute(&params, "SELEC * FROM nowhere")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Query { .. }));

    wait_until_released(&gateway, &fingerprint).await;
    let after = gateway.pool_stats(&fingerprint).await.unwrap();
    assert_eq!(after.in_use(), 0);
    assert_eq!(after.idle, before.idle);

    // The pool stays usable for the next caller
    assert!(gateway.execute(&params, "SELECT 1").await.is_ok());
}

#[tokio::test]
async fn test_unknown_table_is_query_error() {
    let dbs = TestDatabases::new();
    let params = dbs.create("unknown.db");
    let gateway = gateway();

    let err = gateway
        .execute(&params, "SELECT * FROM missing_table")
        .await
        .unwrap_err();

    match err {
        GatewayError::Query { message, .. } => assert!(message.contains("missing_table")),
        other => panic!("expected query error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_preview_table_limits_rows() {
    let dbs = TestDatabases::new();
    let params = dbs.create("preview.db");
    let gateway = gateway();
    seed_users(&gateway, &params).await;

    let preview = gateway
        .preview_table(&params, "users", Some(2))
        .await
        .unwrap();
    assert_eq!(preview.rows.len(), 2);
    assert_eq!(preview.row_count, 2);

    let default = gateway.preview_table(&params, "users", None).await.unwrap();
    assert_eq!(default.rows.len(), 5);
}

#[tokio::test]
async fn test_execute_profile_decrypts_then_runs() {
    let dbs = TestDatabases::new();
    let params = dbs.create("profile.db").with_password("stored-password");
    let gateway = gateway();

    let profile = ConnectionProfile::seal("local", &params, gateway.cipher()).unwrap();
    let result = gateway.execute_profile(&profile, "SELECT 42 AS answer").await.unwrap();
    assert_eq!(result.rows[0]["answer"], json!(42));

    let mut tampered = profile.clone();
    tampered.password = EncryptedSecret::new("not-a-blob");
    let err = gateway
        .execute_profile(&tampered, "SELECT 1")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Decryption { .. }));
}

#[tokio::test]
async fn test_history_is_dispatched_for_success_and_failure() {
    let dbs = TestDatabases::new();
    let params = dbs.create("history.db");
    let store = Arc::new(InMemoryHistory::new());
    let gateway = gateway().with_history(HistoryDispatcher::new(store.clone()));

    gateway.execute(&params, "SELECT 1").await.unwrap();
    let _ = gateway.execute(&params, "SELEC 1").await;

    for _ in 0..100 {
        if store.entries().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let entries = store.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.iter().filter(|e| e.success).count(), 1);
    assert!(entries.iter().any(|e| e.sql == "SELEC 1" && e.error.is_some()));
}
