//! Database access layer.
//!
//! This module provides:
//! - The fingerprint-keyed pool registry
//! - Statement execution on pooled connections
//! - One-shot connection tests
//! - Schema introspection
//! - Row decoding into JSON values

#[macro_use]
pub mod macros;
pub mod executor;
pub mod pool;
pub mod schema;
pub mod tester;
pub mod types;

pub use executor::QueryExecutor;
pub use pool::{DbPool, PoolManager, PoolStats};
pub use schema::SchemaInspector;
pub use tester::ConnectionTester;
