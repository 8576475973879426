//! Data models for the SQL gateway.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionFingerprint, ConnectionParams, ConnectionProfile, Driver};
pub use query::{DEFAULT_PREVIEW_LIMIT, ExecutionResult, MAX_PREVIEW_LIMIT, Row};
pub use schema::{ColumnDescriptor, parse_nullable};
