//! SQL Gateway Library
//!
//! Pooled, credential-safe execution of caller-supplied SQL against remote
//! databases (MySQL, PostgreSQL, SQLite). Start from [`Gateway`].

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod gateway;
pub mod history;
pub mod models;

pub use config::{Config, GatewayConfig};
pub use crypto::{CredentialCipher, EncryptedSecret};
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
