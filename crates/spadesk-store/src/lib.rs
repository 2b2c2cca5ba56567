//! Persistence layer for spadeskd
//!
//! Provides:
//! - Audit log (append-only)
//! - Outbox of remote intents awaiting reconciliation
//! - Entity cache used as a fallback when the hosted database is unreachable
//! - Desk snapshot for crash recovery
//! - Saved closing reports

mod audit;
mod outbox;
mod sqlite;
mod traits;

pub use audit::*;
pub use outbox::*;
pub use sqlite::*;
pub use traits::*;

use spadesk_util::AppError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::validation(format!("not found: {}", what)),
            other => AppError::database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
