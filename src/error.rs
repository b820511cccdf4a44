// SPDX-License-Identifier: MIT
//! Engine error taxonomy.
//!
//! Callers branch on three classes: validation errors (nothing persisted),
//! retryable errors (lock/timeout contention — retry or enqueue for
//! reconciliation), and fatal storage errors. Duplicate awards are *not*
//! errors anywhere in this crate; the award insert path resolves them
//! idempotently.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Point deltas must be strictly positive; nothing was persisted.
    #[error("invalid point amount {0}: must be positive")]
    InvalidPoints(i64),

    /// Counter increments must be at least 1; nothing was persisted.
    #[error("invalid counter increment 0: must be at least 1")]
    InvalidIncrement,

    /// The operation's transaction exceeded the configured bound and was
    /// rolled back. Retryable.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// SQLite reported the database busy/locked, or the pool had no free
    /// connection in time. Retryable.
    #[error("storage is busy, retry later")]
    Busy,

    /// Any other persistence failure. Fatal from the engine's perspective.
    #[error("storage error: {0}")]
    Storage(sqlx::Error),

    /// A serialized payload (dead-letter operation) failed to decode.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the caller should retry (or enqueue for reconciliation)
    /// rather than treat the failure as final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::Busy)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let msg = db.message();
                if msg.contains("database is locked") || msg.contains("database table is locked") {
                    EngineError::Busy
                } else {
                    EngineError::Storage(e)
                }
            }
            sqlx::Error::PoolTimedOut => EngineError::Busy,
            _ => EngineError::Storage(e),
        }
    }
}
