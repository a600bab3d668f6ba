//! Typed errors for the aggregation engine.
//!
//! Engine seams (adapters, store, coordinator) return these `thiserror`
//! enums; bootstrap and config code uses `anyhow` on top of them.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single adapter call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The call did not finish within the per-source timeout.
    #[error("adapter call timed out after {0:?}")]
    Timeout(Duration),

    /// Network error, 5xx or rate limit. Retryable.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Auth/config error or malformed payload. Never retried.
    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Permanent(_))
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        FetchError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        FetchError::Permanent(msg.into())
    }

    /// Classify an HTTP status returned by a provider.
    /// 408, 425, 429 and 5xx are transient; every other non-success is permanent.
    pub fn from_status(status: u16, context: &str) -> Self {
        let msg = format!("{context}: HTTP {status}");
        match status {
            408 | 425 | 429 | 500..=599 => FetchError::Transient(msg),
            _ => FetchError::Permanent(msg),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::from_status(status.as_u16(), "provider request");
        }
        if e.is_decode() || e.is_builder() {
            FetchError::Permanent(e.to_string())
        } else {
            // connect, timeout, body read: the provider may recover
            FetchError::Transient(e.to_string())
        }
    }
}

/// Persistence failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Constraint(db.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Serialization(e.to_string())
            }
            _ => StoreError::Unavailable(e.to_string()),
        }
    }
}

/// Rejections returned to whoever triggers a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("a crawl run is already in progress")]
    InProgress,
}

/// A record the normalizer refused to turn into a `ContentRecord`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record has an empty title")]
    EmptyTitle,
}
