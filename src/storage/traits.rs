//! Storage traits and error types
//!
//! This module defines the capability interfaces for the remote key-value
//! mapping used by the response cache and the durable queue used by the
//! scheduler, plus their associated error types.

use crate::storage::{AddOutcome, QueueEntryState, QueueRequest};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid queue entry transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: QueueEntryState,
        to: QueueEntryState,
    },

    #[error("Invalid storage URL: {0}")]
    InvalidUrl(String),

    #[error("Blocking storage task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key-value mapping backing the response cache
///
/// No multi-key transactions are assumed: every call stands alone.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads the value stored under `key`
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes `value` under `key`; `None` deletes the key
    async fn set(&self, key: &str, value: Option<Vec<u8>>) -> StorageResult<()>;

    /// Lists keys in ascending order
    ///
    /// # Arguments
    ///
    /// * `after` - Only keys strictly greater than this one are returned
    /// * `limit` - Maximum number of keys in the page
    async fn list_keys(&self, after: Option<&str>, limit: usize) -> StorageResult<Vec<String>>;
}

/// Durable, deduplicating request queue backing the crawl frontier
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Adds a request unless one with the same unique key exists
    async fn add_request(&self, request: QueueRequest) -> StorageResult<AddOutcome>;

    /// Takes the next pending request and moves it to `in_progress`
    async fn fetch_next_request(&self) -> StorageResult<Option<QueueRequest>>;

    /// Moves a fetched request to `handled`
    async fn mark_handled(&self, request: &QueueRequest) -> StorageResult<()>;

    /// Returns a fetched request to `pending` so it can be fetched again
    async fn release_request(&self, request: &QueueRequest) -> StorageResult<()>;

    /// Takes the next pending request and marks it handled
    ///
    /// The default fetches then marks, releasing the request again if the
    /// mark fails, so no entry is left `in_progress`. Backends that can do
    /// both steps under one lock or transaction override this.
    async fn claim_next_request(&self) -> StorageResult<Option<QueueRequest>> {
        let Some(request) = self.fetch_next_request().await? else {
            return Ok(None);
        };

        if let Err(e) = self.mark_handled(&request).await {
            if let Err(release_err) = self.release_request(&request).await {
                tracing::warn!(
                    "Failed to release request {} after a failed mark: {}",
                    request.unique_key,
                    release_err
                );
            }
            return Err(e);
        }
        Ok(Some(request))
    }

    /// Returns true when no request is pending or in progress
    async fn is_finished(&self) -> StorageResult<bool>;
}
