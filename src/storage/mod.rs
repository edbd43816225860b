//! Storage module for the response cache and the crawl frontier
//!
//! This module handles all remote storage access, including:
//! - The `CacheBackend` and `QueueBackend` capability interfaces
//! - The queue's wire form (`QueueRequest`) and entry states
//! - Memory, SQLite and HTTP backend implementations
//! - Backend selection from configuration (`StorageClient`)

mod http;
mod memory;
mod schema;
mod sqlite;
mod traits;

pub use http::{HttpKeyValueStore, HttpRequestQueue, HttpStorage};
pub use memory::{MemoryKeyValueStore, MemoryRequestQueue, MemoryStorage};
pub use sqlite::{SqliteKeyValueStore, SqliteRequestQueue, SqliteStorage};
pub use traits::{CacheBackend, QueueBackend, StorageError, StorageResult};

use crate::config::StorageConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A request in the queue's wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    /// Identifier assigned by the queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Deduplication key
    pub unique_key: String,

    pub url: String,

    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Base64-encoded request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    #[serde(default)]
    pub user_data: Map<String, Value>,

    /// RFC 3339 timestamp set once the request is handled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_at: Option<String>,
}

/// Result of adding a request to a queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub request_id: String,
    pub was_already_present: bool,
    #[serde(default)]
    pub was_already_handled: bool,
}

/// State of an entry in a durable queue
///
/// Entries move `Pending -> InProgress -> Handled`. `Handled` is terminal:
/// a retry is a new entry, never a reused one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEntryState {
    Pending,
    InProgress,
    Handled,
}

impl QueueEntryState {
    /// Returns true if the queue may move an entry from `self` to `next`
    pub fn can_transition_to(&self, next: QueueEntryState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Handled)
                | (Self::InProgress, Self::Pending)
        )
    }

    /// Returns an error unless the transition is allowed
    pub fn transition(&self, next: QueueEntryState) -> StorageResult<QueueEntryState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StorageError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Returns true if the entry still counts as unfinished work
    pub fn is_unfinished(&self) -> bool {
        !matches!(self, Self::Handled)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Handled => "handled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "handled" => Some(Self::Handled),
            _ => None,
        }
    }
}

/// Storage backend chosen from configuration at construction time
#[derive(Clone)]
pub enum StorageClient {
    Memory(Arc<MemoryStorage>),
    Sqlite(SqliteStorage),
    Http(HttpStorage),
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(_) => f.write_str("StorageClient::Memory"),
            Self::Sqlite(_) => f.write_str("StorageClient::Sqlite"),
            Self::Http(storage) => write!(f, "StorageClient::Http({})", storage.base_url()),
        }
    }
}

impl StorageClient {
    /// Builds the storage client described by the configuration
    ///
    /// # Returns
    ///
    /// * `Ok(StorageClient)` - Client ready to open stores and queues
    /// * `Err(StorageError)` - The database could not be opened or the HTTP client built
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        match config {
            StorageConfig::Memory => Ok(Self::Memory(Arc::new(MemoryStorage::new()))),
            StorageConfig::Sqlite { database_path } => {
                Ok(Self::Sqlite(SqliteStorage::open(Path::new(database_path))?))
            }
            StorageConfig::Http {
                api_base_url,
                api_token,
            } => Ok(Self::Http(HttpStorage::new(api_base_url, api_token.clone())?)),
        }
    }

    /// Opens (creating if needed) the named key-value store
    pub async fn open_cache_backend(&self, name: &str) -> StorageResult<Arc<dyn CacheBackend>> {
        match self {
            Self::Memory(storage) => Ok(storage.open_key_value_store(name)),
            Self::Sqlite(storage) => Ok(Arc::new(storage.key_value_store(name))),
            Self::Http(storage) => Ok(Arc::new(storage.open_key_value_store(name).await?)),
        }
    }

    /// Opens (creating if needed) the named request queue
    pub async fn open_queue_backend(&self, name: &str) -> StorageResult<Arc<dyn QueueBackend>> {
        match self {
            Self::Memory(storage) => Ok(storage.open_request_queue(name)),
            Self::Sqlite(storage) => Ok(Arc::new(storage.open_request_queue(name).await?)),
            Self::Http(storage) => Ok(Arc::new(storage.open_request_queue(name).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_state_roundtrip() {
        for state in &[
            QueueEntryState::Pending,
            QueueEntryState::InProgress,
            QueueEntryState::Handled,
        ] {
            let db_str = state.to_db_string();
            assert_eq!(QueueEntryState::from_db_string(db_str), Some(*state));
        }
        assert_eq!(QueueEntryState::from_db_string("claimed"), None);
    }

    #[test]
    fn test_queue_state_transitions() {
        use QueueEntryState::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Handled));
        assert!(InProgress.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Handled));
        assert!(!Handled.can_transition_to(Pending));
        assert!(!Handled.can_transition_to(InProgress));
        assert!(Handled.transition(Handled).is_err());

        assert!(Pending.is_unfinished());
        assert!(InProgress.is_unfinished());
        assert!(!Handled.is_unfinished());
    }

    #[test]
    fn test_queue_request_wire_format() {
        let request = QueueRequest {
            id: None,
            unique_key: "abc".to_string(),
            url: "https://example.com/".to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            payload: None,
            user_data: Map::new(),
            handled_at: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["uniqueKey"], "abc");
        assert_eq!(json["userData"], serde_json::json!({}));
        assert!(json.get("id").is_none());
        assert!(json.get("handledAt").is_none());
    }

    #[tokio::test]
    async fn test_memory_client_shares_named_stores() {
        let client = StorageClient::from_config(&StorageConfig::Memory).unwrap();

        let first = client.open_cache_backend("httpcache-test").await.unwrap();
        first.set("k", Some(b"v".to_vec())).await.unwrap();

        let second = client.open_cache_backend("httpcache-test").await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(b"v".to_vec()));

        let other = client.open_cache_backend("httpcache-other").await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), None);
    }
}
