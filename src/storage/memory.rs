//! In-memory storage implementation
//!
//! Stores live as long as the owning `MemoryStorage`. Opening the same name
//! twice returns the same store, mirroring how named remote stores behave.

use crate::storage::traits::{CacheBackend, QueueBackend, StorageError, StorageResult};
use crate::storage::{AddOutcome, QueueEntryState, QueueRequest};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of named in-memory stores and queues
#[derive(Default)]
pub struct MemoryStorage {
    stores: Mutex<HashMap<String, Arc<MemoryKeyValueStore>>>,
    queues: Mutex<HashMap<String, Arc<MemoryRequestQueue>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named key-value store, creating it on first use
    pub fn open_key_value_store(&self, name: &str) -> Arc<MemoryKeyValueStore> {
        lock(&self.stores)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Returns the named request queue, creating it on first use
    pub fn open_request_queue(&self, name: &str) -> Arc<MemoryRequestQueue> {
        lock(&self.queues)
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// In-memory key-value store
#[derive(Default)]
pub struct MemoryKeyValueStore {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(lock(&self.records).get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<Vec<u8>>) -> StorageResult<()> {
        let mut records = lock(&self.records);
        match value {
            Some(value) => {
                records.insert(key.to_string(), value);
            }
            None => {
                records.remove(key);
            }
        }
        Ok(())
    }

    async fn list_keys(&self, after: Option<&str>, limit: usize) -> StorageResult<Vec<String>> {
        let records = lock(&self.records);
        let keys = records
            .keys()
            .filter(|key| after.map_or(true, |after| key.as_str() > after))
            .take(limit)
            .cloned()
            .collect();
        Ok(keys)
    }
}

struct QueueEntry {
    request: QueueRequest,
    state: QueueEntryState,
}

#[derive(Default)]
struct QueueInner {
    entries: HashMap<String, QueueEntry>,
    pending: VecDeque<String>,
    next_id: u64,
}

/// In-memory request queue with FIFO order and unique-key deduplication
#[derive(Default)]
pub struct MemoryRequestQueue {
    inner: Mutex<QueueInner>,
}

impl MemoryRequestQueue {
    /// Returns the state of the entry with the given unique key
    pub fn entry_state(&self, unique_key: &str) -> Option<QueueEntryState> {
        lock(&self.inner)
            .entries
            .get(unique_key)
            .map(|entry| entry.state)
    }

    /// Total number of entries ever added
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).entries.is_empty()
    }
}

#[async_trait]
impl QueueBackend for MemoryRequestQueue {
    async fn add_request(&self, mut request: QueueRequest) -> StorageResult<AddOutcome> {
        let mut inner = lock(&self.inner);

        if let Some(existing) = inner.entries.get(&request.unique_key) {
            return Ok(AddOutcome {
                request_id: existing.request.id.clone().unwrap_or_default(),
                was_already_present: true,
                was_already_handled: existing.state == QueueEntryState::Handled,
            });
        }

        inner.next_id += 1;
        let request_id = format!("{:016x}", inner.next_id);
        request.id = Some(request_id.clone());

        let unique_key = request.unique_key.clone();
        inner.pending.push_back(unique_key.clone());
        inner.entries.insert(
            unique_key,
            QueueEntry {
                request,
                state: QueueEntryState::Pending,
            },
        );

        Ok(AddOutcome {
            request_id,
            was_already_present: false,
            was_already_handled: false,
        })
    }

    async fn fetch_next_request(&self) -> StorageResult<Option<QueueRequest>> {
        let mut inner = lock(&self.inner);

        while let Some(unique_key) = inner.pending.pop_front() {
            if let Some(entry) = inner.entries.get_mut(&unique_key) {
                if entry.state == QueueEntryState::Pending {
                    entry.state = entry.state.transition(QueueEntryState::InProgress)?;
                    return Ok(Some(entry.request.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn mark_handled(&self, request: &QueueRequest) -> StorageResult<()> {
        let mut inner = lock(&self.inner);
        let entry = inner
            .entries
            .get_mut(&request.unique_key)
            .ok_or_else(|| StorageError::NotFound(request.unique_key.clone()))?;

        entry.state = entry.state.transition(QueueEntryState::Handled)?;
        entry.request.handled_at = Some(chrono::Utc::now().to_rfc3339());
        Ok(())
    }

    async fn release_request(&self, request: &QueueRequest) -> StorageResult<()> {
        let mut inner = lock(&self.inner);
        let entry = inner
            .entries
            .get_mut(&request.unique_key)
            .ok_or_else(|| StorageError::NotFound(request.unique_key.clone()))?;

        entry.state = entry.state.transition(QueueEntryState::Pending)?;
        inner.pending.push_front(request.unique_key.clone());
        Ok(())
    }

    async fn claim_next_request(&self) -> StorageResult<Option<QueueRequest>> {
        let mut inner = lock(&self.inner);

        while let Some(unique_key) = inner.pending.pop_front() {
            if let Some(entry) = inner.entries.get_mut(&unique_key) {
                if entry.state == QueueEntryState::Pending {
                    entry.state = entry
                        .state
                        .transition(QueueEntryState::InProgress)?
                        .transition(QueueEntryState::Handled)?;
                    entry.request.handled_at = Some(chrono::Utc::now().to_rfc3339());
                    return Ok(Some(entry.request.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn is_finished(&self) -> StorageResult<bool> {
        let inner = lock(&self.inner);
        Ok(!inner.entries.values().any(|entry| entry.state.is_unfinished()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_request(unique_key: &str) -> QueueRequest {
        QueueRequest {
            id: None,
            unique_key: unique_key.to_string(),
            url: format!("https://example.com/{}", unique_key),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            payload: None,
            user_data: serde_json::Map::new(),
            handled_at: None,
        }
    }

    #[tokio::test]
    async fn test_kv_set_get_delete() {
        let store = MemoryKeyValueStore::default();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", Some(vec![1, 2, 3])).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(vec![1, 2, 3]));

        store.set("a", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_kv_list_keys_paginates() {
        let store = MemoryKeyValueStore::default();
        for key in ["c", "a", "b", "d"] {
            store.set(key, Some(vec![0])).await.unwrap();
        }

        assert_eq!(store.list_keys(None, 2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.list_keys(Some("b"), 10).await.unwrap(), vec!["c", "d"]);
        assert!(store.list_keys(Some("d"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_dedupes_by_unique_key() {
        let queue = MemoryRequestQueue::default();

        let first = queue.add_request(queue_request("a")).await.unwrap();
        let second = queue.add_request(queue_request("a")).await.unwrap();

        assert!(!first.was_already_present);
        assert!(second.was_already_present);
        assert_eq!(first.request_id, second.request_id);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_fifo_and_finish() {
        let queue = MemoryRequestQueue::default();
        assert!(queue.is_finished().await.unwrap());

        queue.add_request(queue_request("a")).await.unwrap();
        queue.add_request(queue_request("b")).await.unwrap();
        assert!(!queue.is_finished().await.unwrap());

        let a = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(a.unique_key, "a");
        assert!(a.id.is_some());
        assert_eq!(queue.entry_state("a"), Some(QueueEntryState::InProgress));

        // In-progress work keeps the queue unfinished
        queue.mark_handled(&a).await.unwrap();
        let b = queue.fetch_next_request().await.unwrap().unwrap();
        assert!(!queue.is_finished().await.unwrap());

        queue.mark_handled(&b).await.unwrap();
        assert!(queue.is_finished().await.unwrap());
        assert!(queue.fetch_next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handled_entry_is_terminal() {
        let queue = MemoryRequestQueue::default();
        queue.add_request(queue_request("a")).await.unwrap();
        let a = queue.fetch_next_request().await.unwrap().unwrap();
        queue.mark_handled(&a).await.unwrap();

        assert!(matches!(
            queue.mark_handled(&a).await,
            Err(StorageError::InvalidTransition { .. })
        ));

        let again = queue.add_request(queue_request("a")).await.unwrap();
        assert!(again.was_already_present);
        assert!(again.was_already_handled);
        assert!(queue.fetch_next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_goes_straight_to_handled() {
        let queue = MemoryRequestQueue::default();
        queue.add_request(queue_request("a")).await.unwrap();
        queue.add_request(queue_request("b")).await.unwrap();

        let a = queue.claim_next_request().await.unwrap().unwrap();
        assert_eq!(a.unique_key, "a");
        assert!(a.handled_at.is_some());
        assert_eq!(queue.entry_state("a"), Some(QueueEntryState::Handled));
        assert_eq!(queue.entry_state("b"), Some(QueueEntryState::Pending));

        queue.claim_next_request().await.unwrap().unwrap();
        assert!(queue.is_finished().await.unwrap());
        assert!(queue.claim_next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_released_request_is_fetched_again() {
        let queue = MemoryRequestQueue::default();
        queue.add_request(queue_request("a")).await.unwrap();
        queue.add_request(queue_request("b")).await.unwrap();

        let a = queue.fetch_next_request().await.unwrap().unwrap();
        queue.release_request(&a).await.unwrap();
        assert_eq!(queue.entry_state("a"), Some(QueueEntryState::Pending));

        // Released work goes back to the head of the queue
        let again = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(again.unique_key, "a");

        queue.mark_handled(&again).await.unwrap();
        assert!(matches!(
            queue.release_request(&again).await,
            Err(StorageError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_mark_unknown_request() {
        let queue = MemoryRequestQueue::default();
        assert!(matches!(
            queue.mark_handled(&queue_request("missing")).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
