//! SQLite storage implementation
//!
//! This module provides SQLite-backed implementations of the storage traits.
//! One connection is shared by every store and queue opened from the same
//! `SqliteStorage`; each call runs on tokio's blocking pool.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CacheBackend, QueueBackend, StorageError, StorageResult};
use crate::storage::{AddOutcome, QueueEntryState, QueueRequest};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Opens or creates a database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Returns a handle to the named key-value store
    pub fn key_value_store(&self, name: &str) -> SqliteKeyValueStore {
        SqliteKeyValueStore {
            storage: self.clone(),
            store: name.to_string(),
        }
    }

    /// Opens the named request queue
    ///
    /// Entries left `in_progress` by a process that died before marking them
    /// handled are returned to `pending`.
    pub async fn open_request_queue(&self, name: &str) -> StorageResult<SqliteRequestQueue> {
        let queue = name.to_string();
        let reclaimed = self
            .with_conn({
                let queue = queue.clone();
                move |conn| {
                    Ok(conn.execute(
                        "UPDATE queue_requests SET state = ?1 WHERE queue = ?2 AND state = ?3",
                        params![
                            QueueEntryState::Pending.to_db_string(),
                            queue,
                            QueueEntryState::InProgress.to_db_string()
                        ],
                    )?)
                }
            })
            .await?;

        if reclaimed > 0 {
            tracing::info!(
                "Returned {} in-progress requests to queue '{}'",
                reclaimed,
                queue
            );
        }

        Ok(SqliteRequestQueue {
            storage: self.clone(),
            queue,
        })
    }

    /// Runs a closure against the connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

/// Key-value store kept in the `kv_records` table
pub struct SqliteKeyValueStore {
    storage: SqliteStorage,
    store: String,
}

#[async_trait]
impl CacheBackend for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let store = self.store.clone();
        let key = key.to_string();
        self.storage
            .with_conn(move |conn| {
                let value: Option<Vec<u8>> = conn
                    .query_row(
                        "SELECT value FROM kv_records WHERE store = ?1 AND key = ?2",
                        params![store, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
    }

    async fn set(&self, key: &str, value: Option<Vec<u8>>) -> StorageResult<()> {
        let store = self.store.clone();
        let key = key.to_string();
        self.storage
            .with_conn(move |conn| {
                match value {
                    Some(value) => {
                        conn.execute(
                            "INSERT INTO kv_records (store, key, value, updated_at)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(store, key) DO UPDATE SET
                                value = excluded.value,
                                updated_at = excluded.updated_at",
                            params![store, key, value, Utc::now().to_rfc3339()],
                        )?;
                    }
                    None => {
                        conn.execute(
                            "DELETE FROM kv_records WHERE store = ?1 AND key = ?2",
                            params![store, key],
                        )?;
                    }
                }
                Ok(())
            })
            .await
    }

    async fn list_keys(&self, after: Option<&str>, limit: usize) -> StorageResult<Vec<String>> {
        let store = self.store.clone();
        let after = after.unwrap_or("").to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.storage
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv_records WHERE store = ?1 AND key > ?2 ORDER BY key LIMIT ?3",
                )?;
                let keys = stmt
                    .query_map(params![store, after, limit], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
    }
}

/// Request queue kept in the `queue_requests` table
pub struct SqliteRequestQueue {
    storage: SqliteStorage,
    queue: String,
}

impl SqliteRequestQueue {
    /// Returns the state of the entry with the given unique key
    pub async fn entry_state(&self, unique_key: &str) -> StorageResult<Option<QueueEntryState>> {
        let queue = self.queue.clone();
        let unique_key = unique_key.to_string();
        self.storage
            .with_conn(move |conn| read_state(conn, &queue, &unique_key))
            .await
    }
}

fn read_state(
    conn: &Connection,
    queue: &str,
    unique_key: &str,
) -> StorageResult<Option<QueueEntryState>> {
    let state: Option<String> = conn
        .query_row(
            "SELECT state FROM queue_requests WHERE queue = ?1 AND unique_key = ?2",
            params![queue, unique_key],
            |row| row.get(0),
        )
        .optional()?;

    state
        .map(|s| {
            QueueEntryState::from_db_string(&s)
                .ok_or_else(|| StorageError::Database(format!("Unknown queue state '{}'", s)))
        })
        .transpose()
}

/// Moves the oldest pending row through `steps` and returns it
///
/// Callers run this inside a transaction so the row is never observed
/// half-way through its steps.
fn take_head(
    conn: &Connection,
    queue: &str,
    steps: &[QueueEntryState],
) -> StorageResult<Option<QueueRequest>> {
    let row = conn
        .query_row(
            "SELECT seq, unique_key, url, method, headers, payload, user_data
             FROM queue_requests WHERE queue = ?1 AND state = ?2
             ORDER BY seq LIMIT 1",
            params![queue, QueueEntryState::Pending.to_db_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((seq, unique_key, url, method, headers, payload, user_data)) = row else {
        return Ok(None);
    };

    let mut state = QueueEntryState::Pending;
    for step in steps {
        state = state.transition(*step)?;
    }
    let handled_at = (state == QueueEntryState::Handled).then(|| Utc::now().to_rfc3339());

    conn.execute(
        "UPDATE queue_requests SET state = ?1, handled_at = ?2 WHERE seq = ?3",
        params![state.to_db_string(), handled_at, seq],
    )?;

    Ok(Some(QueueRequest {
        id: Some(seq.to_string()),
        unique_key,
        url,
        method,
        headers: serde_json::from_str(&headers)?,
        payload,
        user_data: serde_json::from_str(&user_data)?,
        handled_at,
    }))
}

#[async_trait]
impl QueueBackend for SqliteRequestQueue {
    async fn add_request(&self, request: QueueRequest) -> StorageResult<AddOutcome> {
        let queue = self.queue.clone();
        self.storage
            .with_conn(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO queue_requests
                     (queue, unique_key, url, method, headers, payload, user_data, state, added_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        queue,
                        request.unique_key,
                        request.url,
                        request.method,
                        serde_json::to_string(&request.headers)?,
                        request.payload,
                        serde_json::to_string(&request.user_data)?,
                        QueueEntryState::Pending.to_db_string(),
                        Utc::now().to_rfc3339(),
                    ],
                )?;

                let (seq, state): (i64, String) = conn.query_row(
                    "SELECT seq, state FROM queue_requests WHERE queue = ?1 AND unique_key = ?2",
                    params![queue, request.unique_key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;

                Ok(AddOutcome {
                    request_id: seq.to_string(),
                    was_already_present: inserted == 0,
                    was_already_handled: state == QueueEntryState::Handled.to_db_string(),
                })
            })
            .await
    }

    async fn fetch_next_request(&self) -> StorageResult<Option<QueueRequest>> {
        let queue = self.queue.clone();
        self.storage
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let request = take_head(&tx, &queue, &[QueueEntryState::InProgress])?;
                tx.commit()?;
                Ok(request)
            })
            .await
    }

    async fn claim_next_request(&self) -> StorageResult<Option<QueueRequest>> {
        let queue = self.queue.clone();
        self.storage
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let request = take_head(
                    &tx,
                    &queue,
                    &[QueueEntryState::InProgress, QueueEntryState::Handled],
                )?;
                tx.commit()?;
                Ok(request)
            })
            .await
    }

    async fn mark_handled(&self, request: &QueueRequest) -> StorageResult<()> {
        let queue = self.queue.clone();
        let unique_key = request.unique_key.clone();
        self.storage
            .with_conn(move |conn| {
                let current = read_state(conn, &queue, &unique_key)?
                    .ok_or_else(|| StorageError::NotFound(unique_key.clone()))?;
                let next = current.transition(QueueEntryState::Handled)?;

                conn.execute(
                    "UPDATE queue_requests SET state = ?1, handled_at = ?2
                     WHERE queue = ?3 AND unique_key = ?4",
                    params![next.to_db_string(), Utc::now().to_rfc3339(), queue, unique_key],
                )?;
                Ok(())
            })
            .await
    }

    async fn release_request(&self, request: &QueueRequest) -> StorageResult<()> {
        let queue = self.queue.clone();
        let unique_key = request.unique_key.clone();
        self.storage
            .with_conn(move |conn| {
                let current = read_state(conn, &queue, &unique_key)?
                    .ok_or_else(|| StorageError::NotFound(unique_key.clone()))?;
                let next = current.transition(QueueEntryState::Pending)?;

                conn.execute(
                    "UPDATE queue_requests SET state = ?1 WHERE queue = ?2 AND unique_key = ?3",
                    params![next.to_db_string(), queue, unique_key],
                )?;
                Ok(())
            })
            .await
    }

    async fn is_finished(&self) -> StorageResult<bool> {
        let queue = self.queue.clone();
        self.storage
            .with_conn(move |conn| {
                let unfinished: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM queue_requests WHERE queue = ?1 AND state != ?2",
                    params![queue, QueueEntryState::Handled.to_db_string()],
                    |row| row.get(0),
                )?;
                Ok(unfinished == 0)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn queue_request(unique_key: &str) -> QueueRequest {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "*/*".to_string());
        let mut user_data = serde_json::Map::new();
        user_data.insert("page".to_string(), serde_json::json!(1));

        QueueRequest {
            id: None,
            unique_key: unique_key.to_string(),
            url: format!("https://example.com/{}", unique_key),
            method: "POST".to_string(),
            headers,
            payload: Some("Ym9keQ==".to_string()),
            user_data,
            handled_at: None,
        }
    }

    #[tokio::test]
    async fn test_kv_roundtrip_and_namespaces() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let cache = storage.key_value_store("httpcache-a");
        let other = storage.key_value_store("httpcache-b");

        cache.set("k", Some(vec![0, 159, 146, 150])).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(vec![0, 159, 146, 150]));
        assert_eq!(other.get("k").await.unwrap(), None);

        cache.set("k", Some(vec![1])).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(vec![1]));

        cache.set("k", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kv_list_keys() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let cache = storage.key_value_store("httpcache-a");
        for key in ["b", "a", "c"] {
            cache.set(key, Some(vec![0])).await.unwrap();
        }
        storage
            .key_value_store("httpcache-b")
            .set("z", Some(vec![0]))
            .await
            .unwrap();

        assert_eq!(cache.list_keys(None, 2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(cache.list_keys(Some("b"), 2).await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_queue_roundtrip_preserves_wire_fields() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let queue = storage.open_request_queue("frontier-test").await.unwrap();

        let outcome = queue.add_request(queue_request("a")).await.unwrap();
        assert!(!outcome.was_already_present);

        let fetched = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(fetched.id.as_deref(), Some(outcome.request_id.as_str()));
        assert_eq!(fetched.method, "POST");
        assert_eq!(fetched.headers.get("accept").map(String::as_str), Some("*/*"));
        assert_eq!(fetched.payload.as_deref(), Some("Ym9keQ=="));
        assert_eq!(fetched.user_data["page"], 1);
    }

    #[tokio::test]
    async fn test_queue_dedupe_and_lifecycle() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let queue = storage.open_request_queue("frontier-test").await.unwrap();

        queue.add_request(queue_request("a")).await.unwrap();
        let again = queue.add_request(queue_request("a")).await.unwrap();
        assert!(again.was_already_present);
        assert!(!again.was_already_handled);

        let a = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(
            queue.entry_state("a").await.unwrap(),
            Some(QueueEntryState::InProgress)
        );
        assert!(!queue.is_finished().await.unwrap());

        queue.mark_handled(&a).await.unwrap();
        assert!(queue.is_finished().await.unwrap());
        assert!(queue.fetch_next_request().await.unwrap().is_none());

        assert!(matches!(
            queue.mark_handled(&a).await,
            Err(StorageError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_claim_and_release() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let queue = storage.open_request_queue("frontier-test").await.unwrap();
        queue.add_request(queue_request("a")).await.unwrap();
        queue.add_request(queue_request("b")).await.unwrap();

        let a = queue.claim_next_request().await.unwrap().unwrap();
        assert_eq!(a.unique_key, "a");
        assert!(a.handled_at.is_some());
        assert_eq!(
            queue.entry_state("a").await.unwrap(),
            Some(QueueEntryState::Handled)
        );

        let b = queue.fetch_next_request().await.unwrap().unwrap();
        queue.release_request(&b).await.unwrap();
        assert_eq!(
            queue.entry_state("b").await.unwrap(),
            Some(QueueEntryState::Pending)
        );

        let b = queue.claim_next_request().await.unwrap().unwrap();
        assert_eq!(b.unique_key, "b");
        assert!(queue.is_finished().await.unwrap());
        assert!(matches!(
            queue.release_request(&b).await,
            Err(StorageError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plucker.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            let queue = storage.open_request_queue("frontier-test").await.unwrap();
            queue.add_request(queue_request("a")).await.unwrap();
            queue.add_request(queue_request("b")).await.unwrap();

            let a = queue.fetch_next_request().await.unwrap().unwrap();
            queue.mark_handled(&a).await.unwrap();
            // "b" is claimed but the process "crashes" before handling it
            queue.fetch_next_request().await.unwrap().unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        let queue = storage.open_request_queue("frontier-test").await.unwrap();

        let again = queue.add_request(queue_request("a")).await.unwrap();
        assert!(again.was_already_present);
        assert!(again.was_already_handled);

        let b = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(b.unique_key, "b");
    }
}
