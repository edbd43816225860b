//! Persistent HTTP response cache
//!
//! [`CacheStorage`] serves previously fetched responses while they are still
//! valid. Entries live in a key-value store reached through the async bridge;
//! every lookup and write is a blocking call from the crawl thread.
//!
//! # Failure handling
//!
//! - Storage and bridge failures during a lookup are logged and reported as a miss
//! - Corrupt or expired entries are logged, evicted and reported as a miss
//! - Nothing here can fail a crawl

mod entry;
mod expiration;

pub use entry::CachedResponse;
pub use expiration::{entry_name, is_expired, parse_stored_at, time_key, SweepReport, TIME_KEY_SUFFIX};

use crate::bridge::{AsyncBridge, BridgeError};
use crate::config::CacheConfig;
use crate::request::{Fingerprint, Fingerprinter, Request};
use crate::run::RunContext;
use crate::storage::{CacheBackend, StorageError};
use std::sync::Arc;
use thiserror::Error;

/// Key-value store name prefix; the spider name completes it
pub const CACHE_NAMESPACE_PREFIX: &str = "httpcache-";

/// Errors from cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Corrupt cache entry {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Failed to serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to compress cache entry: {0}")]
    Compression(#[from] std::io::Error),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// What a lookup found under a fingerprint
enum Lookup {
    Hit(CachedResponse),
    Miss,
    Expired,
}

/// Response cache for one crawl run
pub struct CacheStorage {
    bridge: Arc<AsyncBridge>,
    backend: Arc<dyn CacheBackend>,
    fingerprinter: Arc<dyn Fingerprinter>,
    expiration_secs: u64,
    expiration_max_items: usize,
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("expiration_secs", &self.expiration_secs)
            .field("expiration_max_items", &self.expiration_max_items)
            .finish_non_exhaustive()
    }
}

impl CacheStorage {
    /// Opens the run's cache namespace (`httpcache-<spider>`)
    ///
    /// # Arguments
    ///
    /// * `context` - The crawl run providing the bridge, storage and fingerprinter
    ///
    /// # Returns
    ///
    /// * `Ok(CacheStorage)` - Cache ready to serve lookups
    /// * `Err(CacheError)` - The key-value store could not be opened
    pub fn open(context: &RunContext) -> CacheResult<Self> {
        let name = format!("{}{}", CACHE_NAMESPACE_PREFIX, context.spider_name());
        tracing::debug!("Opening cache storage's '{}' key-value store", name);

        let storage = context.storage().clone();
        let backend = context
            .bridge()
            .run_sync(async move { storage.open_cache_backend(&name).await })??;

        Ok(Self::with_backend(
            Arc::clone(context.bridge()),
            backend,
            Arc::clone(context.fingerprinter()),
            &context.config().cache,
        ))
    }

    /// Creates a cache over an already opened backend
    pub fn with_backend(
        bridge: Arc<AsyncBridge>,
        backend: Arc<dyn CacheBackend>,
        fingerprinter: Arc<dyn Fingerprinter>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            bridge,
            backend,
            fingerprinter,
            expiration_secs: config.expiration_secs,
            expiration_max_items: config.expiration_max_items,
        }
    }

    /// Looks up the response cached for `request`
    ///
    /// Returns `None` on a miss, including expired, corrupt and unreachable
    /// entries.
    pub fn retrieve(&self, request: &Request) -> Option<CachedResponse> {
        let fingerprint = self.fingerprinter.fingerprint(request);
        let response = self.retrieve_at(&fingerprint, now());
        if response.is_some() {
            tracing::debug!("Cache hit for {} {}", request.method, request.url);
        }
        response
    }

    /// Looks up a fingerprint as of `now` (Unix seconds)
    pub fn retrieve_at(&self, fingerprint: &Fingerprint, now: i64) -> Option<CachedResponse> {
        let key = fingerprint.as_str();
        match self.lookup(key, now) {
            Ok(Lookup::Hit(response)) => Some(response),
            Ok(Lookup::Miss) => {
                tracing::debug!("Cache miss for {}", key);
                None
            }
            Ok(Lookup::Expired) => {
                tracing::debug!("Cache expired for {}", key);
                self.evict(key);
                None
            }
            Err(CacheError::CorruptEntry { key, reason }) => {
                tracing::warn!("Corrupt cache entry {}: {}", key, reason);
                self.evict(&key);
                None
            }
            Err(e) => {
                tracing::warn!("Cache lookup for {} failed, treating as a miss: {}", key, e);
                None
            }
        }
    }

    /// Stores the response fetched for `request`
    ///
    /// Failures are logged; the crawl continues without caching this response.
    pub fn store(&self, request: &Request, response: &CachedResponse) {
        let fingerprint = self.fingerprinter.fingerprint(request);
        if let Err(e) = self.store_at(&fingerprint, response, now()) {
            tracing::error!(
                "Failed to cache response for {} {}: {}",
                request.method,
                request.url,
                e
            );
        }
    }

    /// Stores a response under a fingerprint with creation time `now`
    ///
    /// The payload is written before the time key, so a reader never sees a
    /// time key whose payload has not been written yet.
    pub fn store_at(
        &self,
        fingerprint: &Fingerprint,
        response: &CachedResponse,
        now: i64,
    ) -> CacheResult<()> {
        let key = fingerprint.as_str().to_string();
        let payload = response.encode()?;
        let backend = Arc::clone(&self.backend);

        self.bridge.run_sync(async move {
            backend.set(&key, Some(payload)).await?;
            backend
                .set(&time_key(&key), Some(now.to_string().into_bytes()))
                .await
        })??;
        Ok(())
    }

    /// Runs one bounded maintenance sweep as of `now`
    ///
    /// Examines at most `expiration-max-items` entries, deleting expired,
    /// malformed and orphaned ones. Uses the bridge's maintenance timeout.
    pub fn sweep_at(&self, now: i64) -> CacheResult<SweepReport> {
        tracing::info!(
            "Cleaning up cache items (max {})",
            self.expiration_max_items
        );

        let backend = Arc::clone(&self.backend);
        let window = self.expiration_secs;
        let max_items = self.expiration_max_items;
        let report = self.bridge.run_sync_with_timeout(
            async move { expiration::sweep(backend.as_ref(), window, max_items, now).await },
            self.bridge.config().maintenance_timeout(),
        )??;

        tracing::info!(
            "Cache sweep examined {} entries, deleted {}, failed {}",
            report.examined,
            report.deleted,
            report.failed
        );
        Ok(report)
    }

    /// Finishes the run's use of the cache
    ///
    /// Sweeps expired entries when expiration is enabled. Never fails; the
    /// bridge itself is closed by the owning run context.
    pub fn close(&self) {
        if self.expiration_secs > 0 {
            if let Err(e) = self.sweep_at(now()) {
                tracing::warn!("Cache sweep failed: {}", e);
            }
        }
        tracing::debug!("Cache storage closed");
    }

    fn lookup(&self, key: &str, now: i64) -> CacheResult<Lookup> {
        let lookup = lookup_entry(
            Arc::clone(&self.backend),
            key.to_string(),
            self.expiration_secs,
            now,
        );
        self.bridge.run_sync(lookup)?
    }

    fn evict(&self, key: &str) {
        let backend = Arc::clone(&self.backend);
        let key_owned = key.to_string();
        let result = self
            .bridge
            .run_sync(async move { expiration::evict(backend.as_ref(), &key_owned).await });

        match result {
            Ok(Ok(())) => tracing::debug!("Evicted cache entry {}", key),
            Ok(Err(e)) => tracing::warn!("Failed to evict cache entry {}: {}", key, e),
            Err(e) => tracing::warn!("Failed to evict cache entry {}: {}", key, e),
        }
    }
}

/// Reads the time key first so stale entries are rejected without
/// fetching or decompressing their payload
async fn lookup_entry(
    backend: Arc<dyn CacheBackend>,
    key: String,
    window: u64,
    now: i64,
) -> CacheResult<Lookup> {
    let Some(raw_time) = backend.get(&time_key(&key)).await? else {
        return Ok(Lookup::Miss);
    };

    let stored_at = parse_stored_at(&raw_time).ok_or_else(|| CacheError::CorruptEntry {
        key: key.clone(),
        reason: "malformed creation time".to_string(),
    })?;
    if is_expired(now, stored_at, window) {
        return Ok(Lookup::Expired);
    }

    match backend.get(&key).await? {
        Some(payload) => Ok(Lookup::Hit(CachedResponse::decode(&key, &payload, stored_at)?)),
        None => Ok(Lookup::Miss),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
