//! Entry freshness and the maintenance sweep
//!
//! Each entry is stored under two keys: `<fingerprint>` holds the payload and
//! `<fingerprint>.time` holds the creation time as ASCII decimal Unix seconds.

use crate::storage::{CacheBackend, StorageResult};

/// Suffix of the key holding an entry's creation time
pub const TIME_KEY_SUFFIX: &str = ".time";

/// Number of keys requested per listing page during a sweep
const SWEEP_PAGE_SIZE: usize = 100;

/// Returns the key holding the creation time of `entry`
pub fn time_key(entry: &str) -> String {
    format!("{}{}", entry, TIME_KEY_SUFFIX)
}

/// Returns the entry name a stored key belongs to
pub fn entry_name(key: &str) -> &str {
    key.strip_suffix(TIME_KEY_SUFFIX).unwrap_or(key)
}

/// Parses a stored creation time
///
/// Returns `None` for anything that is not a non-negative decimal integer.
pub fn parse_stored_at(raw: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(raw).ok()?;
    let stored_at: i64 = text.trim().parse().ok()?;
    (stored_at >= 0).then_some(stored_at)
}

/// Returns true if an entry stored at `stored_at` is no longer valid at `now`
///
/// A `window` of zero disables expiration. An entry exactly `window` seconds
/// old is still valid.
///
/// # Example
///
/// ```
/// use plucker::cache::is_expired;
///
/// assert!(!is_expired(4600, 1000, 3600));
/// assert!(is_expired(4601, 1000, 3600));
/// assert!(!is_expired(1_000_000, 1000, 0));
/// ```
pub fn is_expired(now: i64, stored_at: i64, window: u64) -> bool {
    let window = i64::try_from(window).unwrap_or(i64::MAX);
    window > 0 && now.saturating_sub(stored_at) > window
}

/// Outcome of one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries looked at
    pub examined: usize,

    /// Entries removed as expired, malformed or orphaned
    pub deleted: usize,

    /// Entries skipped because a storage call failed
    pub failed: usize,
}

enum SweepAction {
    Kept,
    Deleted,
}

/// Removes an entry's time key, then its payload
///
/// Deleting in this order leaves at worst an orphaned payload, which reads
/// treat as absent and the next sweep removes.
pub(crate) async fn evict(backend: &dyn CacheBackend, entry: &str) -> StorageResult<()> {
    backend.set(&time_key(entry), None).await?;
    backend.set(entry, None).await
}

/// Examines up to `max_items` entries in key order, deleting stale ones
///
/// Individual failures are logged and counted; only a failure to list keys
/// aborts the sweep.
pub(crate) async fn sweep(
    backend: &dyn CacheBackend,
    window: u64,
    max_items: usize,
    now: i64,
) -> StorageResult<SweepReport> {
    let mut report = SweepReport::default();
    let mut after: Option<String> = None;
    let mut last_entry: Option<String> = None;

    'pages: loop {
        let keys = backend.list_keys(after.as_deref(), SWEEP_PAGE_SIZE).await?;

        for key in &keys {
            let entry = entry_name(key);
            // A payload key and its time key are adjacent in key order
            if last_entry.as_deref() == Some(entry) {
                continue;
            }
            if report.examined >= max_items {
                break 'pages;
            }
            last_entry = Some(entry.to_string());
            report.examined += 1;

            match sweep_entry(backend, entry, window, now).await {
                Ok(SweepAction::Deleted) => report.deleted += 1,
                Ok(SweepAction::Kept) => {}
                Err(e) => {
                    tracing::warn!("Failed to sweep cache entry {}: {}", entry, e);
                    report.failed += 1;
                }
            }
        }

        if keys.len() < SWEEP_PAGE_SIZE {
            break;
        }
        after = keys.last().cloned();
    }

    Ok(report)
}

async fn sweep_entry(
    backend: &dyn CacheBackend,
    entry: &str,
    window: u64,
    now: i64,
) -> StorageResult<SweepAction> {
    let Some(raw) = backend.get(&time_key(entry)).await? else {
        tracing::debug!("Orphaned cache payload {}", entry);
        backend.set(entry, None).await?;
        return Ok(SweepAction::Deleted);
    };

    match parse_stored_at(&raw) {
        None => {
            tracing::warn!("Malformed cache item {}", entry);
            evict(backend, entry).await?;
            Ok(SweepAction::Deleted)
        }
        Some(stored_at) if is_expired(now, stored_at, window) => {
            tracing::debug!("Expired cache item {}", entry);
            evict(backend, entry).await?;
            Ok(SweepAction::Deleted)
        }
        Some(_) => {
            tracing::debug!("Valid cache item {}", entry);
            Ok(SweepAction::Kept)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    async fn put_entry(store: &MemoryKeyValueStore, entry: &str, stored_at: &str) {
        store.set(entry, Some(b"payload".to_vec())).await.unwrap();
        store
            .set(&time_key(entry), Some(stored_at.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    #[test]
    fn test_expiration_boundary() {
        assert!(!is_expired(1000, 1000, 3600));
        assert!(!is_expired(4600, 1000, 3600));
        assert!(is_expired(4601, 1000, 3600));
    }

    #[test]
    fn test_zero_window_never_expires() {
        assert!(!is_expired(i64::MAX, 0, 0));
    }

    #[test]
    fn test_huge_window() {
        assert!(!is_expired(i64::MAX, 0, u64::MAX));
    }

    #[test]
    fn test_parse_stored_at() {
        assert_eq!(parse_stored_at(b"1000"), Some(1000));
        assert_eq!(parse_stored_at(b" 42\n"), Some(42));
        assert_eq!(parse_stored_at(b"-5"), None);
        assert_eq!(parse_stored_at(b"soon"), None);
        assert_eq!(parse_stored_at(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_key_names() {
        assert_eq!(time_key("abc123"), "abc123.time");
        assert_eq!(entry_name("abc123.time"), "abc123");
        assert_eq!(entry_name("abc123"), "abc123");
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired_and_malformed() {
        let store = MemoryKeyValueStore::default();
        put_entry(&store, "aa", "1000").await;
        put_entry(&store, "bb", "5000").await;
        put_entry(&store, "cc", "garbage").await;
        store.set("dd", Some(b"orphan".to_vec())).await.unwrap();

        let report = sweep(&store, 3600, 100, 5000).await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                examined: 4,
                deleted: 3,
                failed: 0
            }
        );
        assert_eq!(store.list_keys(None, 10).await.unwrap(), vec!["bb", "bb.time"]);
    }

    #[tokio::test]
    async fn test_sweep_is_bounded() {
        let store = MemoryKeyValueStore::default();
        for entry in ["a1", "a2", "a3", "a4"] {
            put_entry(&store, entry, "0").await;
        }

        let report = sweep(&store, 10, 2, 1000).await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.deleted, 2);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_sweep_spans_pages() {
        let store = MemoryKeyValueStore::default();
        for i in 0..150 {
            put_entry(&store, &format!("{:04x}", i), "0").await;
        }

        let report = sweep(&store, 10, 1000, 1000).await.unwrap();

        assert_eq!(report.examined, 150);
        assert_eq!(report.deleted, 150);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_without_window_keeps_valid_entries() {
        let store = MemoryKeyValueStore::default();
        put_entry(&store, "aa", "0").await;

        let report = sweep(&store, 0, 100, i64::MAX).await.unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(store.len(), 2);
    }
}
