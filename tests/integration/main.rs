//! Integration tests driving the cache and scheduler synchronously through a
//! real bridge, the way a crawl engine uses them

mod cache_tests;
mod scheduler_tests;

use plucker::config::{Config, StorageConfig};
use std::path::Path;

/// Creates a configuration backed by a SQLite file
pub fn sqlite_config(db_path: &Path) -> Config {
    let mut config = Config::default();
    config.storage = StorageConfig::Sqlite {
        database_path: db_path.to_string_lossy().into_owned(),
    };
    config.bridge.call_timeout_ms = 5000;
    config
}
