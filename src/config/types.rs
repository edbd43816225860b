use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration structure for Plucker
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub fingerprint: FingerprintConfig,
    pub run: RunConfig,
}

/// Timeouts for calls made through the async bridge
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound for a single cache or queue call (milliseconds)
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,

    /// Upper bound for a whole maintenance sweep (milliseconds)
    #[serde(rename = "maintenance-timeout-ms")]
    pub maintenance_timeout_ms: u64,

    /// Upper bound for stopping the loop thread (milliseconds)
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,
}

impl BridgeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn maintenance_timeout(&self) -> Duration {
        Duration::from_millis(self.maintenance_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            maintenance_timeout_ms: 300_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// HTTP response cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a stored response stays valid (0 disables expiration)
    #[serde(rename = "expiration-secs")]
    pub expiration_secs: u64,

    /// Maximum number of entries examined by one maintenance sweep
    #[serde(rename = "expiration-max-items")]
    pub expiration_max_items: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration_secs: 0,
            expiration_max_items: 100,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Process-local stores, lost when the process exits
    #[default]
    Memory,

    /// SQLite database file
    Sqlite {
        #[serde(rename = "database-path")]
        database_path: String,
    },

    /// Remote key-value store and request queue REST API
    Http {
        #[serde(rename = "api-base-url")]
        api_base_url: String,

        #[serde(rename = "api-token", default)]
        api_token: Option<String>,
    },
}

/// Request fingerprint configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Header names that take part in the fingerprint
    #[serde(rename = "include-headers")]
    pub include_headers: Vec<String>,
}

/// Run evaluation configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Minimum number of items a run must produce
    #[serde(rename = "min-items")]
    pub min_items: u64,

    /// Per-spider overrides of `min-items`
    #[serde(rename = "spider-min-items")]
    pub spider_min_items: HashMap<String, u64>,
}

impl RunConfig {
    /// Returns the minimum item count for a spider, honouring overrides
    pub fn min_items_for(&self, spider: &str) -> u64 {
        self.spider_min_items
            .get(spider)
            .copied()
            .unwrap_or(self.min_items)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_items: 10,
            spider_min_items: HashMap::new(),
        }
    }
}
