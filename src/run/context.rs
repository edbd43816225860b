//! Resources shared by the cache and the scheduler during one crawl run

use crate::bridge::AsyncBridge;
use crate::config::Config;
use crate::request::{Fingerprinter, Sha256Fingerprinter};
use crate::storage::StorageClient;
use std::sync::Arc;

/// One crawl run's bridge, fingerprinter and storage client
///
/// The bridge is opened on construction and closed by [`RunContext::close`],
/// or once the last handle to it is dropped. Cache and scheduler opened from
/// the same context share it.
pub struct RunContext {
    spider_name: String,
    config: Config,
    bridge: Arc<AsyncBridge>,
    fingerprinter: Arc<dyn Fingerprinter>,
    storage: StorageClient,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("spider_name", &self.spider_name)
            .field("storage", &self.storage)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Builds the storage client and fingerprinter from configuration and
    /// opens the bridge
    ///
    /// # Arguments
    ///
    /// * `spider_name` - Name of the spider; it selects the storage namespaces
    /// * `config` - Validated configuration
    ///
    /// # Returns
    ///
    /// * `Ok(RunContext)` - Context with a running bridge
    /// * `Err(PluckerError)` - Storage could not be set up or the bridge not started
    pub fn open(spider_name: &str, config: Config) -> crate::Result<Self> {
        let storage = StorageClient::from_config(&config.storage)?;
        let fingerprinter = Arc::new(Sha256Fingerprinter::from_config(&config.fingerprint));
        Self::with_parts(spider_name, config, fingerprinter, storage)
    }

    /// Builds a context around an existing fingerprinter and storage client
    pub fn with_parts(
        spider_name: &str,
        config: Config,
        fingerprinter: Arc<dyn Fingerprinter>,
        storage: StorageClient,
    ) -> crate::Result<Self> {
        let bridge = Arc::new(AsyncBridge::new(config.bridge.clone()));
        bridge.open()?;
        tracing::info!("Opened run context for spider '{}'", spider_name);

        Ok(Self {
            spider_name: spider_name.to_string(),
            config,
            bridge,
            fingerprinter,
            storage,
        })
    }

    pub fn spider_name(&self) -> &str {
        &self.spider_name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<AsyncBridge> {
        &self.bridge
    }

    pub fn fingerprinter(&self) -> &Arc<dyn Fingerprinter> {
        &self.fingerprinter
    }

    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    /// Minimum item count this run must reach
    pub fn min_items(&self) -> u64 {
        self.config.run.min_items_for(&self.spider_name)
    }

    /// Stops the bridge; later cache and queue calls fail fast
    pub fn close(&self) {
        self.bridge.close();
        tracing::info!("Closed run context for spider '{}'", self.spider_name);
    }
}
