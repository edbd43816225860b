//! Plucker: persistent response cache and crawl frontier for repeated crawls
//!
//! This crate bridges a synchronous, single-threaded crawl engine to async-only
//! remote storage. It provides:
//! - An [`AsyncBridge`] that drives storage futures on one dedicated event-loop thread
//! - A [`CacheStorage`] serving previously fetched responses until they expire
//! - A [`RequestScheduler`] backed by a durable, deduplicating request queue
//! - A run evaluator deciding whether a finished crawl is acceptable

pub mod bridge;
pub mod cache;
pub mod config;
pub mod request;
pub mod run;
pub mod scheduler;
pub mod storage;

use thiserror::Error;

/// Main error type for Plucker operations
#[derive(Debug, Error)]
pub enum PluckerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge::BridgeError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] scheduler::ConversionError),

    #[error("Run policy violated: {0}")]
    Policy(#[from] run::PolicyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Plucker operations
pub type Result<T> = std::result::Result<T, PluckerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use bridge::{AsyncBridge, BridgeConfig, BridgeError};
pub use cache::{CacheStorage, CachedResponse};
pub use config::Config;
pub use request::{Fingerprint, Fingerprinter, Headers, Request, Sha256Fingerprinter};
pub use run::{evaluate, PolicyError, RunContext, RunStats};
pub use scheduler::{EnqueueOutcome, RequestScheduler};
pub use storage::{CacheBackend, QueueBackend, StorageClient};
