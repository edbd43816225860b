//! Configuration module for Plucker
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional; missing values fall back to defaults.
//!
//! # Example
//!
//! ```no_run
//! use plucker::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("plucker.toml")).unwrap();
//! println!("Cache entries expire after {}s", config.cache.expiration_secs);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BridgeConfig, CacheConfig, Config, FingerprintConfig, RunConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{load_config, parse_config};
