use crate::config::types::{BridgeConfig, CacheConfig, Config, FingerprintConfig, StorageConfig};
use crate::{ConfigError, ConfigResult};
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_bridge_config(&config.bridge)?;
    validate_cache_config(&config.cache)?;
    validate_storage_config(&config.storage)?;
    validate_fingerprint_config(&config.fingerprint)?;
    Ok(())
}

/// Validates bridge timeouts
fn validate_bridge_config(config: &BridgeConfig) -> ConfigResult<()> {
    for (name, value) in [
        ("call_timeout_ms", config.call_timeout_ms),
        ("maintenance_timeout_ms", config.maintenance_timeout_ms),
        ("shutdown_timeout_ms", config.shutdown_timeout_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be > 0", name)));
        }
    }

    if config.maintenance_timeout_ms < config.call_timeout_ms {
        return Err(ConfigError::Validation(format!(
            "maintenance_timeout_ms ({}) must be >= call_timeout_ms ({})",
            config.maintenance_timeout_ms, config.call_timeout_ms
        )));
    }

    Ok(())
}

/// Validates cache configuration
fn validate_cache_config(config: &CacheConfig) -> ConfigResult<()> {
    if config.expiration_max_items < 1 {
        return Err(ConfigError::Validation(format!(
            "expiration_max_items must be >= 1, got {}",
            config.expiration_max_items
        )));
    }

    Ok(())
}

/// Validates storage backend settings
fn validate_storage_config(config: &StorageConfig) -> ConfigResult<()> {
    match config {
        StorageConfig::Memory => Ok(()),
        StorageConfig::Sqlite { database_path } => {
            if database_path.is_empty() {
                return Err(ConfigError::Validation(
                    "database_path cannot be empty".to_string(),
                ));
            }
            Ok(())
        }
        StorageConfig::Http { api_base_url, .. } => {
            let url = Url::parse(api_base_url)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api_base_url: {}", e)))?;

            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::InvalidUrl(format!(
                    "api_base_url must use http or https, got '{}'",
                    url.scheme()
                )));
            }
            Ok(())
        }
    }
}

/// Validates fingerprint header names
fn validate_fingerprint_config(config: &FingerprintConfig) -> ConfigResult<()> {
    for name in &config.include_headers {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ConfigError::Validation(format!(
                "Invalid header name in include_headers: '{}'",
                name
            )));
        }
    }

    Ok(())
}
