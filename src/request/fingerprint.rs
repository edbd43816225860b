//! Request fingerprints
//!
//! A fingerprint identifies a request independently of incidental
//! differences such as query parameter order or URL fragments. It is the
//! response cache key and the request queue's deduplication key.

use crate::config::FingerprintConfig;
use crate::request::{canonicalize_url, Request};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing a fingerprint
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Fingerprint cannot be empty")]
    Empty,

    #[error("Fingerprint must be hexadecimal, got '{0}'")]
    NotHex(String),
}

/// Hex-encoded request fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Creates a fingerprint from raw digest bytes
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    /// Parses a hex fingerprint
    pub fn from_hex(value: &str) -> Result<Self, FingerprintError> {
        if value.is_empty() {
            return Err(FingerprintError::Empty);
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FingerprintError::NotHex(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Computes fingerprints for requests
///
/// Implementations must be deterministic and stable across process
/// restarts: equal requests always produce equal fingerprints.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, request: &Request) -> Fingerprint;
}

/// SHA-256 over method, canonical URL, selected headers and body
#[derive(Debug, Clone, Default)]
pub struct Sha256Fingerprinter {
    include_headers: Vec<String>,
}

/// Feeds one length-prefixed field so adjacent fields cannot run together
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl Sha256Fingerprinter {
    /// Creates a fingerprinter that ignores all headers
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fingerprinter that includes the given header names
    pub fn with_headers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut include_headers: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_ascii_lowercase())
            .collect();
        include_headers.sort();
        include_headers.dedup();
        Self { include_headers }
    }

    pub fn from_config(config: &FingerprintConfig) -> Self {
        Self::with_headers(&config.include_headers)
    }
}

impl Fingerprinter for Sha256Fingerprinter {
    fn fingerprint(&self, request: &Request) -> Fingerprint {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, request.method.as_str().as_bytes());
        update_field(&mut hasher, canonicalize_url(&request.url).as_bytes());

        // Names are sorted at construction, so header order is stable
        for name in &self.include_headers {
            if !request.headers.contains(name) {
                continue;
            }
            let values = request.headers.get_all(name);
            update_field(&mut hasher, name.as_bytes());
            hasher.update((values.len() as u64).to_be_bytes());
            for value in values {
                update_field(&mut hasher, value.as_bytes());
            }
        }

        update_field(&mut hasher, &request.body);
        Fingerprint::from_digest(&hasher.finalize())
    }
}
