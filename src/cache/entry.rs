//! Cached response entries and their stored payload format
//!
//! A payload is gzip-compressed JSON:
//!
//! ```text
//! {"status": 200, "url": "...", "headers": [["content-type", ["text/html"]]], "body": "<base64>"}
//! ```
//!
//! The creation time is not part of the payload; it lives under its own key so
//! freshness can be checked without decompressing anything.

use crate::cache::{CacheError, CacheResult};
use crate::request::Headers;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// A previously fetched HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Final URL of the response
    pub url: String,

    pub status: u16,

    pub headers: Headers,

    /// Raw body bytes, kept exactly as fetched
    pub body: Vec<u8>,

    /// Unix seconds at which the entry was stored (0 until stored)
    pub stored_at: i64,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    status: u16,
    url: String,
    headers: Headers,
    body: String,
}

impl CachedResponse {
    pub fn new(url: impl Into<String>, status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            status,
            headers,
            body,
            stored_at: 0,
        }
    }

    /// Serializes and compresses the response into its stored payload
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<u8>)` - gzip-compressed JSON payload
    /// * `Err(CacheError)` - Serialization or compression failed
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        let payload = Payload {
            status: self.status,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: STANDARD.encode(&self.body),
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, &payload)?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }

    /// Decompresses and deserializes a stored payload
    ///
    /// Any failure means the entry is corrupt and is reported as
    /// [`CacheError::CorruptEntry`].
    pub fn decode(key: &str, bytes: &[u8], stored_at: i64) -> CacheResult<Self> {
        let corrupt = |reason: String| CacheError::CorruptEntry {
            key: key.to_string(),
            reason,
        };

        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| corrupt(format!("decompression failed: {}", e)))?;

        let payload: Payload = serde_json::from_slice(&json)
            .map_err(|e| corrupt(format!("invalid payload: {}", e)))?;

        let body = STANDARD
            .decode(payload.body.as_bytes())
            .map_err(|e| corrupt(format!("invalid body encoding: {}", e)))?;

        Ok(Self {
            url: payload.url,
            status: payload.status,
            headers: payload.headers,
            body,
            stored_at,
        })
    }
}
