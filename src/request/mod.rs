//! Crawl requests and their identities
//!
//! This module defines:
//! - `Request`: a pending HTTP request as the crawl engine sees it
//! - `Headers`: the ordered, case-insensitive header map shared with responses
//! - `Fingerprint` / `Fingerprinter`: request identity used for caching and deduplication
//! - URL canonicalization used by fingerprinting

mod canonical;
mod fingerprint;
mod headers;

pub use canonical::canonicalize_url;
pub use fingerprint::{Fingerprint, FingerprintError, Fingerprinter, Sha256Fingerprinter};
pub use headers::Headers;
pub use reqwest::Method;

use serde_json::{Map, Value};
use url::Url;

/// Metadata key counting how often a request has been resubmitted
pub const RETRY_TIMES_KEY: &str = "retry_times";

/// A request waiting to be fetched
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Vec<u8>,

    /// Free-form metadata carried through the queue
    pub meta: Map<String, Value>,

    /// Skip queue deduplication for this request
    pub dont_filter: bool,
}

impl Request {
    /// Creates a GET request for a URL
    pub fn new(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Headers::new(),
            body: Vec::new(),
            meta: Map::new(),
            dont_filter: false,
        }
    }

    /// Parses a URL and creates a GET request for it
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }

    /// Number of times this request has been resubmitted
    pub fn retry_times(&self) -> u64 {
        self.meta
            .get(RETRY_TIMES_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Builds the fresh request a retry layer enqueues after a failed fetch
    ///
    /// Dequeued requests are already marked handled, so a retry is a new
    /// queue entry: it bypasses deduplication and counts its attempts.
    pub fn resubmission(&self) -> Self {
        let mut retry = self.clone();
        retry
            .meta
            .insert(RETRY_TIMES_KEY.to_string(), Value::from(self.retry_times() + 1));
        retry.dont_filter = true;
        retry
    }
}
