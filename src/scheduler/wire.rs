//! Conversion between crawl requests and the queue's wire form

use crate::request::{Fingerprint, Headers, Method, Request};
use crate::storage::QueueRequest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Methods the queue can carry
pub const SUPPORTED_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "TRACE", "CONNECT",
];

/// Errors for requests that cannot be represented on the wire
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),
}

fn check_method(method: &Method) -> Result<(), ConversionError> {
    if SUPPORTED_METHODS.contains(&method.as_str()) {
        Ok(())
    } else {
        Err(ConversionError::UnsupportedMethod(method.to_string()))
    }
}

fn check_scheme(url: &Url) -> Result<(), ConversionError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConversionError::UnsupportedScheme(other.to_string())),
    }
}

/// Returns the queue's deduplication key for a request
///
/// Requests flagged `dont_filter` get a random suffix so they never collide
/// with an earlier entry.
pub fn unique_key(request: &Request, fingerprint: &Fingerprint) -> String {
    if request.dont_filter {
        format!("{}-{}", fingerprint, uuid::Uuid::new_v4())
    } else {
        fingerprint.to_string()
    }
}

/// Converts a request to its wire form
///
/// # Arguments
///
/// * `request` - The request to schedule
/// * `fingerprint` - The request's fingerprint, used as its deduplication key
///
/// # Returns
///
/// * `Ok(QueueRequest)` - The wire form, without a queue-assigned id
/// * `Err(ConversionError)` - The method or URL scheme is not supported
pub fn to_wire(request: &Request, fingerprint: &Fingerprint) -> Result<QueueRequest, ConversionError> {
    check_method(&request.method)?;
    check_scheme(&request.url)?;

    let headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .map(|(name, values)| (name.to_string(), values.join(", ")))
        .collect();

    let payload = if request.body.is_empty() {
        None
    } else {
        Some(STANDARD.encode(&request.body))
    };

    Ok(QueueRequest {
        id: None,
        unique_key: unique_key(request, fingerprint),
        url: request.url.to_string(),
        method: request.method.to_string(),
        headers,
        payload,
        user_data: request.meta.clone(),
        handled_at: None,
    })
}

/// Rebuilds a request from its wire form
pub fn from_wire(wire: &QueueRequest) -> Result<Request, ConversionError> {
    let method = Method::from_bytes(wire.method.as_bytes())
        .map_err(|_| ConversionError::UnsupportedMethod(wire.method.clone()))?;
    check_method(&method)?;

    let url = Url::parse(&wire.url).map_err(|e| ConversionError::InvalidUrl {
        url: wire.url.clone(),
        reason: e.to_string(),
    })?;
    check_scheme(&url)?;

    let body = match &wire.payload {
        Some(payload) => STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| ConversionError::InvalidPayload(e.to_string()))?,
        None => Vec::new(),
    };

    let headers: Headers = wire
        .headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();

    let mut request = Request::new(url).with_method(method).with_body(body);
    request.headers = headers;
    request.meta = wire.user_data.clone();
    Ok(request)
}
