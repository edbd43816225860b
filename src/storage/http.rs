//! HTTP storage implementation
//!
//! Talks to a remote key-value / request-queue REST API. Every JSON response
//! is wrapped in a `{"data": ...}` envelope.

use crate::storage::traits::{CacheBackend, QueueBackend, StorageError, StorageResult};
use crate::storage::{AddOutcome, QueueRequest};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// How long a fetched request stays locked to this client
const HEAD_LOCK_SECS: u64 = 3600;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct KeyItem {
    key: String,
}

#[derive(Debug, Deserialize)]
struct KeyPage {
    #[serde(default)]
    items: Vec<KeyItem>,
}

#[derive(Debug, Deserialize)]
struct LockedItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LockedHead {
    #[serde(default)]
    items: Vec<LockedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueInfo {
    pending_request_count: u64,
}

/// Client for the remote storage API
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpStorage {
    /// Builds a client for the API at `base_url`
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root URL of the API, without the `/v2` prefix
    /// * `token` - Optional bearer token sent with every call
    ///
    /// # Returns
    ///
    /// * `Ok(HttpStorage)` - Client ready to open stores and queues
    /// * `Err(StorageError)` - Invalid URL or the HTTP client could not be built
    pub fn new(base_url: &str, token: Option<String>) -> StorageResult<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| StorageError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .user_agent(concat!("plucker/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Opens (creating if needed) the named key-value store
    pub async fn open_key_value_store(&self, name: &str) -> StorageResult<HttpKeyValueStore> {
        let id = self.open_named("key-value-stores", name).await?;
        tracing::debug!("Opened key-value store '{}' as {}", name, id);
        Ok(HttpKeyValueStore {
            storage: self.clone(),
            id,
        })
    }

    /// Opens (creating if needed) the named request queue
    pub async fn open_request_queue(&self, name: &str) -> StorageResult<HttpRequestQueue> {
        let id = self.open_named("request-queues", name).await?;
        tracing::debug!("Opened request queue '{}' as {}", name, id);
        Ok(HttpRequestQueue {
            storage: self.clone(),
            id,
        })
    }

    async fn open_named(&self, collection: &str, name: &str) -> StorageResult<String> {
        let mut url = self.endpoint(&[collection]);
        url.query_pairs_mut().append_pair("name", name);

        let response = self.send(self.client.post(url)).await?;
        let created: Created = read_data(response).await?;
        Ok(created.id)
    }

    /// Builds `<base>/v2/<segments...>`; each segment is percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v2").extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> StorageResult<Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        Ok(request.send().await?)
    }
}

/// Returns the response unchanged if its status is a success
async fn check_status(response: Response) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(StorageError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn read_data<T: DeserializeOwned>(response: Response) -> StorageResult<T> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    Ok(envelope.data)
}

/// Remote key-value store
#[derive(Debug)]
pub struct HttpKeyValueStore {
    storage: HttpStorage,
    id: String,
}

impl HttpKeyValueStore {
    fn record_url(&self, key: &str) -> Url {
        self.storage
            .endpoint(&["key-value-stores", self.id.as_str(), "records", key])
    }
}

#[async_trait]
impl CacheBackend for HttpKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let url = self.record_url(key);
        let response = self.storage.send(self.storage.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn set(&self, key: &str, value: Option<Vec<u8>>) -> StorageResult<()> {
        let url = self.record_url(key);
        match value {
            Some(value) => {
                let request = self
                    .storage
                    .client
                    .put(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(value);
                check_status(self.storage.send(request).await?).await?;
            }
            None => {
                let response = self.storage.send(self.storage.client.delete(url)).await?;
                // Deleting a missing key is not an error
                if response.status() != StatusCode::NOT_FOUND {
                    check_status(response).await?;
                }
            }
        }
        Ok(())
    }

    async fn list_keys(&self, after: Option<&str>, limit: usize) -> StorageResult<Vec<String>> {
        let mut url = self
            .storage
            .endpoint(&["key-value-stores", self.id.as_str(), "keys"]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(after) = after {
                query.append_pair("exclusiveStartKey", after);
            }
            query.append_pair("limit", &limit.to_string());
        }

        let response = self.storage.send(self.storage.client.get(url)).await?;
        let page: KeyPage = read_data(response).await?;
        Ok(page.items.into_iter().map(|item| item.key).collect())
    }
}

/// Remote request queue
#[derive(Debug)]
pub struct HttpRequestQueue {
    storage: HttpStorage,
    id: String,
}

impl HttpRequestQueue {
    fn request_url(&self, request_id: &str) -> Url {
        self.storage
            .endpoint(&["request-queues", self.id.as_str(), "requests", request_id])
    }
}

#[async_trait]
impl QueueBackend for HttpRequestQueue {
    async fn add_request(&self, request: QueueRequest) -> StorageResult<AddOutcome> {
        let url = self
            .storage
            .endpoint(&["request-queues", self.id.as_str(), "requests"]);
        let response = self
            .storage
            .send(self.storage.client.post(url).json(&request))
            .await?;
        read_data(response).await
    }

    async fn fetch_next_request(&self) -> StorageResult<Option<QueueRequest>> {
        let mut url = self
            .storage
            .endpoint(&["request-queues", self.id.as_str(), "head", "lock"]);
        url.query_pairs_mut()
            .append_pair("limit", "1")
            .append_pair("lockSecs", &HEAD_LOCK_SECS.to_string());

        let response = self.storage.send(self.storage.client.post(url)).await?;
        let head: LockedHead = read_data(response).await?;
        let Some(item) = head.items.into_iter().next() else {
            return Ok(None);
        };

        // The head listing is abbreviated; the full request carries the payload
        let response = self
            .storage
            .send(self.storage.client.get(self.request_url(&item.id)))
            .await?;
        let mut request: QueueRequest = read_data(response).await?;
        request.id.get_or_insert(item.id);
        Ok(Some(request))
    }

    async fn mark_handled(&self, request: &QueueRequest) -> StorageResult<()> {
        let request_id = request
            .id
            .as_deref()
            .ok_or_else(|| StorageError::NotFound(request.unique_key.clone()))?;

        let mut handled = request.clone();
        handled.handled_at = Some(chrono::Utc::now().to_rfc3339());

        let response = self
            .storage
            .send(self.storage.client.put(self.request_url(request_id)).json(&handled))
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn release_request(&self, request: &QueueRequest) -> StorageResult<()> {
        let request_id = request
            .id
            .as_deref()
            .ok_or_else(|| StorageError::NotFound(request.unique_key.clone()))?;
        let url = self.storage.endpoint(&[
            "request-queues",
            self.id.as_str(),
            "requests",
            request_id,
            "lock",
        ]);

        let response = self.storage.send(self.storage.client.delete(url)).await?;
        check_status(response).await?;
        Ok(())
    }

    async fn is_finished(&self) -> StorageResult<bool> {
        let url = self.storage.endpoint(&["request-queues", self.id.as_str()]);
        let response = self.storage.send(self.storage.client.get(url)).await?;
        let info: QueueInfo = read_data(response).await?;
        Ok(info.pending_request_count == 0)
    }
}
