//! Response cache across backends and runs

use crate::sqlite_config;
use plucker::cache::{CacheStorage, CachedResponse};
use plucker::config::{Config, StorageConfig};
use plucker::request::{Fingerprint, Headers, Request};
use plucker::run::RunContext;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_response() -> CachedResponse {
    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/html");
    CachedResponse::new("https://x/y", 200, headers, b"<html/>".to_vec())
}

fn fingerprint() -> Fingerprint {
    Fingerprint::from_hex("abc123").unwrap()
}

#[test]
fn test_expiration_scenario_in_memory() {
    let mut config = Config::default();
    config.cache.expiration_secs = 3600;
    let context = RunContext::open("jobs", config).unwrap();
    let cache = CacheStorage::open(&context).unwrap();

    cache.store_at(&fingerprint(), &sample_response(), 1000).unwrap();

    let hit = cache.retrieve_at(&fingerprint(), 1000).unwrap();
    assert_eq!(hit.url, "https://x/y");
    assert_eq!(hit.status, 200);
    assert_eq!(hit.headers.get("Content-Type"), Some("text/html"));
    assert_eq!(hit.body, b"<html/>");

    assert!(cache.retrieve_at(&fingerprint(), 4601).is_none());

    cache.close();
    context.close();
}

#[test]
fn test_cache_survives_across_runs() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("plucker.db");
    let request = Request::get("https://example.com/jobs?page=1").unwrap();

    {
        let context = RunContext::open("jobs", sqlite_config(&db_path)).unwrap();
        let cache = CacheStorage::open(&context).unwrap();
        assert!(cache.retrieve(&request).is_none());
        cache.store(&request, &sample_response());
        cache.close();
        context.close();
    }

    let context = RunContext::open("jobs", sqlite_config(&db_path)).unwrap();
    let cache = CacheStorage::open(&context).unwrap();
    let hit = cache.retrieve(&request).unwrap();
    assert_eq!(hit.body, b"<html/>");

    // Another spider has its own namespace
    let other_context = RunContext::open("companies", sqlite_config(&db_path)).unwrap();
    let other_cache = CacheStorage::open(&other_context).unwrap();
    assert!(other_cache.retrieve(&request).is_none());

    other_context.close();
    context.close();
}

#[test]
fn test_close_sweeps_expired_entries() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("plucker.db");
    let mut config = sqlite_config(&db_path);
    config.cache.expiration_secs = 60;

    let context = RunContext::open("jobs", config).unwrap();
    let cache = CacheStorage::open(&context).unwrap();
    cache.store_at(&fingerprint(), &sample_response(), 0).unwrap();

    let report = cache.sweep_at(30).unwrap();
    assert_eq!(report.deleted, 0);

    cache.close();
    // Stored at 0, closed long after: the sweep on close removed it
    assert!(cache.retrieve_at(&fingerprint(), 0).is_none());

    context.close();
}

#[test]
fn test_calls_after_close_are_misses() {
    let context = RunContext::open("jobs", Config::default()).unwrap();
    let cache = CacheStorage::open(&context).unwrap();
    cache.store_at(&fingerprint(), &sample_response(), 0).unwrap();

    context.close();

    assert!(cache.retrieve_at(&fingerprint(), 0).is_none());
    cache.store(&Request::get("https://example.com/").unwrap(), &sample_response());
    cache.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_store_roundtrip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/key-value-stores"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"data": {"id": "kv1"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/key-value-stores/kv1/records/abc123"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/key-value-stores/kv1/records/abc123.time"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/key-value-stores/kv1/records/abc123.time"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"1000".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/key-value-stores/kv1/records/abc123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(sample_response().encode().unwrap()),
        )
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.storage = StorageConfig::Http {
        api_base_url: server.uri(),
        api_token: Some("token".to_string()),
    };

    // The crawl side is synchronous; keep its blocking calls off the test runtime
    let crawl = tokio::task::spawn_blocking(move || {
        let context = RunContext::open("jobs", config).unwrap();
        let cache = CacheStorage::open(&context).unwrap();

        cache.store_at(&fingerprint(), &sample_response(), 1000).unwrap();
        let hit = cache.retrieve_at(&fingerprint(), 1000).unwrap();
        assert_eq!(hit.body, b"<html/>");
        assert_eq!(hit.stored_at, 1000);

        context.close();
    })
    .await;
    crawl.unwrap();

    let received = server.received_requests().await.unwrap();
    let puts: Vec<String> = received
        .iter()
        .filter(|r| r.method.to_string() == "PUT")
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(
        puts,
        vec![
            "/v2/key-value-stores/kv1/records/abc123",
            "/v2/key-value-stores/kv1/records/abc123.time"
        ]
    );
}
