//! Request scheduler across runs and alongside the cache

use crate::sqlite_config;
use plucker::cache::{CacheStorage, CachedResponse};
use plucker::config::Config;
use plucker::request::{Headers, Method, Request};
use plucker::run::{evaluate, RunContext, RunStats, FINISHED};
use plucker::scheduler::{EnqueueOutcome, RequestScheduler};
use tempfile::TempDir;

#[test]
fn test_crawl_loop_drains_frontier() {
    let context = RunContext::open("jobs", Config::default()).unwrap();
    let scheduler = RequestScheduler::open(&context).unwrap();
    let mut stats = RunStats::new();

    for page in 1..=3 {
        let request = Request::get(&format!("https://example.com/jobs?page={}", page)).unwrap();
        assert_eq!(scheduler.enqueue(request), EnqueueOutcome::Added);
    }
    // Rediscovered link
    assert!(scheduler.enqueue_request(Request::get("https://example.com/jobs?page=1").unwrap()));

    let mut fetched = Vec::new();
    while scheduler.has_pending_requests() {
        match scheduler.next_request() {
            Some(request) => {
                fetched.push(request.url.to_string());
                stats.record_item();
            }
            None => break,
        }
    }
    stats.finish(FINISHED);

    assert_eq!(
        fetched,
        vec![
            "https://example.com/jobs?page=1",
            "https://example.com/jobs?page=2",
            "https://example.com/jobs?page=3"
        ]
    );
    assert_eq!(evaluate(&stats, 3), Ok(()));

    context.close();
}

#[test]
fn test_frontier_survives_across_runs() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("plucker.db");
    let first = Request::get("https://example.com/a").unwrap();
    let second = Request::get("https://example.com/b")
        .unwrap()
        .with_method(Method::POST)
        .with_body(b"q=rust".to_vec());

    {
        let context = RunContext::open("jobs", sqlite_config(&db_path)).unwrap();
        let scheduler = RequestScheduler::open(&context).unwrap();
        scheduler.enqueue(first.clone());
        scheduler.enqueue(second.clone());
        assert_eq!(scheduler.next_request(), Some(first.clone()));
        context.close();
    }

    let context = RunContext::open("jobs", sqlite_config(&db_path)).unwrap();
    let scheduler = RequestScheduler::open(&context).unwrap();

    // Handled in the previous run, so still deduplicated
    assert_eq!(scheduler.enqueue(first), EnqueueOutcome::AlreadyPresent);
    assert!(scheduler.has_pending_requests());
    assert_eq!(scheduler.next_request(), Some(second));
    assert!(!scheduler.has_pending_requests());

    context.close();
}

#[test]
fn test_failed_fetch_is_resubmitted() {
    let context = RunContext::open("jobs", Config::default()).unwrap();
    let scheduler = RequestScheduler::open(&context).unwrap();

    scheduler.enqueue(Request::get("https://example.com/flaky").unwrap());
    let attempt = scheduler.next_request().unwrap();
    assert!(!scheduler.has_pending_requests());

    // The fetch failed: the retry layer schedules a fresh request
    assert_eq!(scheduler.enqueue(attempt.resubmission()), EnqueueOutcome::Added);
    assert!(scheduler.has_pending_requests());

    let retry = scheduler.next_request().unwrap();
    assert_eq!(retry.retry_times(), 1);
    assert_eq!(retry.url, attempt.url);

    context.close();
}

#[test]
fn test_cache_and_frontier_share_storage_without_crossing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("plucker.db");
    let context = RunContext::open("jobs", sqlite_config(&db_path)).unwrap();

    let cache = CacheStorage::open(&context).unwrap();
    let scheduler = RequestScheduler::open(&context).unwrap();
    let request = Request::get("https://example.com/a").unwrap();

    scheduler.enqueue(request.clone());
    assert!(cache.retrieve(&request).is_none());

    let fetched = scheduler.next_request().unwrap();
    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/html");
    cache.store(
        &fetched,
        &CachedResponse::new(fetched.url.as_str(), 200, headers, b"<p>a</p>".to_vec()),
    );

    assert_eq!(cache.retrieve(&request).unwrap().body, b"<p>a</p>");
    assert_eq!(scheduler.enqueue(request), EnqueueOutcome::AlreadyPresent);
    assert_eq!(cache.sweep_at(0).unwrap().examined, 1);

    context.close();
}

#[test]
fn test_scheduler_after_close_reports_no_work() {
    let context = RunContext::open("jobs", Config::default()).unwrap();
    let scheduler = RequestScheduler::open(&context).unwrap();
    scheduler.enqueue(Request::get("https://example.com/a").unwrap());

    context.close();

    assert!(!scheduler.has_pending_requests());
    assert_eq!(scheduler.next_request(), None);
    assert_eq!(
        scheduler.enqueue(Request::get("https://example.com/b").unwrap()),
        EnqueueOutcome::Failed
    );
}
