//! Crawl frontier backed by a durable request queue
//!
//! [`RequestScheduler`] pushes discovered requests into a deduplicating queue
//! (namespace `frontier-<spider>`) and pulls them back one at a time.
//!
//! A dequeued request is marked handled immediately, before it is fetched.
//! A failed fetch therefore never comes back from the queue on its own: the
//! retry layer enqueues [`Request::resubmission`] instead, which bypasses
//! deduplication. A crash between dequeue and fetch loses that attempt; the
//! run's minimum item count is what catches such losses.

mod wire;

pub use wire::{from_wire, to_wire, unique_key, ConversionError, SUPPORTED_METHODS};

use crate::bridge::AsyncBridge;
use crate::request::{Fingerprinter, Request};
use crate::run::RunContext;
use crate::storage::{QueueBackend, QueueRequest, StorageError, StorageResult};
use std::sync::Arc;

/// Request queue name prefix; the spider name completes it
pub const FRONTIER_NAMESPACE_PREFIX: &str = "frontier-";

/// Result of scheduling one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The request is new to the queue
    Added,

    /// A request with the same fingerprint was already queued or handled
    AlreadyPresent,

    /// The request cannot be represented on the wire and was dropped
    Rejected,

    /// The queue could not be reached; the request was not scheduled
    Failed,
}

impl EnqueueOutcome {
    pub fn was_already_present(&self) -> bool {
        matches!(self, Self::AlreadyPresent)
    }

    /// Returns true if the request is known to be in the queue now
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Added | Self::AlreadyPresent)
    }
}

/// Scheduler for one crawl run
pub struct RequestScheduler {
    bridge: Arc<AsyncBridge>,
    backend: Arc<dyn QueueBackend>,
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler").finish_non_exhaustive()
    }
}

impl RequestScheduler {
    /// Opens the run's request queue (`frontier-<spider>`)
    ///
    /// # Arguments
    ///
    /// * `context` - The crawl run providing the bridge, storage and fingerprinter
    ///
    /// # Returns
    ///
    /// * `Ok(RequestScheduler)` - Scheduler ready to accept requests
    /// * `Err(PluckerError)` - The queue could not be opened
    pub fn open(context: &RunContext) -> crate::Result<Self> {
        let name = format!("{}{}", FRONTIER_NAMESPACE_PREFIX, context.spider_name());
        tracing::debug!("Opening scheduler's '{}' request queue", name);

        let storage = context.storage().clone();
        let backend = context
            .bridge()
            .run_sync(async move { storage.open_queue_backend(&name).await })??;

        Ok(Self::with_backend(
            Arc::clone(context.bridge()),
            backend,
            Arc::clone(context.fingerprinter()),
        ))
    }

    /// Creates a scheduler over an already opened queue
    pub fn with_backend(
        bridge: Arc<AsyncBridge>,
        backend: Arc<dyn QueueBackend>,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        Self {
            bridge,
            backend,
            fingerprinter,
        }
    }

    /// Adds a request to the queue unless an equal request is already there
    ///
    /// Never fails: conversion and storage problems are logged and reported
    /// through the outcome.
    pub fn enqueue(&self, request: Request) -> EnqueueOutcome {
        let fingerprint = self.fingerprinter.fingerprint(&request);
        let wire = match to_wire(&request, &fingerprint) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::error!(
                    "Failed to convert request {} {} for the queue: {}",
                    request.method,
                    request.url,
                    e
                );
                return EnqueueOutcome::Rejected;
            }
        };

        let backend = Arc::clone(&self.backend);
        match self
            .bridge
            .run_sync(async move { backend.add_request(wire).await })
        {
            Ok(Ok(added)) if added.was_already_present => {
                tracing::debug!("Request {} already in queue", request.url);
                EnqueueOutcome::AlreadyPresent
            }
            Ok(Ok(added)) => {
                tracing::debug!("Enqueued {} as {}", request.url, added.request_id);
                EnqueueOutcome::Added
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to enqueue {}: {}", request.url, e);
                EnqueueOutcome::Failed
            }
            Err(e) => {
                tracing::error!("Failed to enqueue {}: {}", request.url, e);
                EnqueueOutcome::Failed
            }
        }
    }

    /// Schedules a request, returning whether it was already present
    ///
    /// `false` also covers requests that could not be scheduled at all; use
    /// [`RequestScheduler::enqueue`] to tell the cases apart.
    pub fn enqueue_request(&self, request: Request) -> bool {
        self.enqueue(request).was_already_present()
    }

    /// Returns true while the queue reports unfinished work
    ///
    /// A storage failure is logged and reported as no pending work, which
    /// ends the crawl; the logged error then fails the run evaluation.
    pub fn has_pending_requests(&self) -> bool {
        let backend = Arc::clone(&self.backend);
        match self.bridge.run_sync(async move { backend.is_finished().await }) {
            Ok(Ok(finished)) => !finished,
            Ok(Err(e)) => {
                tracing::error!("Failed to check the request queue: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("Failed to check the request queue: {}", e);
                false
            }
        }
    }

    /// Dequeues the next request and marks it handled
    ///
    /// Returns `None` when nothing is available right now, which does not
    /// mean the queue is finished; see
    /// [`RequestScheduler::has_pending_requests`].
    pub fn next_request(&self) -> Option<Request> {
        let backend = Arc::clone(&self.backend);
        let wire = match self.bridge.run_sync(claim_next(backend)) {
            Ok(Ok(Some(wire))) => wire,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                tracing::error!("Failed to fetch the next request: {}", e);
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to fetch the next request: {}", e);
                return None;
            }
        };

        match from_wire(&wire) {
            Ok(request) => {
                tracing::debug!("Dequeued {} {}", request.method, request.url);
                Some(request)
            }
            Err(e) => {
                tracing::error!("Dropping queued request {}: {}", wire.unique_key, e);
                None
            }
        }
    }
}

/// Claims the queue head on its own task
///
/// The claim runs to completion even when the bridge gives up waiting and
/// aborts the calling task, so an entry is never stranded between fetch and
/// mark. A claim finished after the timeout drops that attempt.
async fn claim_next(backend: Arc<dyn QueueBackend>) -> StorageResult<Option<QueueRequest>> {
    tokio::spawn(async move { backend.claim_next_request().await })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}
