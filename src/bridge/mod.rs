//! Synchronous access to async storage
//!
//! This module lets synchronous crawl code call async storage clients. An
//! [`AsyncBridge`] owns exactly one background thread running a single-threaded
//! tokio runtime. Callers hand a future to the loop thread and block on a
//! one-shot completion channel until it finishes or the call timeout elapses.
//!
//! # Lifecycle
//!
//! ```text
//! new() -> open() -> run_sync()* -> close()
//! ```
//!
//! The bridge is an explicitly owned resource: one instance per crawl run,
//! shared by the cache and the scheduler through an `Arc`.

mod loop_thread;

pub use crate::config::BridgeConfig;

use loop_thread::LoopThread;
use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the bridge to synchronous callers
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge is already open")]
    AlreadyOpen,

    #[error("Bridge has been closed")]
    Closed,

    #[error("Bridge is not open")]
    NotOpen,

    #[error("Failed to start event loop thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation was cancelled before completing")]
    Cancelled,

    #[error("Blocking call issued from the event loop thread itself")]
    Reentrant,
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

enum BridgeState {
    Idle,
    Running(LoopThread),
    Closed,
}

/// Runs async work on a dedicated event-loop thread on behalf of sync callers
pub struct AsyncBridge {
    config: BridgeConfig,
    state: Mutex<BridgeState>,
}

impl std::fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish()
    }
}

impl AsyncBridge {
    /// Creates a bridge that is not yet running
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BridgeState::Idle),
        }
    }

    /// Returns the bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Spawns the background thread and waits until its event loop is ready
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The loop thread is running
    /// * `Err(BridgeError::AlreadyOpen)` - `open` was already called
    /// * `Err(BridgeError::Closed)` - The bridge was closed and cannot be reused
    /// * `Err(BridgeError::Spawn)` - The thread or runtime could not be created
    pub fn open(&self) -> BridgeResult<()> {
        let mut state = self.lock_state();
        match *state {
            BridgeState::Running(_) => return Err(BridgeError::AlreadyOpen),
            BridgeState::Closed => return Err(BridgeError::Closed),
            BridgeState::Idle => {}
        }

        tracing::debug!("Starting event loop thread for storage calls");
        let loop_thread = LoopThread::spawn(self.config.shutdown_timeout() / 2)?;
        *state = BridgeState::Running(loop_thread);
        Ok(())
    }

    /// Returns true while the loop thread is running
    pub fn is_open(&self) -> bool {
        matches!(*self.lock_state(), BridgeState::Running(_))
    }

    /// Runs a future on the loop thread, blocking for at most the call timeout
    pub fn run_sync<F, T>(&self, work: F) -> BridgeResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_sync_with_timeout(work, self.config.call_timeout())
    }

    /// Runs a future on the loop thread, blocking for at most `timeout`
    ///
    /// A timeout aborts the submitted task and is reported as
    /// [`BridgeError::Timeout`]; it is never retried here.
    pub fn run_sync_with_timeout<F, T>(&self, work: F, timeout: Duration) -> BridgeResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        // The lock only guards the hand-off; it is released before blocking.
        let handle = {
            let state = self.lock_state();
            match &*state {
                BridgeState::Running(loop_thread) => {
                    if loop_thread.is_current_thread() {
                        return Err(BridgeError::Reentrant);
                    }
                    loop_thread.handle()
                }
                BridgeState::Idle => return Err(BridgeError::NotOpen),
                BridgeState::Closed => return Err(BridgeError::Closed),
            }
        };

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let task = handle.spawn(async move {
            let output = work.await;
            let _ = done_tx.send(output);
        });

        match done_rx.recv_timeout(timeout) {
            Ok(output) => Ok(output),
            Err(RecvTimeoutError::Timeout) => {
                task.abort();
                tracing::debug!("Storage call exceeded {:?}, task aborted", timeout);
                Err(BridgeError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Cancelled),
        }
    }

    /// Cancels outstanding work, stops the loop and joins its thread
    ///
    /// Never fails: problems during shutdown are logged. If the thread does not
    /// exit within the shutdown timeout it is detached and a warning is logged;
    /// writes still in flight at that point may be lost.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), BridgeState::Closed);
        match previous {
            BridgeState::Running(loop_thread) => {
                tracing::debug!("Stopping event loop thread");
                loop_thread.stop(self.config.shutdown_timeout());
            }
            BridgeState::Idle | BridgeState::Closed => {
                tracing::trace!("Bridge closed without a running loop thread");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        if self.is_open() {
            tracing::debug!("Bridge dropped while open, closing");
            self.close();
        }
    }
}
