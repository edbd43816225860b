//! The background thread that owns the bridge's tokio runtime

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

const THREAD_NAME: &str = "plucker-storage-loop";

/// A running event-loop thread
pub(super) struct LoopThread {
    handle: Handle,
    thread_id: ThreadId,
    shutdown_tx: oneshot::Sender<()>,
    exited_rx: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

impl LoopThread {
    /// Spawns the thread and blocks until its runtime is built
    ///
    /// # Arguments
    ///
    /// * `drain_timeout` - How long the runtime may spend cancelling outstanding
    ///   work once a shutdown is requested
    pub(super) fn spawn(drain_timeout: Duration) -> std::io::Result<Self> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::io::Result<Handle>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = mpsc::sync_channel::<()>(1);

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));

                // Spawned work is only polled while block_on drives the loop
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });

                tracing::trace!("Event loop stopped, draining outstanding tasks");
                runtime.shutdown_timeout(drain_timeout);
                let _ = exited_tx.send(());
            })?;

        let thread_id = thread.thread().id();
        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(std::io::Error::other("event loop thread exited during startup"));
            }
        };

        Ok(Self {
            handle,
            thread_id,
            shutdown_tx,
            exited_rx,
            thread,
        })
    }

    pub(super) fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub(super) fn is_current_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Stops the loop and joins the thread within `join_timeout`
    ///
    /// On timeout the thread is detached rather than joined.
    pub(super) fn stop(self, join_timeout: Duration) {
        if self.shutdown_tx.send(()).is_err() {
            tracing::debug!("Event loop already stopped");
        }

        match self.exited_rx.recv_timeout(join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    tracing::warn!("Event loop thread panicked during shutdown");
                } else {
                    tracing::debug!("Event loop thread stopped");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Event loop thread did not stop within {:?}, abandoning it; in-flight writes may be lost",
                    join_timeout
                );
            }
        }
    }
}
