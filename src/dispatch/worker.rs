//! Delivery worker boundary
//!
//! Transmitting frames to a viewer (HTTP multipart framing, socket writes)
//! belongs to an external collaborator implementing [`DeliveryHandler`]. The
//! dispatcher owns the worker's lifecycle: it supplies the client handle, a
//! [`WorkerContext`] for reading frames, and a cancellation token that
//! `stop()` trips before aborting stragglers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::ClientHandle;
use crate::error::Result;
use crate::frame::{FrameStore, ReadyFrame};

/// Per-viewer delivery logic
///
/// `deliver` runs once per admitted viewer and should return when the viewer
/// disconnects, on a transmission error, or when the context is cancelled.
/// Returning (or being aborted) frees the viewer's slot and closes the
/// connection.
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Connection type handed over by the accept collaborator
    type Connection: Send + 'static;

    fn deliver(
        &self,
        client: ClientHandle<Self::Connection>,
        ctx: WorkerContext,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// What a delivery worker needs from the pipeline
#[derive(Clone)]
pub struct WorkerContext {
    slot: usize,
    client_id: u64,
    store: Arc<FrameStore>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl WorkerContext {
    pub fn new(
        slot: usize,
        client_id: u64,
        store: Arc<FrameStore>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            slot,
            client_id,
            store,
            cancel,
            poll_interval,
        }
    }

    /// Slot this worker occupies
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// The shared frame store
    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the pipeline asks this worker to exit
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Wait for a ready frame newer than `after`
    ///
    /// Polls the store at the configured interval. Returns `None` once the
    /// worker is cancelled.
    pub async fn next_frame(&self, after: Option<u64>) -> Option<ReadyFrame> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(frame) = self.store.latest_ready(after) {
                return Some(frame);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Bookkeeping after a frame has been transmitted
    ///
    /// Advances the client's sequence and bumps the sent counter. The buffer
    /// goes back to the capture path along with any older frame the viewer
    /// skipped.
    pub fn frame_sent<C>(&self, client: &mut ClientHandle<C>, frame: ReadyFrame) {
        let sequence = frame.sequence();
        client.mark_delivered(sequence);
        self.store.record_sent();
        self.store.release_ready(frame);
        self.store.release_older(sequence);
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("slot", &self.slot)
            .field("client_id", &self.client_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A boxed, ready-to-run delivery worker
pub type WorkerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Worker spawn failure
#[derive(Debug, Clone)]
pub struct SpawnError {
    /// Slot the worker was meant for
    pub slot: usize,
    /// Why the spawn failed
    pub reason: String,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to spawn worker for slot {}: {}", self.slot, self.reason)
    }
}

impl std::error::Error for SpawnError {}

/// Places delivery workers on an executor
///
/// On failure the task must be dropped without being polled; dropping it
/// releases the slot and closes the connection.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn_worker(
        &self,
        slot: usize,
        task: WorkerTask,
    ) -> std::result::Result<JoinHandle<()>, SpawnError>;
}

/// Spawns workers onto a tokio runtime
///
/// Pass the handle of a dedicated runtime to keep delivery work off the
/// threads servicing capture.
#[derive(Debug, Clone)]
pub struct RuntimeSpawner {
    handle: Handle,
}

impl RuntimeSpawner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner on the runtime of the calling task
    ///
    /// Panics outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl WorkerSpawner for RuntimeSpawner {
    fn spawn_worker(
        &self,
        _slot: usize,
        task: WorkerTask,
    ) -> std::result::Result<JoinHandle<()>, SpawnError> {
        Ok(self.handle.spawn(task))
    }
}
