//! Bounded admission queue

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::client::ClientHandle;

/// Why a viewer was not admitted
///
/// The handle is returned so the caller can close it; ownership never
/// silently disappears.
pub enum SubmitError<C> {
    /// Admission queue is full
    QueueFull(ClientHandle<C>),
    /// Pipeline is not running
    NotRunning(ClientHandle<C>),
}

impl<C> SubmitError<C> {
    /// Take back the rejected handle
    pub fn into_handle(self) -> ClientHandle<C> {
        match self {
            SubmitError::QueueFull(h) | SubmitError::NotRunning(h) => h,
        }
    }

    /// Close the rejected connection
    pub fn close(self) {
        self.into_handle().close();
    }
}

impl<C> fmt::Debug for SubmitError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull(h) => f.debug_tuple("QueueFull").field(h).finish(),
            SubmitError::NotRunning(h) => f.debug_tuple("NotRunning").field(h).finish(),
        }
    }
}

impl<C> fmt::Display for SubmitError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull(h) => write!(f, "Admission queue full, client {} rejected", h.id()),
            SubmitError::NotRunning(h) => {
                write!(f, "Pipeline not running, client {} rejected", h.id())
            }
        }
    }
}

impl<C> std::error::Error for SubmitError<C> {}

/// Producer side of the admission queue
pub struct AdmissionQueue<C> {
    tx: mpsc::Sender<ClientHandle<C>>,
    capacity: usize,
}

/// Consumer side of the admission queue, owned by the dispatcher
pub struct AdmissionReceiver<C> {
    rx: mpsc::Receiver<ClientHandle<C>>,
}

/// Create a bounded admission queue
pub fn admission_queue<C>(capacity: usize) -> (AdmissionQueue<C>, AdmissionReceiver<C>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (AdmissionQueue { tx, capacity }, AdmissionReceiver { rx })
}

impl<C> AdmissionQueue<C> {
    /// Enqueue a viewer without waiting
    pub fn submit(&self, handle: ClientHandle<C>) -> Result<(), SubmitError<C>> {
        self.tx.try_send(handle).map_err(|e| match e {
            TrySendError::Full(h) => SubmitError::QueueFull(h),
            TrySendError::Closed(h) => SubmitError::NotRunning(h),
        })
    }

    /// Viewers currently waiting
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the dispatcher side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<C> Clone for AdmissionQueue<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<C> AdmissionReceiver<C> {
    /// Wait for the next viewer
    ///
    /// Returns `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<ClientHandle<C>> {
        self.rx.recv().await
    }

    /// Refuse further submissions and close everything still queued
    pub fn close_pending(&mut self) -> usize {
        self.rx.close();
        let mut closed = 0;
        while let Ok(handle) = self.rx.try_recv() {
            handle.close();
            closed += 1;
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_submit_and_recv() {
        let (queue, mut rx) = admission_queue::<()>(2);

        assert_ok!(queue.submit(ClientHandle::new(1, ())));
        assert_eq!(queue.len(), 1);

        let handle = rx.recv().await.unwrap();
        assert_eq!(handle.id(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_returns_handle() {
        let (queue, _rx) = admission_queue::<()>(2);

        assert_ok!(queue.submit(ClientHandle::new(1, ())));
        assert_ok!(queue.submit(ClientHandle::new(2, ())));
        let err = assert_err!(queue.submit(ClientHandle::new(3, ())));

        assert!(matches!(err, SubmitError::QueueFull(_)));
        assert_eq!(err.into_handle().id(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_closed_queue_reports_not_running() {
        let (queue, mut rx) = admission_queue::<()>(2);
        assert_ok!(queue.submit(ClientHandle::new(1, ())));

        assert_eq!(rx.close_pending(), 1);

        let err = assert_err!(queue.submit(ClientHandle::new(2, ())));
        assert!(matches!(err, SubmitError::NotRunning(_)));
        assert!(queue.is_closed());
    }
}
