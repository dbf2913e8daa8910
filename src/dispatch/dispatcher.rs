//! Dispatcher task
//!
//! Drains the admission queue and binds each viewer to a free slot.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::client::ClientHandle;
use super::queue::AdmissionReceiver;
use super::slots::{SlotLease, SlotTable};
use super::worker::{DeliveryHandler, WorkerContext, WorkerSpawner, WorkerTask};
use crate::frame::FrameStore;
use crate::stats::DispatchCounters;

/// What happened to one dequeued viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Worker spawned in this slot
    Assigned { slot: usize },
    /// Every slot occupied; connection closed
    NoSlot,
    /// Spawn failed; connection closed and slot left empty
    SpawnFailed,
}

/// Binds admitted viewers to delivery workers
pub struct Dispatcher<H: DeliveryHandler> {
    handler: Arc<H>,
    slots: Arc<SlotTable>,
    store: Arc<FrameStore>,
    spawner: Arc<dyn WorkerSpawner>,
    counters: Arc<DispatchCounters>,
    poll_interval: Duration,
}

impl<H: DeliveryHandler> Dispatcher<H> {
    pub fn new(
        handler: Arc<H>,
        slots: Arc<SlotTable>,
        store: Arc<FrameStore>,
        spawner: Arc<dyn WorkerSpawner>,
        counters: Arc<DispatchCounters>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            handler,
            slots,
            store,
            spawner,
            counters,
            poll_interval,
        }
    }

    /// Run until cancelled or until every queue producer is gone
    ///
    /// Viewers still queued on exit are closed.
    pub async fn run(self, mut queue: AdmissionReceiver<H::Connection>, cancel: CancellationToken) {
        tracing::info!(slots = self.slots.capacity(), "Dispatcher started");

        loop {
            let client = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Some(client) => client,
                    None => break,
                },
            };

            self.dispatch(client);
        }

        let closed = queue.close_pending();
        tracing::info!(closed_pending = closed, "Dispatcher stopped");
    }

    /// Bind one viewer to a slot, or close it
    pub fn dispatch(&self, client: ClientHandle<H::Connection>) -> DispatchOutcome {
        let client_id = client.id();

        let Some(claim) = self.slots.claim(client_id) else {
            self.counters.record_no_slot();
            tracing::warn!(
                client_id,
                peer = ?client.peer_addr(),
                "Viewer rejected: all slots occupied"
            );
            client.close();
            return DispatchOutcome::NoSlot;
        };

        let slot = claim.index;
        let lease = SlotLease::new(Arc::clone(&self.slots), &claim);
        let ctx = WorkerContext::new(
            slot,
            client_id,
            Arc::clone(&self.store),
            claim.cancel.clone(),
            self.poll_interval,
        );
        let handler = Arc::clone(&self.handler);
        let counters = Arc::clone(&self.counters);

        // The lease and the client live inside the task: if it never runs,
        // dropping it frees the slot and closes the connection.
        let task: WorkerTask = Box::pin(async move {
            let _lease = lease;
            match handler.deliver(client, ctx).await {
                Ok(()) => tracing::debug!(slot, client_id, "Viewer disconnected"),
                Err(e) => tracing::debug!(slot, client_id, error = %e, "Delivery ended with error"),
            }
            counters.record_finished();
        });

        match self.spawner.spawn_worker(slot, task) {
            Ok(handle) => {
                self.counters.record_admitted();
                if self.slots.attach(&claim, handle).is_some() {
                    tracing::trace!(slot, client_id, "Worker finished before attach");
                }
                tracing::debug!(slot, client_id, "Viewer admitted");
                DispatchOutcome::Assigned { slot }
            }
            Err(e) => {
                self.counters.record_spawn_failure();
                tracing::error!(slot, client_id, error = %e, "Failed to spawn delivery worker");
                DispatchOutcome::SpawnFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::task::JoinHandle;

    use crate::dispatch::queue::admission_queue;
    use crate::dispatch::worker::{RuntimeSpawner, SpawnError};
    use crate::error::Result;

    struct Conn(Arc<AtomicUsize>);

    impl Drop for Conn {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Holds the viewer until cancelled
    struct Park;

    impl DeliveryHandler for Park {
        type Connection = Conn;

        async fn deliver(&self, _client: ClientHandle<Conn>, ctx: WorkerContext) -> Result<()> {
            ctx.cancelled().await;
            Ok(())
        }
    }

    struct FailingSpawner;

    impl WorkerSpawner for FailingSpawner {
        fn spawn_worker(
            &self,
            slot: usize,
            _task: WorkerTask,
        ) -> std::result::Result<JoinHandle<()>, SpawnError> {
            Err(SpawnError {
                slot,
                reason: "out of task memory".into(),
            })
        }
    }

    fn dispatcher(slots: usize, spawner: Arc<dyn WorkerSpawner>) -> Dispatcher<Park> {
        Dispatcher::new(
            Arc::new(Park),
            Arc::new(SlotTable::new(slots)),
            Arc::new(FrameStore::with_capacity(64, 1)),
            spawner,
            Arc::new(DispatchCounters::new()),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_dispatch_until_full() {
        let closed = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(2, Arc::new(RuntimeSpawner::current()));

        let first = d.dispatch(ClientHandle::new(1, Conn(Arc::clone(&closed))));
        let second = d.dispatch(ClientHandle::new(2, Conn(Arc::clone(&closed))));
        let third = d.dispatch(ClientHandle::new(3, Conn(Arc::clone(&closed))));

        assert_eq!(first, DispatchOutcome::Assigned { slot: 0 });
        assert_eq!(second, DispatchOutcome::Assigned { slot: 1 });
        assert_eq!(third, DispatchOutcome::NoSlot);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(d.slots.occupied(), 2);

        let stats = d.counters.snapshot();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.rejected_no_slot, 1);

        for entry in d.slots.drain() {
            entry.cancel.cancel();
            if let Some(task) = entry.task {
                task.await.unwrap();
            }
        }
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_slot_empty() {
        let closed = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(1, Arc::new(FailingSpawner));

        let outcome = d.dispatch(ClientHandle::new(1, Conn(Arc::clone(&closed))));

        assert_eq!(outcome, DispatchOutcome::SpawnFailed);
        assert_eq!(d.slots.occupied(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(d.counters.snapshot().spawn_failures, 1);
    }

    #[tokio::test]
    async fn test_worker_exit_frees_slot() {
        struct Quick;

        impl DeliveryHandler for Quick {
            type Connection = ();

            async fn deliver(&self, _client: ClientHandle<()>, _ctx: WorkerContext) -> Result<()> {
                Ok(())
            }
        }

        let slots = Arc::new(SlotTable::new(1));
        let counters = Arc::new(DispatchCounters::new());
        let d = Dispatcher::new(
            Arc::new(Quick),
            Arc::clone(&slots),
            Arc::new(FrameStore::with_capacity(64, 1)),
            Arc::new(RuntimeSpawner::current()),
            Arc::clone(&counters),
            Duration::from_millis(1),
        );

        assert_eq!(
            d.dispatch(ClientHandle::new(1, ())),
            DispatchOutcome::Assigned { slot: 0 }
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while slots.occupied() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(slots.occupied(), 0);
        assert_eq!(
            d.dispatch(ClientHandle::new(2, ())),
            DispatchOutcome::Assigned { slot: 0 }
        );
    }

    #[tokio::test]
    async fn test_run_closes_pending_on_cancel() {
        let closed = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(1, Arc::new(FailingSpawner));
        let (queue, rx) = admission_queue::<Conn>(2);
        let cancel = CancellationToken::new();

        cancel.cancel();
        queue
            .submit(ClientHandle::new(1, Conn(Arc::clone(&closed))))
            .unwrap();
        d.run(rx, cancel).await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(queue.is_closed());
    }
}
