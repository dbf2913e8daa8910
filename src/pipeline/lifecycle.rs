//! Pipeline lifecycle controller

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::PipelineState;
use crate::capture::{CaptureConfig, CaptureDevice, FrameSink};
use crate::config::PipelineConfig;
use crate::dispatch::{
    admission_queue, AdmissionQueue, ClientHandle, DeliveryHandler, Dispatcher, RuntimeSpawner,
    SlotEntry, SlotTable, SubmitError, WorkerSpawner,
};
use crate::error::Result;
use crate::frame::FrameStore;
use crate::memory::{allocate_regions, ExternalMemory};
use crate::stats::{DispatchCounters, PipelineStats};

struct DispatcherTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// State only touched by `start()` / `stop()`
struct Control {
    device: Box<dyn CaptureDevice>,
    capture_running: bool,
    dispatcher: Option<DispatcherTask>,
}

/// Capture-to-network pipeline
///
/// Built once by [`bootstrap`](Self::bootstrap), then brought up and down
/// with [`start`](Self::start) and [`stop`](Self::stop) any number of times.
pub struct Pipeline<H: DeliveryHandler> {
    config: PipelineConfig,
    store: Arc<FrameStore>,
    slots: Arc<SlotTable>,
    handler: Arc<H>,
    counters: Arc<DispatchCounters>,
    runtime: Option<Handle>,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    admission: RwLock<Option<AdmissionQueue<H::Connection>>>,
    state: watch::Sender<PipelineState>,
    control: Mutex<Control>,
    next_client_id: AtomicU64,
}

impl<H: DeliveryHandler> Pipeline<H> {
    /// Reserve buffers, build the frame store and configure the capture device
    ///
    /// A memory error here is fatal; the caller should halt rather than retry.
    pub fn bootstrap<M, D>(
        config: PipelineConfig,
        memory: &mut M,
        mut device: D,
        handler: H,
    ) -> Result<Self>
    where
        M: ExternalMemory + ?Sized,
        D: CaptureDevice,
    {
        config.validate()?;

        let regions = allocate_regions(memory, &config)?;
        let store = Arc::new(FrameStore::from_regions(
            regions.frame_a,
            regions.frame_b,
            config.min_frame_size,
        )?);

        let capture_config = CaptureConfig {
            width: config.frame_width,
            height: config.frame_height,
            frame_interval: config.frame_interval,
        };
        device.configure(capture_config, regions.capture, FrameSink::new(Arc::clone(&store)))?;

        tracing::info!(
            width = config.frame_width,
            height = config.frame_height,
            buffer_size = config.frame_buffer_size,
            max_viewers = config.max_viewers,
            "Pipeline bootstrapped"
        );

        let (state, _) = watch::channel(PipelineState::Stopped);

        Ok(Self {
            slots: Arc::new(SlotTable::new(config.max_viewers)),
            store,
            handler: Arc::new(handler),
            counters: Arc::new(DispatchCounters::new()),
            runtime: None,
            spawner: None,
            admission: RwLock::new(None),
            state,
            control: Mutex::new(Control {
                device: Box::new(device),
                capture_running: false,
                dispatcher: None,
            }),
            next_client_id: AtomicU64::new(1),
            config,
        })
    }

    /// Run the dispatcher and delivery workers on a dedicated runtime
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Use a custom worker spawner
    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The shared frame store
    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn slots(&self) -> &Arc<SlotTable> {
        &self.slots
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Capture callback entry for drivers wired up outside bootstrap
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink::new(Arc::clone(&self.store))
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PipelineState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            tracing::debug!(from = %prev, to = %state, "Pipeline state change");
        }
    }

    /// Allocate a client id for a new connection
    pub fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bring capture and dispatch up
    ///
    /// No-op when already running. A capture start failure leaves the
    /// pipeline stopped.
    pub async fn start(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        if self.state() == PipelineState::Running {
            return Ok(());
        }
        self.set_state(PipelineState::Starting);

        if !control.capture_running {
            if let Err(e) = control.device.start() {
                tracing::error!(error = %e, "Failed to start capture");
                self.set_state(PipelineState::Stopped);
                return Err(e);
            }
            control.capture_running = true;
            tracing::info!("Capture started");
        }

        if control.dispatcher.is_none() {
            let stale = self.slots.drain();
            if !stale.is_empty() {
                tracing::warn!(count = stale.len(), "Clearing stale slots");
                for entry in stale {
                    abort_worker(entry);
                }
            }

            let runtime = self.runtime.clone().unwrap_or_else(Handle::current);
            let spawner: Arc<dyn WorkerSpawner> = match &self.spawner {
                Some(spawner) => Arc::clone(spawner),
                None => Arc::new(RuntimeSpawner::new(runtime.clone())),
            };

            let (queue, rx) = admission_queue(self.config.max_viewers);
            let dispatcher = Dispatcher::new(
                Arc::clone(&self.handler),
                Arc::clone(&self.slots),
                Arc::clone(&self.store),
                spawner,
                Arc::clone(&self.counters),
                self.config.worker_poll_interval,
            );
            let cancel = CancellationToken::new();
            let handle = runtime.spawn(dispatcher.run(rx, cancel.clone()));

            control.dispatcher = Some(DispatcherTask { cancel, handle });
            *self.admission.write() = Some(queue);
        }

        self.set_state(PipelineState::Running);
        tracing::info!(max_viewers = self.config.max_viewers, "Pipeline running");
        Ok(())
    }

    /// Bring capture and dispatch down
    ///
    /// No-op when already stopped. The capture device is suspended, not
    /// released. The dispatcher and every worker are cancelled, given the
    /// grace period to exit, then aborted.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if self.state() == PipelineState::Stopped {
            return;
        }
        self.set_state(PipelineState::Stopping);

        if control.capture_running {
            control.device.suspend();
            control.capture_running = false;
        }

        // New submissions fail from here on
        self.admission.write().take();

        let grace = self.config.shutdown_grace_period;
        if let Some(mut dispatcher) = control.dispatcher.take() {
            dispatcher.cancel.cancel();
            if tokio::time::timeout(grace, &mut dispatcher.handle).await.is_err() {
                tracing::warn!("Dispatcher did not exit in time, aborting");
                dispatcher.handle.abort();
            }
        }

        let workers = self.slots.drain();
        let count = workers.len();
        for entry in &workers {
            entry.cancel.cancel();
        }

        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for entry in workers {
            let Some(mut task) = entry.task else {
                continue;
            };
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(
                    client_id = entry.client_id,
                    held_ms = entry.claimed_at.elapsed().as_millis() as u64,
                    "Worker ignored cancellation, aborting"
                );
                task.abort();
                aborted += 1;
            }
        }

        self.store.reset();
        self.set_state(PipelineState::Stopped);
        tracing::info!(workers = count, aborted, "Pipeline stopped");
    }

    /// Queue a new viewer connection
    ///
    /// Never blocks. On rejection the connection comes back inside the error
    /// and the caller must close it.
    pub fn submit_client(
        &self,
        conn: H::Connection,
    ) -> std::result::Result<u64, SubmitError<H::Connection>> {
        self.submit(ClientHandle::new(self.next_client_id(), conn))
    }

    /// Queue an already wrapped viewer connection
    pub fn submit(
        &self,
        handle: ClientHandle<H::Connection>,
    ) -> std::result::Result<u64, SubmitError<H::Connection>> {
        let id = handle.id();
        let admission = self.admission.read();
        let Some(queue) = admission.as_ref() else {
            return Err(SubmitError::NotRunning(handle));
        };

        queue.submit(handle).map(|()| id).map_err(|e| {
            if matches!(e, SubmitError::QueueFull(_)) {
                self.counters.record_queue_full();
            }
            tracing::warn!(client_id = id, "{}", e);
            e
        })
    }

    /// Queue a viewer, closing it on rejection
    pub fn submit_or_close(&self, handle: ClientHandle<H::Connection>) -> bool {
        match self.submit(handle) {
            Ok(_) => true,
            Err(e) => {
                e.close();
                false
            }
        }
    }

    /// Snapshot of the whole pipeline
    pub async fn stats(&self) -> PipelineStats {
        let control = self.control.lock().await;
        let queued_viewers = self.admission.read().as_ref().map_or(0, |q| q.len());

        PipelineStats {
            state: self.state(),
            capture_running: control.capture_running,
            dispatcher_running: control
                .dispatcher
                .as_ref()
                .map_or(false, |d| !d.handle.is_finished()),
            occupied_slots: self.slots.occupied(),
            max_viewers: self.slots.capacity(),
            queued_viewers,
            frames: self.store.stats(),
            dispatch: self.counters.snapshot(),
        }
    }
}

fn abort_worker(entry: SlotEntry) {
    tracing::debug!(
        client_id = entry.client_id,
        held_ms = entry.claimed_at.elapsed().as_millis() as u64,
        "Aborting worker"
    );
    entry.cancel.cancel();
    if let Some(task) = entry.task {
        task.abort();
    }
}

impl<H: DeliveryHandler> Drop for Pipeline<H> {
    fn drop(&mut self) {
        let control = self.control.get_mut();
        if let Some(dispatcher) = control.dispatcher.take() {
            dispatcher.cancel.cancel();
            dispatcher.handle.abort();
        }
        for entry in self.slots.drain() {
            abort_worker(entry);
        }
    }
}

impl<H: DeliveryHandler> std::fmt::Debug for Pipeline<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("slots", &self.slots)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::capture::{CameraMonitor, SyntheticCamera};
    use crate::dispatch::WorkerContext;
    use crate::error::Error;
    use crate::memory::HeapMemory;

    struct Conn(Arc<AtomicUsize>);

    impl Drop for Conn {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts live workers and holds each viewer until cancelled
    #[derive(Default)]
    struct Hold {
        active: AtomicUsize,
    }

    impl DeliveryHandler for Hold {
        type Connection = Conn;

        async fn deliver(&self, _client: ClientHandle<Conn>, ctx: WorkerContext) -> Result<()> {
            self.active.fetch_add(1, Ordering::SeqCst);
            ctx.cancelled().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .frame_buffer_size(4096)
            .min_frame_size(16)
            .driver_buffers(256, 2048)
            .frame_interval(Duration::from_millis(5))
            .worker_poll_interval(Duration::from_millis(1))
            .shutdown_grace_period(Duration::from_millis(200))
    }

    fn pipeline() -> (Pipeline<Hold>, Arc<CameraMonitor>) {
        let config = config();
        let mut memory = HeapMemory::for_config(&config);
        let camera = SyntheticCamera::new(512);
        let monitor = camera.monitor();
        let pipeline = Pipeline::bootstrap(config, &mut memory, camera, Hold::default()).unwrap();
        (pipeline, monitor)
    }

    async fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !f() {
            if Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        true
    }

    #[test]
    fn test_bootstrap_without_memory_is_fatal() {
        let mut memory = HeapMemory::absent();
        let result = Pipeline::bootstrap(config(), &mut memory, SyntheticCamera::new(64), Hold::default());

        let err = result.unwrap_err();
        assert!(matches!(err, Error::MemoryUnavailable));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (pipeline, camera) = pipeline();

        pipeline.start().await.unwrap();
        pipeline.start().await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::Running);
        assert_eq!(camera.starts(), 1);
        let stats = pipeline.stats().await;
        assert!(stats.capture_running);
        assert!(stats.dispatcher_running);
        assert_eq!(stats.occupied_slots, 0);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let (pipeline, camera) = pipeline();

        pipeline.stop().await;
        pipeline.stop().await;

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(camera.starts(), 0);
    }

    #[tokio::test]
    async fn test_submit_when_stopped() {
        let (pipeline, _camera) = pipeline();
        let closed = Arc::new(AtomicUsize::new(0));

        let err = pipeline
            .submit_client(Conn(Arc::clone(&closed)))
            .unwrap_err();

        assert!(matches!(err, SubmitError::NotRunning(_)));
        err.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_terminates_workers() {
        let (pipeline, camera) = pipeline();
        let closed = Arc::new(AtomicUsize::new(0));
        pipeline.start().await.unwrap();

        pipeline.submit_client(Conn(Arc::clone(&closed))).unwrap();
        pipeline.submit_client(Conn(Arc::clone(&closed))).unwrap();
        assert!(wait_for(|| pipeline.handler().active.load(Ordering::SeqCst) == 2).await);

        pipeline.stop().await;

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pipeline.slots().occupied(), 0);
        assert_eq!(pipeline.handler().active.load(Ordering::SeqCst), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(camera.is_paused());

        let stats = pipeline.stats().await;
        assert!(!stats.capture_running);
        assert!(!stats.dispatcher_running);
    }

    #[tokio::test]
    async fn test_restart_matches_fresh_boot() {
        let (pipeline, camera) = pipeline();
        let closed = Arc::new(AtomicUsize::new(0));
        pipeline.start().await.unwrap();
        pipeline.submit_client(Conn(Arc::clone(&closed))).unwrap();
        assert!(wait_for(|| pipeline.slots().occupied() == 1).await);

        pipeline.stop().await;
        pipeline.start().await.unwrap();

        let stats = pipeline.stats().await;
        assert_eq!(stats.state, PipelineState::Running);
        assert_eq!(stats.occupied_slots, 0);
        assert_eq!(stats.queued_viewers, 0);
        assert!(stats.dispatcher_running);
        assert!(stats.capture_running);
        assert_eq!(camera.starts(), 2);

        // The new dispatcher serves viewers
        pipeline.submit_client(Conn(Arc::clone(&closed))).unwrap();
        assert!(wait_for(|| pipeline.slots().occupied() == 1).await);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_stop_aborts_worker_ignoring_cancel() {
        struct Stubborn;

        impl DeliveryHandler for Stubborn {
            type Connection = Conn;

            async fn deliver(&self, _client: ClientHandle<Conn>, _ctx: WorkerContext) -> Result<()> {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }

        let config = config().shutdown_grace_period(Duration::from_millis(50));
        let mut memory = HeapMemory::for_config(&config);
        let pipeline =
            Pipeline::bootstrap(config, &mut memory, SyntheticCamera::new(64), Stubborn).unwrap();
        let closed = Arc::new(AtomicUsize::new(0));
        pipeline.start().await.unwrap();

        pipeline.submit_client(Conn(Arc::clone(&closed))).unwrap();
        assert!(wait_for(|| pipeline.slots().occupied() == 1).await);

        let started = Instant::now();
        pipeline.stop().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pipeline.slots().occupied(), 0);
        assert!(wait_for(|| closed.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn test_capture_start_failure_leaves_stopped() {
        struct Broken;

        impl CaptureDevice for Broken {
            fn configure(
                &mut self,
                _config: CaptureConfig,
                _buffers: crate::memory::CaptureBuffers,
                _sink: FrameSink,
            ) -> Result<()> {
                Ok(())
            }

            fn start(&mut self) -> Result<()> {
                Err(Error::Capture("device unplugged".into()))
            }
        }

        let config = config();
        let mut memory = HeapMemory::for_config(&config);
        let pipeline = Pipeline::bootstrap(config, &mut memory, Broken, Hold::default()).unwrap();

        assert!(matches!(pipeline.start().await, Err(Error::Capture(_))));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(!pipeline.stats().await.dispatcher_running);
    }

    #[tokio::test]
    async fn test_state_watch() {
        let (pipeline, _camera) = pipeline();
        let mut rx = pipeline.subscribe_state();

        pipeline.start().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PipelineState::Running);

        pipeline.stop().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PipelineState::Stopped);
    }
}
