//! Producer worker actor.
//!
//! A [`ProducerWorker`] is a long-running tokio task that loads one kind of
//! data for every tile handed to it. Callers talk to it through a cheap,
//! cloneable [`ProducerHandle`].
//!
//! # Job flow
//!
//! ```text
//! ProducerHandle::enqueue ── register on tile ──► ToFetch
//!                                                   │ tick (up to max_in_flight)
//!                                                   ▼
//!                         FetchBackend::fetch ◄── AwaitingResponse
//!                                 │ bytes
//!                                 ▼
//!              spawn_blocking(decode) ◄── AwaitingProcessing
//!                                 │ payload
//!                                 ▼
//!      Set<Channel>Data ─► RenderSink::present ─► Unregister ─► complete
//! ```
//!
//! Fetch and decode failures drop the job, emit
//! [`ProducerEvent::TileError`] and leave the producer registered on the
//! tile, so its channel stays `Working` until the caller retries or unloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::queue::{JobPhase, ProducerJobQueue, ProducerState};
use crate::decode::{DecodeError, DecodedPayload, PayloadDecoder};
use crate::error::{ProducerError, TileError};
use crate::events::{EventBus, ProducerEvent, Subscription};
use crate::fetch::{FetchBackend, FetchError, FetchRequest};
use crate::render::{Presentation, RenderSink};
use crate::telemetry::CoordinatorMetrics;
use crate::tile::{DataChannelState, FetchHandleId, ProducerId, ProducerKind, TileHandle};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of jobs a worker keeps past the fetch queue.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default scheduling tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Scheduling settings for a producer worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs fetching or decoding at once.
    pub max_in_flight: usize,
    /// How often queued jobs are started and state is re-evaluated.
    pub tick_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Point-in-time view of a worker, updated after every scheduling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerStatus {
    pub state: ProducerState,
    pub to_fetch: usize,
    pub awaiting_response: usize,
    pub awaiting_processing: usize,
    pub completed: u64,
    pub failed: u64,
    pub is_running: bool,
}

impl ProducerStatus {
    /// Jobs in any phase.
    pub fn pending(&self) -> usize {
        self.to_fetch + self.awaiting_response + self.awaiting_processing
    }
}

// =============================================================================
// Handle
// =============================================================================

enum WorkerCommand {
    Enqueue(TileHandle),
    Discard(TileHandle),
}

/// Caller-side reference to a running worker. Cheap to clone.
#[derive(Clone)]
pub struct ProducerHandle {
    id: ProducerId,
    kind: ProducerKind,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    events: Arc<Mutex<EventBus<ProducerEvent>>>,
    status: Arc<Mutex<ProducerStatus>>,
}

impl ProducerHandle {
    pub fn id(&self) -> ProducerId {
        self.id
    }

    pub fn kind(&self) -> ProducerKind {
        self.kind
    }

    /// Registers the producer on `tile` and queues it for loading.
    ///
    /// The registration happens before this returns, so the tile's channel
    /// is `Working` as soon as the call succeeds.
    pub fn enqueue(&self, tile: &TileHandle) -> Result<(), ProducerError> {
        if self.commands.is_closed() {
            return Err(ProducerError::Stopped(self.id));
        }
        tile.register(self.id, self.kind)?;
        if self
            .commands
            .send(WorkerCommand::Enqueue(tile.clone()))
            .is_err()
        {
            let _ = tile.unregister(self.id);
            return Err(ProducerError::Stopped(self.id));
        }
        Ok(())
    }

    /// Drops `tile` from the worker's queue and unregisters from it.
    pub fn discard(&self, tile: &TileHandle) -> Result<(), ProducerError> {
        self.commands
            .send(WorkerCommand::Discard(tile.clone()))
            .map_err(|_| ProducerError::Stopped(self.id))
    }

    /// Attaches a listener for state changes and tile errors.
    pub fn subscribe(&self) -> Subscription<ProducerEvent> {
        self.events.lock().subscribe()
    }

    pub fn status(&self) -> ProducerStatus {
        *self.status.lock()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("running", &self.is_running())
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

enum JobOutcome {
    Fetched {
        tile: TileHandle,
        result: Result<Bytes, FetchError>,
    },
    Decoded {
        tile: TileHandle,
        result: Result<DecodedPayload, DecodeError>,
    },
}

/// Loads one kind of data for the tiles queued on it.
pub struct ProducerWorker {
    id: ProducerId,
    kind: ProducerKind,
    config: WorkerConfig,
    queue: ProducerJobQueue<TileHandle>,
    fetches: HashMap<TileHandle, (FetchHandleId, CancellationToken)>,
    backend: Arc<dyn FetchBackend>,
    decoder: Arc<dyn PayloadDecoder>,
    sink: Arc<dyn RenderSink>,
    metrics: Arc<CoordinatorMetrics>,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    outcomes_tx: mpsc::UnboundedSender<JobOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<JobOutcome>,
    events: Arc<Mutex<EventBus<ProducerEvent>>>,
    status: Arc<Mutex<ProducerStatus>>,
    completed: u64,
    failed: u64,
}

impl ProducerWorker {
    /// Creates a worker and the handle used to drive it. Nothing runs until
    /// [`run`](Self::run) is awaited or [`spawn`](Self::spawn) is called.
    pub fn new(
        kind: ProducerKind,
        config: WorkerConfig,
        backend: Arc<dyn FetchBackend>,
        decoder: Arc<dyn PayloadDecoder>,
        sink: Arc<dyn RenderSink>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> (Self, ProducerHandle) {
        let id = ProducerId::next();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let events = Arc::new(Mutex::new(EventBus::new()));
        let status = Arc::new(Mutex::new(ProducerStatus {
            is_running: true,
            ..ProducerStatus::default()
        }));

        let handle = ProducerHandle {
            id,
            kind,
            commands: commands_tx,
            events: Arc::clone(&events),
            status: Arc::clone(&status),
        };
        let worker = Self {
            id,
            kind,
            config: WorkerConfig {
                max_in_flight: config.max_in_flight.max(1),
                ..config
            },
            queue: ProducerJobQueue::new(),
            fetches: HashMap::new(),
            backend,
            decoder,
            sink,
            metrics,
            commands,
            outcomes_tx,
            outcomes_rx,
            events,
            status,
            completed: 0,
            failed: 0,
        };
        (worker, handle)
    }

    /// Runs the worker on the current tokio runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Processes commands, job outcomes and ticks until `shutdown` fires or
    /// every handle is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(producer = %self.id, kind = %self.kind, "Producer worker started");

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(producer = %self.id, "Shutdown requested");
                    break;
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!(producer = %self.id, "All handles dropped");
                            break;
                        }
                    }
                }

                Some(outcome) = self.outcomes_rx.recv() => {
                    self.handle_outcome(outcome);
                }

                _ = ticker.tick() => {
                    self.start_fetches();
                }
            }

            self.refresh_state();
        }

        self.stop();
    }

    fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Enqueue(tile) => {
                if tile.is_stale() {
                    debug!(producer = %self.id, tile = %tile.coord(), "Skipping recycled tile");
                    return;
                }
                if !self.queue.enqueue(tile.clone()) {
                    trace!(producer = %self.id, tile = %tile.coord(), "Tile already queued");
                }
            }
            WorkerCommand::Discard(tile) => {
                if let Some(phase) = self.queue.remove(&tile) {
                    debug!(producer = %self.id, tile = %tile.coord(), ?phase, "Job discarded");
                }
                if let Some((id, token)) = self.fetches.remove(&tile) {
                    token.cancel();
                    tile.release_fetch_handle(id);
                }
                let _ = tile.unregister(self.id);
            }
        }
    }

    /// Moves queued jobs into fetching while capacity allows.
    fn start_fetches(&mut self) {
        while self.queue.in_flight() < self.config.max_in_flight {
            let Some(tile) = self.queue.begin_next_fetch() else {
                break;
            };

            let token = CancellationToken::new();
            let fetch_id = match tile.add_fetch_handle(token.clone()) {
                Ok(id) => id,
                Err(e) => {
                    debug!(producer = %self.id, tile = %tile.coord(), error = %e, "Dropping job");
                    self.queue.remove(&tile);
                    continue;
                }
            };
            self.fetches.insert(tile.clone(), (fetch_id, token.clone()));

            trace!(producer = %self.id, tile = %tile.coord(), "Fetch started");
            let backend = Arc::clone(&self.backend);
            let outcomes = self.outcomes_tx.clone();
            let request = FetchRequest::new(tile.coord(), self.kind);
            tokio::spawn(async move {
                let result = backend.fetch(request, token).await;
                let _ = outcomes.send(JobOutcome::Fetched { tile, result });
            });
        }
    }

    fn handle_outcome(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Fetched { tile, result } => {
                if let Some((id, _)) = self.fetches.remove(&tile) {
                    tile.release_fetch_handle(id);
                }
                if self.queue.phase_of(&tile) != Some(JobPhase::AwaitingResponse) {
                    trace!(producer = %self.id, tile = %tile.coord(), "Response for discarded job");
                    return;
                }
                match result {
                    Ok(bytes) => self.start_decode(tile, bytes),
                    Err(error) => self.fail(tile, error.into()),
                }
            }
            JobOutcome::Decoded { tile, result } => {
                if self.queue.phase_of(&tile) != Some(JobPhase::AwaitingProcessing) {
                    trace!(producer = %self.id, tile = %tile.coord(), "Decode for discarded job");
                    return;
                }
                match result {
                    Ok(payload) => self.finish(tile, payload),
                    Err(error) => self.fail(tile, error.into()),
                }
            }
        }
    }

    fn start_decode(&mut self, tile: TileHandle, bytes: Bytes) {
        self.queue.response_received(&tile);

        let decoder = Arc::clone(&self.decoder);
        let outcomes = self.outcomes_tx.clone();
        let kind = self.kind;
        tokio::spawn(async move {
            let result =
                match tokio::task::spawn_blocking(move || decoder.decode(kind, &bytes)).await {
                    Ok(result) => result,
                    Err(e) => Err(DecodeError::Aborted(e.to_string())),
                };
            let _ = outcomes.send(JobOutcome::Decoded { tile, result });
        });
    }

    /// Publishes a decoded payload to the tile and the render sink, then
    /// releases the registration whether or not the tile accepted the data.
    fn finish(&mut self, tile: TileHandle, payload: DecodedPayload) {
        let coord = tile.coord();
        let channel = payload.kind().channel();

        if matches!(tile.channel_state(channel), Ok(DataChannelState::Finished)) {
            // Another producer of the same kind delivered first
            debug!(producer = %self.id, tile = %coord, %channel, "Channel already delivered");
            if let Err(e) = tile.unregister(self.id) {
                debug!(producer = %self.id, tile = %coord, error = %e, "Unregister skipped");
            }
            self.queue.complete(&tile);
            return;
        }

        let applied = match payload {
            DecodedPayload::Imagery(image) => {
                let image = Arc::new(image);
                tile.set_imagery_data(self.id, Arc::clone(&image))
                    .map(|()| self.sink.present(coord, Presentation::Imagery(&image)))
            }
            DecodedPayload::Elevation(grid) => {
                let grid = Arc::new(grid);
                tile.set_elevation_data(self.id, Arc::clone(&grid))
                    .map(|()| self.sink.present(coord, Presentation::Elevation(&grid)))
            }
            DecodedPayload::Geometry(document) => {
                let document = Arc::new(document);
                tile.set_geometry_data(self.id, Arc::clone(&document))
                    .map(|()| self.sink.present(coord, Presentation::Geometry(&document)))
            }
        };
        let released = tile.unregister(self.id);

        match applied.and(released) {
            Ok(()) => {
                self.completed += 1;
                debug!(producer = %self.id, tile = %coord, "Job completed");
            }
            Err(e) if e.is_stale() => {
                debug!(producer = %self.id, tile = %coord, "Tile recycled before completion");
            }
            Err(e) => {
                warn!(producer = %self.id, tile = %coord, error = %e, "Completion rejected, registration released");
            }
        }
        self.queue.complete(&tile);
    }

    /// Drops a failed job and reports it. The registration stays in place.
    fn fail(&mut self, tile: TileHandle, error: TileError) {
        self.queue.remove(&tile);
        if tile.is_stale() {
            debug!(producer = %self.id, tile = %tile.coord(), "Failure on recycled tile ignored");
            return;
        }

        self.failed += 1;
        match &error {
            TileError::Fetch(_) => self.metrics.fetch_failed(),
            TileError::Decode(_) => self.metrics.decode_failed(),
        }
        warn!(
            producer = %self.id,
            kind = %self.kind,
            tile = %tile.coord(),
            error = %error,
            "Tile load failed"
        );
        self.events.lock().emit(ProducerEvent::TileError {
            producer: self.id,
            coord: tile.coord(),
            kind: self.kind,
            error,
        });
    }

    /// Re-derives the aggregate state and publishes status.
    fn refresh_state(&mut self) {
        if let Some(state) = self.queue.update_state() {
            debug!(producer = %self.id, kind = %self.kind, %state, "Producer state changed");
            self.events.lock().emit(ProducerEvent::StateChanged {
                producer: self.id,
                state,
            });
        }
        self.publish_status(true);
    }

    fn publish_status(&self, is_running: bool) {
        *self.status.lock() = ProducerStatus {
            state: self.queue.state(),
            to_fetch: self.queue.to_fetch_len(),
            awaiting_response: self.queue.awaiting_response_len(),
            awaiting_processing: self.queue.awaiting_processing_len(),
            completed: self.completed,
            failed: self.failed,
            is_running,
        };
    }

    fn stop(&mut self) {
        self.commands.close();
        for (_, (_, token)) in self.fetches.drain() {
            token.cancel();
        }
        let pending = self.queue.len();
        self.publish_status(false);
        info!(
            producer = %self.id,
            kind = %self.kind,
            pending,
            completed = self.completed,
            failed = self.failed,
            "Producer worker stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use crate::decode::{StandardDecoder, RAW_ELEVATION_LEN};
    use crate::events::{TileEvent, TileEventKind};
    use crate::fetch::MemoryFetchBackend;
    use crate::render::{NullRenderSink, RecordingRenderSink};
    use crate::tile::{DataChannel, DataChannelState, TileParams};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn coord(row: u32) -> TileCoord {
        TileCoord::new(row, 3, 5).unwrap()
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            max_in_flight: 4,
            tick_interval: Duration::from_millis(5),
        }
    }

    fn geometry_backend() -> MemoryFetchBackend {
        MemoryFetchBackend::new().with_generator(|_| Ok(Bytes::from_static(br#"{"layers":[]}"#)))
    }

    fn spawn(
        kind: ProducerKind,
        backend: MemoryFetchBackend,
        sink: Arc<dyn RenderSink>,
    ) -> (ProducerHandle, CancellationToken, JoinHandle<()>) {
        let (worker, handle) = ProducerWorker::new(
            kind,
            config(),
            Arc::new(backend),
            Arc::new(StandardDecoder::default()),
            sink,
            CoordinatorMetrics::new(),
        );
        let shutdown = CancellationToken::new();
        let join = worker.spawn(shutdown.clone());
        (handle, shutdown, join)
    }

    async fn wait_for_tile_event(
        events: &mut Subscription<TileEvent>,
        wanted: TileEventKind,
    ) -> TileEvent {
        timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("tile subscription closed");
                if event.kind == wanted {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for tile event")
    }

    async fn wait_for_producer_event(
        events: &mut Subscription<ProducerEvent>,
        matches: impl Fn(&ProducerEvent) -> bool,
    ) -> ProducerEvent {
        timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("producer subscription closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for producer event")
    }

    #[tokio::test]
    async fn test_enqueue_registers_immediately() {
        let (producer, shutdown, _join) =
            spawn(ProducerKind::Geometry, geometry_backend(), Arc::new(NullRenderSink));
        let tile = TileHandle::new(coord(1), TileParams::default());

        producer.enqueue(&tile).unwrap();

        assert!(tile.is_working(producer.id()));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_geometry_job_finishes_tile() {
        let sink = Arc::new(RecordingRenderSink::new());
        let (producer, shutdown, join) = spawn(
            ProducerKind::Geometry,
            geometry_backend(),
            Arc::clone(&sink) as Arc<dyn RenderSink>,
        );
        let tile = TileHandle::new(coord(1), TileParams::default());
        let mut events = tile.subscribe().unwrap();

        producer.enqueue(&tile).unwrap();
        wait_for_tile_event(&mut events, TileEventKind::TileFinished).await;

        assert_eq!(
            tile.channel_state(DataChannel::Geometry).unwrap(),
            DataChannelState::Finished
        );
        assert!(tile.geometry().is_some());
        assert_eq!(sink.count(ProducerKind::Geometry), 1);

        shutdown.cancel();
        join.await.unwrap();
        assert!(!producer.status().is_running);
        assert_eq!(producer.status().completed, 1);
    }

    #[tokio::test]
    async fn test_second_producer_of_same_kind_releases_tile() {
        let sink = Arc::new(RecordingRenderSink::new());
        let (first, first_shutdown, _first_join) = spawn(
            ProducerKind::Geometry,
            geometry_backend(),
            Arc::clone(&sink) as Arc<dyn RenderSink>,
        );
        let (second, second_shutdown, _second_join) = spawn(
            ProducerKind::Geometry,
            geometry_backend().with_latency(Duration::from_millis(50)),
            Arc::clone(&sink) as Arc<dyn RenderSink>,
        );
        let tile = TileHandle::new(coord(4), TileParams::default());
        let mut events = tile.subscribe().unwrap();

        first.enqueue(&tile).unwrap();
        second.enqueue(&tile).unwrap();
        wait_for_tile_event(&mut events, TileEventKind::TileFinished).await;

        assert!(!tile.is_working(first.id()));
        assert!(!tile.is_working(second.id()));
        assert_eq!(tile.snapshot().unwrap().working_producers, 0);
        let geometry_changes = events
            .drain()
            .into_iter()
            .filter(|e| e.kind == TileEventKind::DataChanged(DataChannel::Geometry))
            .count();
        assert_eq!(geometry_changes, 0);
        assert_eq!(sink.count(ProducerKind::Geometry), 1);

        first_shutdown.cancel();
        second_shutdown.cancel();
    }

    #[tokio::test]
    async fn test_state_changes_on_edges() {
        let (producer, shutdown, _join) =
            spawn(ProducerKind::Geometry, geometry_backend(), Arc::new(NullRenderSink));
        let mut events = producer.subscribe();

        wait_for_producer_event(&mut events, |e| {
            matches!(e, ProducerEvent::StateChanged { state: ProducerState::Finished, .. })
        })
        .await;

        let tile = TileHandle::new(coord(2), TileParams::default());
        producer.enqueue(&tile).unwrap();

        wait_for_producer_event(&mut events, |e| {
            matches!(e, ProducerEvent::StateChanged { state: ProducerState::Working, .. })
        })
        .await;
        wait_for_producer_event(&mut events, |e| {
            matches!(e, ProducerEvent::StateChanged { state: ProducerState::Finished, .. })
        })
        .await;

        assert_eq!(producer.status().pending(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_and_leaves_channel_working() {
        let backend = MemoryFetchBackend::new();
        let (producer, shutdown, _join) =
            spawn(ProducerKind::Elevation, backend, Arc::new(NullRenderSink));
        let mut producer_events = producer.subscribe();
        let tile = TileHandle::new(coord(3), TileParams::default());

        producer.enqueue(&tile).unwrap();
        let event = wait_for_producer_event(&mut producer_events, |e| {
            matches!(e, ProducerEvent::TileError { .. })
        })
        .await;

        match event {
            ProducerEvent::TileError {
                coord: failed,
                kind,
                error,
                ..
            } => {
                assert_eq!(failed, coord(3));
                assert_eq!(kind, ProducerKind::Elevation);
                assert!(matches!(error, TileError::Fetch(FetchError::NotFound(_))));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            tile.channel_state(DataChannel::Elevation).unwrap(),
            DataChannelState::Working
        );
        assert!(tile.is_working(producer.id()));
        assert!(!tile.snapshot().unwrap().finished);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported() {
        let backend = MemoryFetchBackend::new()
            .with_generator(|_| Ok(Bytes::from_static(&[1, 2, 3])));
        let (producer, shutdown, _join) =
            spawn(ProducerKind::Elevation, backend, Arc::new(NullRenderSink));
        let mut producer_events = producer.subscribe();
        let tile = TileHandle::new(coord(4), TileParams::default());

        producer.enqueue(&tile).unwrap();
        let event = wait_for_producer_event(&mut producer_events, |e| {
            matches!(e, ProducerEvent::TileError { .. })
        })
        .await;

        assert!(matches!(
            event,
            ProducerEvent::TileError {
                error: TileError::Decode(_),
                ..
            }
        ));
        assert_eq!(tile.query_elevation(0.5, 0.5), 0.0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_elevation_job_makes_heights_queryable() {
        let backend = MemoryFetchBackend::new()
            .with_generator(|_| Ok(Bytes::from(vec![0u8; RAW_ELEVATION_LEN])));
        let (producer, shutdown, _join) =
            spawn(ProducerKind::Elevation, backend, Arc::new(NullRenderSink));
        let tile = TileHandle::new(coord(5), TileParams::new(4.0, 5));
        let mut events = tile.subscribe().unwrap();

        producer.enqueue(&tile).unwrap();
        wait_for_tile_event(
            &mut events,
            TileEventKind::DataChanged(DataChannel::Elevation),
        )
        .await;

        assert_eq!(tile.query_elevation(0.0, 0.0), 0.0);
        assert!(tile.elevation().is_some());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_discard_unregisters_and_drops_job() {
        let backend = geometry_backend().with_latency(Duration::from_secs(30));
        let (producer, shutdown, _join) =
            spawn(ProducerKind::Geometry, backend, Arc::new(NullRenderSink));
        let tile = TileHandle::new(coord(6), TileParams::default());
        let mut events = tile.subscribe().unwrap();

        producer.enqueue(&tile).unwrap();
        producer.discard(&tile).unwrap();

        // Unregistering the only producer finishes the tile
        wait_for_tile_event(&mut events, TileEventKind::TileFinished).await;
        assert!(!tile.is_working(producer.id()));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_recycled_tile_completion_is_dropped() {
        let backend = geometry_backend().with_latency(Duration::from_millis(50));
        let sink = Arc::new(RecordingRenderSink::new());
        let (producer, shutdown, _join) = spawn(
            ProducerKind::Geometry,
            backend,
            Arc::clone(&sink) as Arc<dyn RenderSink>,
        );
        let tile = TileHandle::new(coord(7), TileParams::default());
        let mut status_events = producer.subscribe();

        producer.enqueue(&tile).unwrap();
        tile.record().recycle();

        wait_for_producer_event(&mut status_events, |e| {
            matches!(e, ProducerEvent::StateChanged { state: ProducerState::Finished, .. })
        })
        .await;
        // Wait for the job to drain after the initial Finished edge
        timeout(WAIT, async {
            while producer.status().pending() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(sink.count(ProducerKind::Geometry), 0);
        assert!(tile.is_stale());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_fails() {
        let (producer, shutdown, join) =
            spawn(ProducerKind::Imagery, MemoryFetchBackend::new(), Arc::new(NullRenderSink));
        shutdown.cancel();
        join.await.unwrap();

        let tile = TileHandle::new(coord(8), TileParams::default());
        let result = producer.enqueue(&tile);

        assert_eq!(result, Err(ProducerError::Stopped(producer.id())));
        assert!(!tile.is_working(producer.id()));
        assert!(!producer.is_running());
    }

    #[tokio::test]
    async fn test_enqueue_on_recycled_tile_fails() {
        let (producer, shutdown, _join) =
            spawn(ProducerKind::Imagery, MemoryFetchBackend::new(), Arc::new(NullRenderSink));
        let tile = TileHandle::new(coord(9), TileParams::default());
        tile.record().recycle();

        let result = producer.enqueue(&tile);
        assert!(matches!(result, Err(ProducerError::Coordination(e)) if e.is_stale()));
        shutdown.cancel();
    }
}
