//! Caller-facing facade over the tile pool and the producer workers.
//!
//! The coordinator owns one [`TilePool`] and one worker per configured
//! producer. Callers decide which tiles to load; the coordinator only tracks
//! the tiles it is told about.
//!
//! ```text
//!          load(coord)                         unload(coord)
//!              │                                    │
//!              ▼                                    ▼
//!   ┌──────────────────────┐             cancel ─► discard ─► recycle
//!   │ TilePool::acquire    │
//!   └──────────┬───────────┘
//!              │ new lifetime
//!              ▼
//!   ProducerHandle::enqueue  (imagery, elevation, geometry, ...)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let coordinator = TileCoordinator::builder()
//!     .with_producer(ProducerKind::Imagery, imagery_backend)
//!     .with_producer(ProducerKind::Geometry, geometry_backend)
//!     .build();
//!
//! let tile = coordinator.load(coord)?;
//! let mut events = tile.subscribe()?;
//! while let Some(event) = events.recv().await {
//!     if event.kind == TileEventKind::TileFinished {
//!         break;
//!     }
//! }
//! coordinator.shutdown().await;
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::coord::TileCoord;
use crate::decode::{PayloadDecoder, StandardDecoder};
use crate::error::ProducerError;
use crate::events::{Subscription, TileEvent};
use crate::fetch::FetchBackend;
use crate::producer::{ProducerHandle, ProducerWorker, WorkerConfig};
use crate::render::{NullRenderSink, RenderSink};
use crate::telemetry::{CoordinatorMetrics, MetricsSnapshot};
use crate::tile::{
    DataChannelState, ProducerKind, TileHandle, TileParams, TilePool, DEFAULT_POOL_CAPACITY,
};

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`TileCoordinator`].
pub struct TileCoordinatorBuilder {
    pool_capacity: usize,
    worker_config: WorkerConfig,
    tile_params: TileParams,
    decoder: Arc<dyn PayloadDecoder>,
    sink: Arc<dyn RenderSink>,
    metrics: Arc<CoordinatorMetrics>,
    producers: Vec<(ProducerKind, Arc<dyn FetchBackend>)>,
}

impl TileCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            worker_config: WorkerConfig::default(),
            tile_params: TileParams::default(),
            decoder: Arc::new(StandardDecoder::default()),
            sink: Arc::new(NullRenderSink),
            metrics: CoordinatorMetrics::new(),
            producers: Vec::new(),
        }
    }

    /// Applies pool, worker and elevation settings from a config file.
    pub fn from_config(config: &ConfigFile) -> Self {
        Self::new()
            .with_pool_capacity(config.pool.capacity)
            .with_worker_config(config.worker_config())
            .with_decoder(Arc::new(StandardDecoder::new(config.elevation_encoding())))
    }

    /// Adds a producer of `kind` fetching through `backend`. Several
    /// producers of the same kind may be added.
    pub fn with_producer(mut self, kind: ProducerKind, backend: Arc<dyn FetchBackend>) -> Self {
        self.producers.push((kind, backend));
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// Parameters used by [`TileCoordinator::load`].
    pub fn with_tile_params(mut self, params: TileParams) -> Self {
        self.tile_params = params;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn PayloadDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawns one worker per producer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> TileCoordinator {
        let shutdown = CancellationToken::new();
        let mut producers = Vec::with_capacity(self.producers.len());
        let mut workers = Vec::with_capacity(self.producers.len());

        for (kind, backend) in self.producers {
            let (worker, handle) = ProducerWorker::new(
                kind,
                self.worker_config.clone(),
                backend,
                Arc::clone(&self.decoder),
                Arc::clone(&self.sink),
                Arc::clone(&self.metrics),
            );
            workers.push(worker.spawn(shutdown.child_token()));
            producers.push(handle);
        }

        info!(
            producers = producers.len(),
            pool_capacity = self.pool_capacity,
            max_in_flight = self.worker_config.max_in_flight,
            "Tile coordinator started"
        );

        TileCoordinator {
            pool: TilePool::new(self.pool_capacity, Arc::clone(&self.metrics)),
            producers,
            tile_params: self.tile_params,
            metrics: self.metrics,
            shutdown,
            workers: Mutex::new(workers),
        }
    }
}

impl Default for TileCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Tracks the tiles a caller loads and drives producers for them.
pub struct TileCoordinator {
    pool: TilePool,
    producers: Vec<ProducerHandle>,
    tile_params: TileParams,
    metrics: Arc<CoordinatorMetrics>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TileCoordinator {
    pub fn builder() -> TileCoordinatorBuilder {
        TileCoordinatorBuilder::new()
    }

    /// Loads `coord` with the default tile parameters.
    pub fn load(&self, coord: TileCoord) -> Result<TileHandle, ProducerError> {
        self.load_with(coord, self.tile_params.clone())
    }

    /// Starts a lifetime for `coord` and enqueues it on every producer.
    ///
    /// Loading a tile that is already active returns its handle without
    /// queueing more work.
    pub fn load_with(
        &self,
        coord: TileCoord,
        params: TileParams,
    ) -> Result<TileHandle, ProducerError> {
        self.start(coord, params, |_| Ok(())).map(|(tile, ())| tile)
    }

    /// Like [`load`](Self::load), but attaches a listener before any
    /// producer sees the tile, so no event of the new lifetime is missed.
    pub fn load_and_subscribe(
        &self,
        coord: TileCoord,
    ) -> Result<(TileHandle, Subscription<TileEvent>), ProducerError> {
        self.start(coord, self.tile_params.clone(), |tile| Ok(tile.subscribe()?))
    }

    /// Acquires the tile, runs `attach` on it, then queues a new lifetime on
    /// every producer.
    fn start<R>(
        &self,
        coord: TileCoord,
        params: TileParams,
        attach: impl FnOnce(&TileHandle) -> Result<R, ProducerError>,
    ) -> Result<(TileHandle, R), ProducerError> {
        let (tile, created) = self.pool.acquire(coord, params)?;
        let attached = match attach(&tile) {
            Ok(attached) => attached,
            Err(e) => {
                if created {
                    self.pool.release(&coord);
                }
                return Err(e);
            }
        };
        if !created {
            return Ok((tile, attached));
        }

        debug!(tile = %coord, producers = self.producers.len(), "Loading tile");
        for producer in &self.producers {
            if let Err(e) = producer.enqueue(&tile) {
                warn!(tile = %coord, producer = %producer.id(), error = %e, "Load aborted");
                self.unload(coord);
                return Err(e);
            }
        }
        Ok((tile, attached))
    }

    /// Queues `coord` again on the producers of `kind` still registered on
    /// it, i.e. those left behind by a
    /// [`crate::events::ProducerEvent::TileError`].
    ///
    /// Returns `false` if the tile is not active, its `kind` channel has
    /// already finished, or no producer of `kind` is still working on it.
    pub fn retry(&self, coord: TileCoord, kind: ProducerKind) -> Result<bool, ProducerError> {
        let Some(tile) = self.pool.get(&coord) else {
            return Ok(false);
        };
        if tile.channel_state(kind.channel())? == DataChannelState::Finished {
            debug!(tile = %coord, %kind, "Retry skipped, channel already finished");
            return Ok(false);
        }

        let mut requeued = false;
        for producer in self
            .producers
            .iter()
            .filter(|p| p.kind() == kind && tile.is_working(p.id()))
        {
            producer.enqueue(&tile)?;
            requeued = true;
        }
        Ok(requeued)
    }

    /// Cancels outstanding work for `coord` and recycles its record.
    ///
    /// Returns `false` if the tile was not active.
    pub fn unload(&self, coord: TileCoord) -> bool {
        let Some(tile) = self.pool.get(&coord) else {
            return false;
        };
        tile.cancel();
        for producer in &self.producers {
            if let Err(e) = producer.discard(&tile) {
                debug!(tile = %coord, error = %e, "Discard skipped");
            }
        }
        self.pool.release(&coord)
    }

    /// The active handle for `coord`.
    pub fn tile(&self, coord: TileCoord) -> Option<TileHandle> {
        self.pool.get(&coord)
    }

    /// Listener for `coord`'s events in its current lifetime. Events emitted
    /// before this call are not replayed.
    pub fn subscribe_tile(&self, coord: TileCoord) -> Option<Subscription<TileEvent>> {
        self.pool.get(&coord)?.subscribe().ok()
    }

    pub fn producers(&self) -> &[ProducerHandle] {
        &self.producers
    }

    /// The first producer of `kind`.
    pub fn producer(&self, kind: ProducerKind) -> Option<&ProducerHandle> {
        self.producers.iter().find(|p| p.kind() == kind)
    }

    pub fn active_tiles(&self) -> Vec<TileCoord> {
        self.pool.active_coords()
    }

    pub fn pool(&self) -> &TilePool {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops every worker, waits for them, then recycles all active tiles.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Producer worker ended abnormally");
            }
        }
        let released = self.pool.release_all();
        info!(released, "Tile coordinator stopped");
    }
}

impl Drop for TileCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for TileCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCoordinator")
            .field("pool", &self.pool)
            .field("producers", &self.producers)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TileEventKind;
    use crate::fetch::MemoryFetchBackend;
    use crate::tile::{DataChannel, DataChannelState};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;

    fn coord(row: u32) -> TileCoord {
        TileCoord::new(row, 0, 4).unwrap()
    }

    fn fast() -> WorkerConfig {
        WorkerConfig {
            max_in_flight: 4,
            tick_interval: Duration::from_millis(5),
        }
    }

    fn geometry_backend() -> Arc<dyn FetchBackend> {
        Arc::new(
            MemoryFetchBackend::new()
                .with_generator(|_| Ok(Bytes::from_static(br#"{"layers":[]}"#))),
        )
    }

    async fn wait_finished(events: &mut Subscription<TileEvent>) {
        timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if event.kind == TileEventKind::TileFinished {
                    return;
                }
            }
            panic!("subscription closed before TileFinished");
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_load_registers_every_producer() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(
                ProducerKind::Geometry,
                Arc::new(
                    MemoryFetchBackend::new()
                        .with_latency(Duration::from_secs(30))
                        .with_generator(|_| Ok(Bytes::new())),
                ),
            )
            .with_producer(ProducerKind::Elevation, Arc::new(MemoryFetchBackend::new()))
            .build();

        let tile = coordinator.load(coord(1)).unwrap();

        assert_eq!(tile.snapshot().unwrap().working_producers, 2);
        assert_eq!(
            tile.channel_state(DataChannel::Elevation).unwrap(),
            DataChannelState::Working
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_twice_returns_same_lifetime() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(ProducerKind::Geometry, geometry_backend())
            .build();

        let first = coordinator.load(coord(2)).unwrap();
        let second = coordinator.load(coord(2)).unwrap();

        assert_eq!(first, second);
        assert_eq!(coordinator.active_tiles(), vec![coord(2)]);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unload_recycles_tile() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(ProducerKind::Geometry, geometry_backend())
            .build();

        let tile = coordinator.load(coord(3)).unwrap();
        assert!(coordinator.unload(coord(3)));
        assert!(!coordinator.unload(coord(3)));

        assert!(tile.is_stale());
        assert!(coordinator.tile(coord(3)).is_none());
        assert!(coordinator.subscribe_tile(coord(3)).is_none());
        assert_eq!(coordinator.pool().pooled_count(), 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_after_unload_runs_fresh_lifetime() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(ProducerKind::Geometry, geometry_backend())
            .build();

        let tile = coordinator.load(coord(4)).unwrap();
        let mut events = tile.subscribe().unwrap();
        wait_finished(&mut events).await;
        coordinator.unload(coord(4));

        let (tile, mut events) = coordinator.load_and_subscribe(coord(4)).unwrap();
        wait_finished(&mut events).await;
        assert!(tile.snapshot().unwrap().finished);

        let snapshot = coordinator.metrics_snapshot();
        assert_eq!(snapshot.tiles_initialized, 2);
        assert_eq!(snapshot.tiles_finished, 2);
        assert_eq!(snapshot.tiles_recycled, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_requeues_failed_channel() {
        let backend = Arc::new(MemoryFetchBackend::new());
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(
                ProducerKind::Geometry,
                Arc::clone(&backend) as Arc<dyn FetchBackend>,
            )
            .build();
        let mut errors = coordinator
            .producer(ProducerKind::Geometry)
            .unwrap()
            .subscribe();

        let tile = coordinator.load(coord(5)).unwrap();
        let mut events = tile.subscribe().unwrap();
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(crate::events::ProducerEvent::TileError { .. }) = errors.recv().await
                {
                    break;
                }
            }
        })
        .await
        .unwrap();

        backend.insert(
            crate::fetch::FetchRequest::new(coord(5), ProducerKind::Geometry),
            Bytes::from_static(br#"{"layers":[]}"#),
        );
        assert!(coordinator.retry(coord(5), ProducerKind::Geometry).unwrap());
        wait_finished(&mut events).await;
        assert!(!coordinator.retry(coord(9), ProducerKind::Geometry).unwrap());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_and_subscribe_on_active_tile() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(ProducerKind::Geometry, geometry_backend())
            .build();

        let (first, mut early) = coordinator.load_and_subscribe(coord(7)).unwrap();
        let (second, _late) = coordinator.load_and_subscribe(coord(7)).unwrap();
        assert_eq!(first, second);

        wait_finished(&mut early).await;
        assert_eq!(coordinator.metrics_snapshot().registrations, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_after_success_is_a_no_op() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(ProducerKind::Geometry, geometry_backend())
            .build();
        let (tile, mut events) = coordinator.load_and_subscribe(coord(8)).unwrap();
        wait_finished(&mut events).await;

        assert!(!coordinator.retry(coord(8), ProducerKind::Geometry).unwrap());

        let producer = coordinator.producer(ProducerKind::Geometry).unwrap();
        assert!(!tile.is_working(producer.id()));
        assert_eq!(tile.snapshot().unwrap().working_producers, 0);
        assert_eq!(coordinator.metrics_snapshot().registrations, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_kind_producers_both_release_tile() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(ProducerKind::Geometry, geometry_backend())
            .with_producer(ProducerKind::Geometry, geometry_backend())
            .build();

        let (tile, mut events) = coordinator.load_and_subscribe(coord(10)).unwrap();
        assert_eq!(tile.snapshot().unwrap().working_producers, 2);
        wait_finished(&mut events).await;

        assert_eq!(tile.snapshot().unwrap().working_producers, 0);
        let metrics = coordinator.metrics_snapshot();
        assert_eq!(metrics.data_completions, 1);
        assert_eq!(metrics.tiles_finished, 1);
        assert_eq!(metrics.invariant_violations, 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_after_shutdown_fails() {
        let coordinator = TileCoordinator::builder()
            .with_worker_config(fast())
            .with_producer(ProducerKind::Imagery, Arc::new(MemoryFetchBackend::new()))
            .build();
        coordinator.shutdown().await;

        assert!(coordinator.is_shut_down());
        assert!(matches!(
            coordinator.load(coord(6)),
            Err(ProducerError::Stopped(_))
        ));
        assert!(coordinator.tile(coord(6)).is_none());
    }

    #[tokio::test]
    async fn test_from_config_applies_settings() {
        let mut config = ConfigFile::default();
        config.pool.capacity = 3;

        let coordinator = TileCoordinatorBuilder::from_config(&config).build();
        assert_eq!(coordinator.pool().capacity(), 3);
        assert!(coordinator.producers().is_empty());
        coordinator.shutdown().await;
    }
}
