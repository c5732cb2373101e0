//! Per-tile state block.
//!
//! A [`TileRecord`] owns the three channel states of one tile, the set of
//! producers currently working on it, the derived readiness flags, its
//! outstanding fetch handles and its listeners. All of it lives behind one
//! mutex: every operation is a short, non-blocking critical section, and
//! events are emitted inside it so listeners observe mutations in order.
//!
//! Callers and producers never touch a record directly; they hold a
//! [`TileHandle`], which pins the active lifetime it was issued for. Once the
//! record is recycled, every mutating call through an older handle fails with
//! [`CoordinationError::StaleReference`].
//!
//! # Readiness
//!
//! ```text
//! Register(imagery)   working = {I}      ready = false
//! Register(geometry)  working = {I, G}   ready = false
//! Unregister(I)       working = {G}      ready = true  ──► ReadyForGeometryProcessing
//! Unregister(G)       working = {}                     ──► TileFinished
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::cancellation::{CancellationRegistry, FetchHandleId};
use super::channel::{ChannelStates, DataChannel, DataChannelState, ProducerId, ProducerKind};
use crate::coord::TileCoord;
use crate::decode::{ElevationGrid, ImageHandle, VectorDocument};
use crate::error::CoordinationError;
use crate::events::{EventBus, ListenerId, Subscription, TileEvent, TileEventKind};
use crate::telemetry::CoordinatorMetrics;

/// Global sequence for record identities.
static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Default render scale factor applied to elevation queries.
pub const DEFAULT_TILE_SCALE: f32 = 1.0;

/// Per-lifetime settings supplied when a tile is initialized.
#[derive(Debug, Clone)]
pub struct TileParams {
    /// Render scale factor; elevation queries are multiplied by it.
    pub scale: f32,
    /// Zoom level the caller is displaying the tile at.
    pub zoom_level: u8,
    /// Image shown until imagery arrives.
    pub placeholder: Option<Arc<ImageHandle>>,
}

impl TileParams {
    pub fn new(scale: f32, zoom_level: u8) -> Self {
        Self {
            scale,
            zoom_level,
            placeholder: None,
        }
    }

    pub fn with_placeholder(mut self, placeholder: Arc<ImageHandle>) -> Self {
        self.placeholder = Some(placeholder);
        self
    }
}

impl Default for TileParams {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SCALE, 0)
    }
}

/// Observable state of a tile at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSnapshot {
    pub coord: TileCoord,
    pub generation: u64,
    pub channels: ChannelStates,
    pub ready_for_geometry_processing: bool,
    pub finished: bool,
    pub working_producers: usize,
    pub outstanding_fetches: usize,
    pub cancelled: bool,
    pub scale: f32,
    pub zoom_level: u8,
}

struct TileState {
    generation: u64,
    coord: Option<TileCoord>,
    params: TileParams,
    channels: ChannelStates,
    working: HashMap<ProducerId, ProducerKind>,
    ready_for_geometry: bool,
    ready_announced: bool,
    finished_announced: bool,
    imagery: Option<Arc<ImageHandle>>,
    elevation: Option<Arc<ElevationGrid>>,
    geometry: Option<Arc<VectorDocument>>,
    fetches: CancellationRegistry,
    listeners: EventBus<TileEvent>,
}

impl TileState {
    fn empty() -> Self {
        Self {
            generation: 0,
            coord: None,
            params: TileParams::default(),
            channels: ChannelStates::default(),
            working: HashMap::new(),
            ready_for_geometry: false,
            ready_announced: false,
            finished_announced: false,
            imagery: None,
            elevation: None,
            geometry: None,
            fetches: CancellationRegistry::new(),
            listeners: EventBus::new(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.coord.is_some() && self.generation == generation
    }

    fn emit(&mut self, coord: TileCoord, kind: TileEventKind) {
        let event = TileEvent {
            coord,
            generation: self.generation,
            kind,
        };
        let delivered = self.listeners.emit(event);
        trace!(tile = %coord, ?kind, listeners = delivered, "Tile event");
    }

    fn snapshot(&self, coord: TileCoord) -> TileSnapshot {
        TileSnapshot {
            coord,
            generation: self.generation,
            channels: self.channels,
            ready_for_geometry_processing: self.ready_for_geometry,
            finished: self.finished_announced,
            working_producers: self.working.len(),
            outstanding_fetches: self.fetches.len(),
            cancelled: self.fetches.is_cancelled(),
            scale: self.params.scale,
            zoom_level: self.params.zoom_level,
        }
    }
}

/// Poolable state block for one tile.
pub struct TileRecord {
    id: u64,
    state: Mutex<TileState>,
    metrics: Arc<CoordinatorMetrics>,
}

impl TileRecord {
    /// Creates an uninitialized record, e.g. to pre-fill a pool.
    pub fn new(metrics: Arc<CoordinatorMetrics>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(TileState::empty()),
            metrics,
        })
    }

    /// Creates a record and initializes it in one step.
    pub fn create(
        coord: TileCoord,
        params: TileParams,
        metrics: Arc<CoordinatorMetrics>,
    ) -> TileHandle {
        let record = Self::new(metrics);
        let generation = {
            let mut state = record.state.lock();
            record.activate(&mut state, coord, params)
        };
        TileHandle {
            record,
            generation,
            coord,
        }
    }

    /// Starts a new active lifetime for `coord`.
    ///
    /// Fails with [`CoordinationError::InvariantViolation`] if the record is
    /// still active; recycle it first.
    pub fn initialize(
        self: &Arc<Self>,
        coord: TileCoord,
        params: TileParams,
    ) -> Result<TileHandle, CoordinationError> {
        let mut state = self.state.lock();
        if let Some(current) = state.coord {
            self.metrics.invariant_violated();
            error!(tile = %current, requested = %coord, "Initialize on an active tile");
            return Err(CoordinationError::InvariantViolation {
                coord: current,
                detail: format!("initialize({}) while still active", coord),
            });
        }
        let generation = self.activate(&mut state, coord, params);
        Ok(TileHandle {
            record: Arc::clone(self),
            generation,
            coord,
        })
    }

    fn activate(&self, state: &mut TileState, coord: TileCoord, params: TileParams) -> u64 {
        state.coord = Some(coord);
        state.params = params;
        self.metrics.tile_initialized();
        debug!(tile = %coord, generation = state.generation, "Tile initialized");
        state.generation
    }

    /// Ends the active lifetime: cancels outstanding fetches, resets every
    /// channel to `None`, forgets working producers, cached data and
    /// listeners. The record can then be initialized again.
    ///
    /// Returns `false` if the record was not active.
    pub fn recycle(&self) -> bool {
        let mut state = self.state.lock();
        let Some(coord) = state.coord.take() else {
            return false;
        };
        let cancelled = state.fetches.cancel_all();
        state.fetches.reset();
        state.listeners.clear();
        state.channels.reset();
        state.working.clear();
        state.ready_for_geometry = false;
        state.ready_announced = false;
        state.finished_announced = false;
        state.imagery = None;
        state.elevation = None;
        state.geometry = None;
        state.params = TileParams::default();
        state.generation += 1;
        self.metrics.tile_recycled();
        debug!(tile = %coord, cancelled, next_generation = state.generation, "Tile recycled");
        true
    }

    /// Handle for the current active lifetime, if any.
    pub fn handle(self: &Arc<Self>) -> Option<TileHandle> {
        let state = self.state.lock();
        state.coord.map(|coord| TileHandle {
            record: Arc::clone(self),
            generation: state.generation,
            coord,
        })
    }

    /// Process-unique identity of this record.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifetime generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Whether the record is initialized and not yet recycled.
    pub fn is_active(&self) -> bool {
        self.state.lock().coord.is_some()
    }

    /// Runs `f` on the state if `generation` is still the active lifetime.
    fn with_current<R>(
        &self,
        coord: TileCoord,
        generation: u64,
        f: impl FnOnce(&mut TileState) -> Result<R, CoordinationError>,
    ) -> Result<R, CoordinationError> {
        let mut state = self.state.lock();
        if !state.is_current(generation) {
            self.metrics.stale_operation();
            trace!(tile = %coord, held = generation, current = state.generation, "Stale tile handle");
            return Err(CoordinationError::StaleReference {
                coord,
                held: generation,
                current: state.generation,
            });
        }
        f(&mut state)
    }

    fn register(
        &self,
        coord: TileCoord,
        generation: u64,
        producer: ProducerId,
        kind: ProducerKind,
    ) -> Result<(), CoordinationError> {
        self.with_current(coord, generation, |state| {
            if state.working.insert(producer, kind).is_none() {
                self.metrics.producer_registered();
            }
            let channel = kind.channel();
            if state.channels.get(channel) == DataChannelState::None {
                state.channels.advance(channel, DataChannelState::Working);
            }
            if !kind.is_geometry() {
                state.ready_for_geometry = false;
            }
            debug!(
                tile = %coord,
                %producer,
                %kind,
                working = state.working.len(),
                "Producer registered"
            );
            Ok(())
        })
    }

    fn unregister(
        &self,
        coord: TileCoord,
        generation: u64,
        producer: ProducerId,
    ) -> Result<(), CoordinationError> {
        self.with_current(coord, generation, |state| {
            let Some(kind) = state.working.remove(&producer) else {
                trace!(tile = %coord, %producer, "Unregister for a producer not working on tile");
                return Ok(());
            };
            debug!(
                tile = %coord,
                %producer,
                %kind,
                working = state.working.len(),
                "Producer unregistered"
            );

            let ready = state.working.values().all(|k| k.is_geometry());
            state.ready_for_geometry = ready;
            if ready && !state.ready_announced {
                state.ready_announced = true;
                self.metrics.ready_announced();
                debug!(tile = %coord, "Tile ready for geometry processing");
                state.emit(coord, TileEventKind::ReadyForGeometryProcessing);
            }

            if state.working.is_empty() {
                state
                    .channels
                    .advance(DataChannel::Geometry, DataChannelState::Finished);
                if !state.finished_announced {
                    state.finished_announced = true;
                    self.metrics.tile_finished();
                    debug!(tile = %coord, "Tile finished");
                    state.emit(coord, TileEventKind::TileFinished);
                }
            }
            Ok(())
        })
    }

    /// Marks the producer's channel `Finished` after `store` caches the value.
    ///
    /// A second completion of a finished channel is a caller bug. It is
    /// reported through the `error!` log and the `invariant_violations`
    /// counter, and returned as [`CoordinationError::InvariantViolation`]
    /// with the tile left as it was. It never panics, so one misbehaving
    /// producer cannot take down the workers sharing the runtime.
    fn complete(
        &self,
        coord: TileCoord,
        generation: u64,
        producer: ProducerId,
        kind: ProducerKind,
        store: impl FnOnce(&mut TileState),
    ) -> Result<(), CoordinationError> {
        self.with_current(coord, generation, |state| {
            if state.working.get(&producer) != Some(&kind) {
                return Err(CoordinationError::NotRegistered {
                    coord,
                    producer,
                    kind,
                });
            }
            let channel = kind.channel();
            if state.channels.get(channel) == DataChannelState::Finished {
                self.metrics.invariant_violated();
                error!(tile = %coord, %producer, %channel, "Duplicate completion on finished channel");
                return Err(CoordinationError::InvariantViolation {
                    coord,
                    detail: format!("duplicate {} completion", channel),
                });
            }
            store(state);
            state.channels.advance(channel, DataChannelState::Finished);
            self.metrics.data_completed();
            debug!(tile = %coord, %producer, %channel, "Channel finished");
            state.emit(coord, TileEventKind::DataChanged(channel));
            Ok(())
        })
    }
}

impl fmt::Debug for TileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TileRecord")
            .field("id", &self.id)
            .field("generation", &state.generation)
            .field("coord", &state.coord)
            .field("channels", &state.channels)
            .field("working", &state.working.len())
            .finish()
    }
}

/// Reference to one active lifetime of a tile.
///
/// Cheap to clone. Two handles are equal when they refer to the same record
/// and the same lifetime, so handles can key producer queues.
#[derive(Clone)]
pub struct TileHandle {
    record: Arc<TileRecord>,
    generation: u64,
    coord: TileCoord,
}

impl TileHandle {
    /// Creates a standalone tile with its own metrics.
    pub fn new(coord: TileCoord, params: TileParams) -> Self {
        TileRecord::create(coord, params, CoordinatorMetrics::new())
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// The lifetime this handle was issued for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn record(&self) -> &Arc<TileRecord> {
        &self.record
    }

    /// Whether the tile has been recycled since this handle was issued.
    pub fn is_stale(&self) -> bool {
        !self.record.state.lock().is_current(self.generation)
    }

    /// Adds `producer` to the working set and moves its channel to `Working`.
    pub fn register(&self, producer: ProducerId, kind: ProducerKind) -> Result<(), CoordinationError> {
        self.record
            .register(self.coord, self.generation, producer, kind)
    }

    /// Removes `producer` from the working set and re-evaluates readiness.
    ///
    /// Unregistering a producer that is not working on the tile is a no-op.
    pub fn unregister(&self, producer: ProducerId) -> Result<(), CoordinationError> {
        self.record.unregister(self.coord, self.generation, producer)
    }

    /// Records finished imagery.
    ///
    /// # Errors
    ///
    /// `StaleReference` for a recycled tile, `NotRegistered` without a
    /// matching registration, and `InvariantViolation` if imagery already
    /// finished. The last one is also logged at error level and counted in
    /// [`crate::telemetry::MetricsSnapshot::invariant_violations`].
    pub fn set_imagery_data(
        &self,
        producer: ProducerId,
        image: Arc<ImageHandle>,
    ) -> Result<(), CoordinationError> {
        self.record.complete(
            self.coord,
            self.generation,
            producer,
            ProducerKind::Imagery,
            |state| state.imagery = Some(image),
        )
    }

    /// Caches the elevation grid for height queries, then records the
    /// channel as finished.
    pub fn set_elevation_data(
        &self,
        producer: ProducerId,
        grid: Arc<ElevationGrid>,
    ) -> Result<(), CoordinationError> {
        self.record.complete(
            self.coord,
            self.generation,
            producer,
            ProducerKind::Elevation,
            |state| state.elevation = Some(grid),
        )
    }

    /// Records finished geometry.
    pub fn set_geometry_data(
        &self,
        producer: ProducerId,
        document: Arc<VectorDocument>,
    ) -> Result<(), CoordinationError> {
        self.record.complete(
            self.coord,
            self.generation,
            producer,
            ProducerKind::Geometry,
            |state| state.geometry = Some(document),
        )
    }

    /// Height at normalized tile coordinates `(u, v)`, scaled by the tile's
    /// render scale. Returns `0.0` until elevation is finished, and for
    /// stale handles.
    pub fn query_elevation(&self, u: f32, v: f32) -> f32 {
        let state = self.record.state.lock();
        if !state.is_current(self.generation)
            || state.channels.get(DataChannel::Elevation) != DataChannelState::Finished
        {
            return 0.0;
        }
        match &state.elevation {
            Some(grid) => grid.sample(u, v) * state.params.scale,
            None => 0.0,
        }
    }

    /// Requests abort of every outstanding fetch handle. Idempotent, and a
    /// no-op once the tile has been recycled.
    pub fn cancel(&self) {
        let mut state = self.record.state.lock();
        if !state.is_current(self.generation) {
            trace!(tile = %self.coord, "Cancel on recycled tile ignored");
            return;
        }
        let signalled = state.fetches.cancel_all();
        debug!(tile = %self.coord, signalled, "Tile cancelled");
    }

    /// Tracks a fetch so that cancelling or recycling the tile aborts it.
    pub fn add_fetch_handle(
        &self,
        token: CancellationToken,
    ) -> Result<FetchHandleId, CoordinationError> {
        self.record
            .with_current(self.coord, self.generation, |state| {
                Ok(state.fetches.insert(token))
            })
    }

    /// Forgets a completed fetch. Returns `false` if it was unknown or the
    /// tile has been recycled.
    pub fn release_fetch_handle(&self, id: FetchHandleId) -> bool {
        let mut state = self.record.state.lock();
        state.is_current(self.generation) && state.fetches.release(id)
    }

    /// Attaches a listener for this lifetime's events.
    pub fn subscribe(&self) -> Result<Subscription<TileEvent>, CoordinationError> {
        self.record
            .with_current(self.coord, self.generation, |state| {
                Ok(state.listeners.subscribe())
            })
    }

    /// Detaches a listener. Returns `false` if it was not attached.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut state = self.record.state.lock();
        state.is_current(self.generation) && state.listeners.unsubscribe(id)
    }

    pub fn channel_state(&self, channel: DataChannel) -> Result<DataChannelState, CoordinationError> {
        self.record
            .with_current(self.coord, self.generation, |state| {
                Ok(state.channels.get(channel))
            })
    }

    pub fn is_ready_for_geometry_processing(&self) -> Result<bool, CoordinationError> {
        self.record
            .with_current(self.coord, self.generation, |state| {
                Ok(state.ready_for_geometry)
            })
    }

    /// Whether `producer` is currently registered on the tile.
    pub fn is_working(&self, producer: ProducerId) -> bool {
        let state = self.record.state.lock();
        state.is_current(self.generation) && state.working.contains_key(&producer)
    }

    pub fn snapshot(&self) -> Result<TileSnapshot, CoordinationError> {
        self.record
            .with_current(self.coord, self.generation, |state| {
                Ok(state.snapshot(self.coord))
            })
    }

    pub fn imagery(&self) -> Option<Arc<ImageHandle>> {
        let state = self.record.state.lock();
        state
            .is_current(self.generation)
            .then(|| state.imagery.clone())
            .flatten()
    }

    /// Finished imagery, or the placeholder supplied at initialization.
    pub fn imagery_or_placeholder(&self) -> Option<Arc<ImageHandle>> {
        let state = self.record.state.lock();
        if !state.is_current(self.generation) {
            return None;
        }
        state
            .imagery
            .clone()
            .or_else(|| state.params.placeholder.clone())
    }

    pub fn elevation(&self) -> Option<Arc<ElevationGrid>> {
        let state = self.record.state.lock();
        state
            .is_current(self.generation)
            .then(|| state.elevation.clone())
            .flatten()
    }

    pub fn geometry(&self) -> Option<Arc<VectorDocument>> {
        let state = self.record.state.lock();
        state
            .is_current(self.generation)
            .then(|| state.geometry.clone())
            .flatten()
    }
}

impl PartialEq for TileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id && self.generation == other.generation
    }
}

impl Eq for TileHandle {}

impl Hash for TileHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.id.hash(state);
        self.generation.hash(state);
    }
}

impl fmt::Debug for TileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileHandle")
            .field("coord", &self.coord)
            .field("record", &self.record.id)
            .field("generation", &self.generation)
            .finish()
    }
}
