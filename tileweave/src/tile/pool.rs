//! Reuse of tile records across lifetimes.
//!
//! The pool maps each active coordinate to its current [`TileHandle`] and
//! keeps a bounded free list of recycled records. Acquiring a coordinate that
//! is already active returns the existing handle, so at most one lifetime per
//! coordinate is live at a time.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::record::{TileHandle, TileParams, TileRecord};
use crate::coord::TileCoord;
use crate::error::CoordinationError;
use crate::telemetry::CoordinatorMetrics;

/// Default number of recycled records kept for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

// =============================================================================
// Tile Pool
// =============================================================================

/// Active tiles by coordinate plus a free list of recycled records.
pub struct TilePool {
    active: DashMap<TileCoord, TileHandle>,
    recycled: Mutex<Vec<Arc<TileRecord>>>,
    capacity: usize,
    metrics: Arc<CoordinatorMetrics>,
}

impl TilePool {
    pub fn new(capacity: usize, metrics: Arc<CoordinatorMetrics>) -> Self {
        Self {
            active: DashMap::new(),
            recycled: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            metrics,
        }
    }

    /// Returns the active handle for `coord`, initializing a record (reused
    /// from the free list when possible) if the coordinate is not active.
    ///
    /// The flag is `true` when a new lifetime was started; `params` only
    /// apply in that case.
    pub fn acquire(
        &self,
        coord: TileCoord,
        params: TileParams,
    ) -> Result<(TileHandle, bool), CoordinationError> {
        match self.active.entry(coord) {
            Entry::Occupied(entry) => {
                trace!(tile = %coord, "Tile already active");
                Ok((entry.get().clone(), false))
            }
            Entry::Vacant(entry) => {
                let reused = self.recycled.lock().pop();
                let handle = match reused {
                    Some(record) => {
                        trace!(tile = %coord, record = record.id(), "Reusing pooled record");
                        record.initialize(coord, params)?
                    }
                    None => TileRecord::create(coord, params, Arc::clone(&self.metrics)),
                };
                entry.insert(handle.clone());
                Ok((handle, true))
            }
        }
    }

    /// The active handle for `coord`, if any.
    pub fn get(&self, coord: &TileCoord) -> Option<TileHandle> {
        self.active.get(coord).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        self.active.contains_key(coord)
    }

    /// Recycles the tile at `coord` and returns its record to the free list.
    ///
    /// Returns `false` if the coordinate was not active.
    pub fn release(&self, coord: &TileCoord) -> bool {
        let Some((_, handle)) = self.active.remove(coord) else {
            return false;
        };
        let record = Arc::clone(handle.record());
        record.recycle();

        let mut recycled = self.recycled.lock();
        if recycled.len() < self.capacity {
            recycled.push(record);
        } else {
            trace!(tile = %coord, "Pool full, dropping record");
        }
        true
    }

    /// Releases every active tile. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let coords = self.active_coords();
        let released = coords.iter().filter(|coord| self.release(coord)).count();
        debug!(released, "Released all tiles");
        released
    }

    pub fn active_coords(&self) -> Vec<TileCoord> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of recycled records waiting for reuse.
    pub fn pooled_count(&self) -> usize {
        self.recycled.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for TilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TilePool")
            .field("active", &self.active_count())
            .field("pooled", &self.pooled_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}
