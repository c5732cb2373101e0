//! Outstanding fetch handles owned by a tile.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

/// Identifies one registered fetch handle within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchHandleId(u64);

/// The set of low-level in-flight operations a tile must abort when it is
/// cancelled or recycled.
///
/// Cancellation is cooperative: tokens are signalled, and the operations
/// holding them stop whenever they next observe the signal.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    handles: HashMap<FetchHandleId, CancellationToken>,
    next_id: u64,
    cancelled: bool,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `token` until it is released or the registry is cancelled.
    ///
    /// If the registry has already been cancelled in this lifetime the token
    /// is cancelled immediately.
    pub fn insert(&mut self, token: CancellationToken) -> FetchHandleId {
        let id = FetchHandleId(self.next_id);
        self.next_id += 1;
        if self.cancelled {
            token.cancel();
        }
        self.handles.insert(id, token);
        id
    }

    /// Stops tracking a handle whose operation has completed.
    pub fn release(&mut self, id: FetchHandleId) -> bool {
        self.handles.remove(&id).is_some()
    }

    /// Signals every outstanding handle. Idempotent.
    ///
    /// Returns the number of handles signalled by this call.
    pub fn cancel_all(&mut self) -> usize {
        self.cancelled = true;
        let mut signalled = 0;
        for token in self.handles.values() {
            if !token.is_cancelled() {
                token.cancel();
                signalled += 1;
            }
        }
        signalled
    }

    /// Cancels everything and forgets all handles, ready for a new lifetime.
    pub fn reset(&mut self) {
        self.cancel_all();
        self.handles.clear();
        self.cancelled = false;
    }

    /// Whether [`cancel_all`](Self::cancel_all) ran in this lifetime.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of outstanding handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle is outstanding.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
