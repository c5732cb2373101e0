//! Atomic counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::snapshot::MetricsSnapshot;

/// Shared counters for the coordination core.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    tiles_initialized: AtomicU64,
    tiles_recycled: AtomicU64,
    registrations: AtomicU64,
    data_completions: AtomicU64,
    ready_announcements: AtomicU64,
    tiles_finished: AtomicU64,
    fetch_errors: AtomicU64,
    decode_errors: AtomicU64,
    stale_operations: AtomicU64,
    invariant_violations: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tile_initialized(&self) {
        self.tiles_initialized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_recycled(&self) {
        self.tiles_recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn producer_registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_completed(&self) {
        self.data_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ready_announced(&self) {
        self.ready_announcements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_finished(&self) {
        self.tiles_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_failed(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_operation(&self) {
        self.stale_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invariant_violated(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tiles_initialized: self.tiles_initialized.load(Ordering::Relaxed),
            tiles_recycled: self.tiles_recycled.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            data_completions: self.data_completions.load(Ordering::Relaxed),
            ready_announcements: self.ready_announcements.load(Ordering::Relaxed),
            tiles_finished: self.tiles_finished.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            stale_operations: self.stale_operations.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
        }
    }
}
