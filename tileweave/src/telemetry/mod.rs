//! Coordination telemetry.
//!
//! Lock-free counters recorded by tiles, the pool and producer workers, with
//! point-in-time snapshots for display.
//!
//! ```text
//! TileRecord / ProducerWorker ───► CoordinatorMetrics ───► MetricsSnapshot ───► CLI
//!                                  (atomic counters)       (plain copy)
//! ```
//!
//! # Example
//!
//! ```
//! use tileweave::telemetry::CoordinatorMetrics;
//!
//! let metrics = CoordinatorMetrics::new();
//! metrics.tile_finished();
//! assert_eq!(metrics.snapshot().tiles_finished, 1);
//! ```

mod metrics;
mod snapshot;

pub use metrics::CoordinatorMetrics;
pub use snapshot::MetricsSnapshot;
