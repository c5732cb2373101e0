//! Tileweave - coordination core for multi-source tile loading
//!
//! A tile's content arrives from several independent producers (imagery,
//! elevation, vector geometry) at different times. This library tracks, per
//! tile, which producers are working on it and which channels have
//! finished, and tells consumers exactly when geometry processing may start
//! and when the tile is complete. Tiles are pooled and recycled; handles from
//! an earlier lifetime are rejected rather than corrupting the new one.
//!
//! # High-Level API
//!
//! The [`coordinator`] module wires producers, the tile pool and the
//! collaborators together:
//!
//! ```ignore
//! use tileweave::coordinator::TileCoordinator;
//! use tileweave::tile::ProducerKind;
//!
//! let coordinator = TileCoordinator::builder()
//!     .with_producer(ProducerKind::Imagery, imagery_backend)
//!     .with_producer(ProducerKind::Elevation, elevation_backend)
//!     .with_producer(ProducerKind::Geometry, geometry_backend)
//!     .build();
//!
//! let tile = coordinator.load("12/2048/1361".parse()?)?;
//! let height = tile.query_elevation(0.5, 0.5);
//! ```
//!
//! The lower layers ([`tile`], [`producer`], [`events`]) can be driven
//! directly when a caller brings its own scheduling.

pub mod config;
pub mod coord;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod events;
pub mod fetch;
pub mod logging;
pub mod producer;
pub mod render;
pub mod telemetry;
pub mod tile;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
