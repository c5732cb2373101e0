//! Tile coordinate module
//!
//! Provides the canonical grid coordinate that identifies a tile. Geographic
//! projection is left to callers; the coordination core only needs a stable,
//! hashable identity.

mod types;

pub use types::{grid_size, CoordError, TileCoord, MAX_ZOOM, MIN_ZOOM};
