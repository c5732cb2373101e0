//! Coordinate type definitions

use std::fmt;
use std::str::FromStr;

/// Lowest zoom level accepted for a tile coordinate.
pub const MIN_ZOOM: u8 = 0;

/// Highest zoom level accepted for a tile coordinate.
pub const MAX_ZOOM: u8 = 24;

/// Canonical tile coordinate in a square slippy-map grid.
///
/// This is the identity of a tile for its whole active lifetime. The grid at
/// zoom `z` is `2^z × 2^z` tiles; `row` grows southward and `col` eastward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Y coordinate (north-south), 0 at north
    pub row: u32,
    /// X coordinate (east-west), 0 at west
    pub col: u32,
    /// Zoom level
    pub zoom: u8,
}

impl TileCoord {
    /// Creates a coordinate, validating it against the grid at `zoom`.
    pub fn new(row: u32, col: u32, zoom: u8) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        let size = grid_size(zoom);
        if u64::from(row) >= size {
            return Err(CoordError::RowOutOfRange { row, zoom });
        }
        if u64::from(col) >= size {
            return Err(CoordError::ColOutOfRange { col, zoom });
        }
        Ok(Self { row, col, zoom })
    }

    /// Returns the parent tile one zoom level up, or `None` at zoom 0.
    pub fn parent(&self) -> Option<Self> {
        if self.zoom == MIN_ZOOM {
            return None;
        }
        Some(Self {
            row: self.row / 2,
            col: self.col / 2,
            zoom: self.zoom - 1,
        })
    }

    /// Returns the four children one zoom level down (NW, NE, SW, SE).
    pub fn children(&self) -> Option<[Self; 4]> {
        if self.zoom >= MAX_ZOOM {
            return None;
        }
        let (row, col, zoom) = (self.row * 2, self.col * 2, self.zoom + 1);
        Some([
            Self { row, col, zoom },
            Self { row, col: col + 1, zoom },
            Self { row: row + 1, col, zoom },
            Self { row: row + 1, col: col + 1, zoom },
        ])
    }
}

/// Number of tiles along one edge of the grid at `zoom`.
#[inline]
pub fn grid_size(zoom: u8) -> u64 {
    1u64 << zoom
}

impl fmt::Display for TileCoord {
    /// Formats as `zoom/col/row`, the order used by tile URL schemes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

impl FromStr for TileCoord {
    type Err = CoordError;

    /// Parses the `zoom/col/row` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let [zoom, col, row] = parts.as_slice() else {
            return Err(CoordError::Malformed(s.to_string()));
        };
        let parse = |v: &str| {
            v.parse::<u32>()
                .map_err(|_| CoordError::Malformed(s.to_string()))
        };
        let zoom = u8::try_from(parse(*zoom)?)
            .map_err(|_| CoordError::Malformed(s.to_string()))?;
        Self::new(parse(*row)?, parse(*col)?, zoom)
    }
}

/// Errors that can occur when building or parsing a tile coordinate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordError {
    /// Zoom level outside the supported range
    #[error("Invalid zoom level: {0}")]
    InvalidZoom(u8),

    /// Row does not exist at this zoom level
    #[error("Row {row} out of range at zoom {zoom}")]
    RowOutOfRange { row: u32, zoom: u8 },

    /// Column does not exist at this zoom level
    #[error("Column {col} out of range at zoom {zoom}")]
    ColOutOfRange { col: u32, zoom: u8 },

    /// Text is not in `zoom/col/row` form
    #[error("Malformed tile coordinate: '{0}'")]
    Malformed(String),
}
