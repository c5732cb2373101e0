//! Payload decoders.
//!
//! Decoding turns the raw bytes a fetch backend returns into the value a
//! tile channel stores: an [`ImageHandle`] for imagery, an [`ElevationGrid`]
//! for elevation, and a [`VectorDocument`] for geometry. Decoders are pure
//! functions of their input; producers run them off the async workers.

mod elevation;
mod geometry;
mod imagery;

pub use elevation::{
    decode_elevation, ElevationEncoding, ElevationGrid, DEFAULT_ELEVATION_OFFSET,
    DEFAULT_ELEVATION_RESOLUTION, ELEVATION_GRID_SIZE, ELEVATION_SAMPLE_COUNT, RAW_ELEVATION_LEN,
};
pub use geometry::{
    parse_geometry, Feature, Geometry, Position, VectorDocument, VectorLayer, DEFAULT_LAYER_NAME,
};
pub use imagery::{decode_imagery, ImageHandle};

use thiserror::Error;

use crate::tile::ProducerKind;

/// Errors raised while decoding a payload. Terminal for the channel on that
/// tile until the caller retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The image codec rejected the payload.
    #[error("Image decode failed: {0}")]
    Image(String),

    /// An elevation image has the wrong size.
    #[error("Elevation image is {width}x{height}, expected {expected}x{expected}")]
    Dimensions { width: u32, height: u32, expected: u32 },

    /// A buffer has the wrong number of bytes or samples.
    #[error("Unexpected payload length {actual} (expected {expected})")]
    Length { actual: usize, expected: usize },

    /// The geometry document could not be parsed.
    #[error("Geometry parse failed: {0}")]
    Geometry(String),

    /// The decoding task itself failed.
    #[error("Decode task aborted: {0}")]
    Aborted(String),
}

/// A decoded payload, tagged by the channel it belongs to.
#[derive(Debug, Clone)]
pub enum DecodedPayload {
    Imagery(ImageHandle),
    Elevation(ElevationGrid),
    Geometry(VectorDocument),
}

impl DecodedPayload {
    /// The producer kind this payload satisfies.
    pub fn kind(&self) -> ProducerKind {
        match self {
            DecodedPayload::Imagery(_) => ProducerKind::Imagery,
            DecodedPayload::Elevation(_) => ProducerKind::Elevation,
            DecodedPayload::Geometry(_) => ProducerKind::Geometry,
        }
    }
}

/// Turns raw bytes into a channel value.
///
/// Implementations must be pure and thread-safe; they are called from
/// blocking worker threads.
pub trait PayloadDecoder: Send + Sync + 'static {
    /// Decodes `bytes` fetched for a producer of `kind`.
    fn decode(&self, kind: ProducerKind, bytes: &[u8]) -> Result<DecodedPayload, DecodeError>;
}

/// Decoder for the payload formats this crate understands.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder {
    elevation: ElevationEncoding,
}

impl StandardDecoder {
    pub fn new(elevation: ElevationEncoding) -> Self {
        Self { elevation }
    }

    pub fn elevation_encoding(&self) -> ElevationEncoding {
        self.elevation
    }
}

impl PayloadDecoder for StandardDecoder {
    fn decode(&self, kind: ProducerKind, bytes: &[u8]) -> Result<DecodedPayload, DecodeError> {
        match kind {
            ProducerKind::Imagery => decode_imagery(bytes).map(DecodedPayload::Imagery),
            ProducerKind::Elevation => {
                decode_elevation(bytes, &self.elevation).map(DecodedPayload::Elevation)
            }
            ProducerKind::Geometry => parse_geometry(bytes).map(DecodedPayload::Geometry),
        }
    }
}
