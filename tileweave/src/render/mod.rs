//! Render attachment boundary.
//!
//! Producers hand finished channel values to a [`RenderSink`]. How a sink
//! realizes them (texture upload, mesh build, scene attachment) is outside
//! the coordination core.

use parking_lot::Mutex;

use crate::coord::TileCoord;
use crate::decode::{ElevationGrid, ImageHandle, VectorDocument};
use crate::tile::ProducerKind;

/// A finished channel value, borrowed for the duration of a `present` call.
#[derive(Debug, Clone, Copy)]
pub enum Presentation<'a> {
    Imagery(&'a ImageHandle),
    Elevation(&'a ElevationGrid),
    Geometry(&'a VectorDocument),
}

impl Presentation<'_> {
    /// The kind of data being presented.
    pub fn kind(&self) -> ProducerKind {
        match self {
            Presentation::Imagery(_) => ProducerKind::Imagery,
            Presentation::Elevation(_) => ProducerKind::Elevation,
            Presentation::Geometry(_) => ProducerKind::Geometry,
        }
    }
}

/// Receives finished channel values.
///
/// Called from producer workers; implementations must not block for long.
pub trait RenderSink: Send + Sync + 'static {
    fn present(&self, coord: TileCoord, presentation: Presentation<'_>);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderSink;

impl RenderSink for NullRenderSink {
    fn present(&self, _coord: TileCoord, _presentation: Presentation<'_>) {}
}

/// Records which `(tile, kind)` pairs were presented, in order.
#[derive(Debug, Default)]
pub struct RecordingRenderSink {
    presented: Mutex<Vec<(TileCoord, ProducerKind)>>,
}

impl RecordingRenderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything presented so far.
    pub fn presented(&self) -> Vec<(TileCoord, ProducerKind)> {
        self.presented.lock().clone()
    }

    /// How many values of `kind` were presented.
    pub fn count(&self, kind: ProducerKind) -> usize {
        self.presented
            .lock()
            .iter()
            .filter(|(_, k)| *k == kind)
            .count()
    }
}

impl RenderSink for RecordingRenderSink {
    fn present(&self, coord: TileCoord, presentation: Presentation<'_>) {
        self.presented.lock().push((coord, presentation.kind()));
    }
}
