//! Change notifications raised by tiles and producers.
//!
//! Each tile and each producer owns an [`EventBus`]: an explicit list of
//! listener handles. Subscribers receive events through a [`Subscription`].
//!
//! # Example
//!
//! ```ignore
//! let mut events = tile.subscribe()?;
//! while let Some(event) = events.recv().await {
//!     if event.kind == TileEventKind::TileFinished {
//!         break;
//!     }
//! }
//! ```

mod bus;

pub use bus::{EventBus, ListenerId, Subscription};

use crate::coord::TileCoord;
use crate::error::TileError;
use crate::producer::ProducerState;
use crate::tile::{DataChannel, ProducerId, ProducerKind};

/// What happened on a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEventKind {
    /// A channel received its data and is now `Finished`.
    DataChanged(DataChannel),
    /// Every producer still working on the tile is a geometry producer.
    ReadyForGeometryProcessing,
    /// The last working producer left the tile.
    TileFinished,
}

/// A change notification from one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEvent {
    /// Tile the event belongs to.
    pub coord: TileCoord,
    /// Active lifetime the event was raised in. Consumers can compare it
    /// with a handle's generation to discard events buffered before a recycle.
    pub generation: u64,
    /// What happened.
    pub kind: TileEventKind,
}

/// A change notification from one producer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerEvent {
    /// The producer's aggregate state changed.
    StateChanged {
        producer: ProducerId,
        state: ProducerState,
    },
    /// Fetching or decoding data for a tile failed.
    TileError {
        producer: ProducerId,
        coord: TileCoord,
        kind: ProducerKind,
        error: TileError,
    },
}
