//! Tile state and lifecycle.
//!
//! A tile carries three independently loaded channels (imagery, elevation,
//! geometry). Producers register on a tile while they work on it, complete
//! their channel, and unregister; the tile derives its readiness from that
//! bookkeeping and tells listeners through [`crate::events::TileEvent`]s.
//!
//! - [`DataChannel`], [`DataChannelState`], [`ProducerKind`]: channel and producer identity
//! - [`TileRecord`] / [`TileHandle`]: the per-tile state block and the
//!   lifetime-scoped reference used to drive it
//! - [`TilePool`]: active tiles by coordinate and record reuse

mod cancellation;
mod channel;
mod pool;
mod record;

pub use cancellation::{CancellationRegistry, FetchHandleId};
pub use channel::{
    ChannelStates, DataChannel, DataChannelState, ProducerId, ProducerKind, CHANNEL_COUNT,
};
pub use pool::{TilePool, DEFAULT_POOL_CAPACITY};
pub use record::{TileHandle, TileParams, TileRecord, TileSnapshot, DEFAULT_TILE_SCALE};
