//! Data channels of a tile and the producer kinds that fill them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of data channels a tile carries.
pub const CHANNEL_COUNT: usize = 3;

/// One independent data facet of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataChannel {
    /// Raster imagery draped over the tile.
    Imagery,
    /// Height samples used to displace the tile mesh.
    Elevation,
    /// Vector features built into meshes on top of the tile.
    Geometry,
}

impl DataChannel {
    /// All channels in storage order.
    pub const ALL: [DataChannel; CHANNEL_COUNT] = [
        DataChannel::Imagery,
        DataChannel::Elevation,
        DataChannel::Geometry,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            DataChannel::Imagery => 0,
            DataChannel::Elevation => 1,
            DataChannel::Geometry => 2,
        }
    }

    /// Short lowercase name, used in logs and URL templates.
    pub fn as_str(self) -> &'static str {
        match self {
            DataChannel::Imagery => "imagery",
            DataChannel::Elevation => "elevation",
            DataChannel::Geometry => "geometry",
        }
    }
}

impl fmt::Display for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loading state of a single channel.
///
/// States are ordered: a channel only ever moves forward within one active
/// lifetime, and is reset to `None` solely by recycling the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DataChannelState {
    /// Nobody has asked for this channel yet.
    #[default]
    None,
    /// A producer is registered and loading this channel.
    Working,
    /// Data for this channel has been delivered.
    Finished,
}

/// The kind of a producer, fixed at registration time.
///
/// The tile switches on this tag to decide which channel a producer affects
/// and whether it blocks geometry processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerKind {
    Imagery,
    Elevation,
    Geometry,
}

impl ProducerKind {
    /// The channel this kind of producer fills.
    pub fn channel(self) -> DataChannel {
        match self {
            ProducerKind::Imagery => DataChannel::Imagery,
            ProducerKind::Elevation => DataChannel::Elevation,
            ProducerKind::Geometry => DataChannel::Geometry,
        }
    }

    /// Whether this kind is a geometry producer.
    pub fn is_geometry(self) -> bool {
        matches!(self, ProducerKind::Geometry)
    }

    /// Short lowercase name, used in logs and URL templates.
    pub fn as_str(self) -> &'static str {
        self.channel().as_str()
    }
}

impl fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global sequence for producer identities.
static NEXT_PRODUCER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a producer.
///
/// Tiles record producers by id only, so neither side keeps the other alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(u64);

impl ProducerId {
    /// Allocates a new process-unique id.
    pub fn next() -> Self {
        Self(NEXT_PRODUCER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "producer-{}", self.0)
    }
}

/// Per-channel states of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStates([DataChannelState; CHANNEL_COUNT]);

impl ChannelStates {
    /// Returns the state of `channel`.
    pub fn get(&self, channel: DataChannel) -> DataChannelState {
        self.0[channel.index()]
    }

    /// Moves `channel` forward to `state`.
    ///
    /// Returns `false` and leaves the channel untouched when `state` would be a
    /// backward transition.
    pub(crate) fn advance(&mut self, channel: DataChannel, state: DataChannelState) -> bool {
        let slot = &mut self.0[channel.index()];
        if state < *slot {
            return false;
        }
        *slot = state;
        true
    }

    pub(crate) fn reset(&mut self) {
        self.0 = [DataChannelState::None; CHANNEL_COUNT];
    }

    /// Whether every channel is `Finished`.
    pub fn all_finished(&self) -> bool {
        self.0.iter().all(|s| *s == DataChannelState::Finished)
    }
}
