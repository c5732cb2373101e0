//! Error types for the coordination core.
//!
//! Collaborator errors ([`FetchError`], [`DecodeError`]) are defined next to
//! their collaborators and re-exported here so callers have one place to
//! match on the whole taxonomy.

use thiserror::Error;

use crate::coord::TileCoord;
use crate::tile::{ProducerId, ProducerKind};

pub use crate::decode::DecodeError;
pub use crate::fetch::FetchError;

/// Errors returned by tile operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// The tile was recycled after the caller obtained its handle.
    #[error("Stale reference to tile {coord}: handle generation {held}, tile generation {current}")]
    StaleReference {
        coord: TileCoord,
        held: u64,
        current: u64,
    },

    /// A producer tried to deliver data without an active registration of
    /// the matching kind.
    #[error("{producer} is not registered as a {kind} producer on tile {coord}")]
    NotRegistered {
        coord: TileCoord,
        producer: ProducerId,
        kind: ProducerKind,
    },

    /// A programming error such as a second completion on a finished channel.
    /// State is left untouched.
    ///
    /// Not a panic: the error is logged at error level where it is detected
    /// and counted in `invariant_violations`, which is the signal to watch.
    #[error("Invariant violation on tile {coord}: {detail}")]
    InvariantViolation { coord: TileCoord, detail: String },
}

impl CoordinationError {
    /// Whether this error only means the tile moved on to another lifetime.
    pub fn is_stale(&self) -> bool {
        matches!(self, CoordinationError::StaleReference { .. })
    }
}

/// A producer-level failure for one tile, reported through
/// [`crate::events::ProducerEvent::TileError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// Fetching the raw bytes failed.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The payload could not be decoded.
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
}

impl TileError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TileError::Fetch(e) => e.is_transient(),
            TileError::Decode(_) => false,
        }
    }
}

/// Errors returned when talking to a producer worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    /// The worker task is no longer running.
    #[error("{0} has stopped")]
    Stopped(ProducerId),

    /// The tile rejected the registration.
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord() -> TileCoord {
        TileCoord::new(1, 2, 3).unwrap()
    }

    #[test]
    fn test_stale_reference_display() {
        let err = CoordinationError::StaleReference {
            coord: coord(),
            held: 1,
            current: 2,
        };
        assert!(err.is_stale());
        assert!(err.to_string().contains("3/2/1"));
        assert!(err.to_string().contains("generation 1"));
    }

    #[test]
    fn test_invariant_violation_is_not_stale() {
        let err = CoordinationError::InvariantViolation {
            coord: coord(),
            detail: "duplicate imagery completion".to_string(),
        };
        assert!(!err.is_stale());
        assert!(err.to_string().contains("duplicate imagery completion"));
    }

    #[test]
    fn test_tile_error_transience() {
        let network: TileError = FetchError::Network("reset".to_string()).into();
        let missing: TileError = FetchError::NotFound("404".to_string()).into();
        let decode: TileError = DecodeError::Geometry("eof".to_string()).into();

        assert!(network.is_transient());
        assert!(!missing.is_transient());
        assert!(!decode.is_transient());
    }
}
