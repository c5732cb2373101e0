//! Fetch backend abstraction
//!
//! A fetch backend turns a `(tile, kind)` request into raw bytes. The
//! coordination core never performs I/O itself; producers call a backend
//! with a [`CancellationToken`] registered on the tile so that cancelling or
//! recycling the tile aborts the request.
//!
//! # Backends
//!
//! - [`HttpFetchBackend`] - fetches from a URL template over HTTP
//! - [`MemoryFetchBackend`] - serves payloads from memory (tests, simulation)

mod http;
mod memory;

pub use http::{HttpFetchBackend, DEFAULT_FETCH_TIMEOUT_SECS};
pub use memory::MemoryFetchBackend;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::coord::TileCoord;
use crate::tile::ProducerKind;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors a fetch backend can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The backend has no data for this tile.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure; retrying may succeed.
    #[error("Network error: {0}")]
    Network(String),

    /// The request was aborted through its cancellation token.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

/// What to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub coord: TileCoord,
    pub kind: ProducerKind,
}

impl FetchRequest {
    pub fn new(coord: TileCoord, kind: ProducerKind) -> Self {
        Self { coord, kind }
    }
}

/// Source of raw tile bytes.
///
/// Implementations should return [`FetchError::Cancelled`] promptly once
/// `cancel` fires. The trait uses boxed futures so it can be held as
/// `Arc<dyn FetchBackend>`.
pub trait FetchBackend: Send + Sync + 'static {
    /// Fetches the payload for `request`.
    fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, FetchError>>;
}
