//! In-memory fetch backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::{BoxFuture, FetchBackend, FetchError, FetchRequest};

type Generator = dyn Fn(&FetchRequest) -> Result<Bytes, FetchError> + Send + Sync;

/// Serves payloads from memory.
///
/// Explicit entries win; otherwise an optional generator is consulted;
/// otherwise the request fails with [`FetchError::NotFound`]. An optional
/// latency simulates a slow network and can be interrupted by cancellation.
#[derive(Default)]
pub struct MemoryFetchBackend {
    entries: DashMap<FetchRequest, Result<Bytes, FetchError>>,
    generator: Option<Arc<Generator>>,
    latency: Option<Duration>,
    requests: AtomicUsize,
}

impl MemoryFetchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `generator` for requests without an explicit entry.
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&FetchRequest) -> Result<Bytes, FetchError> + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// Delays every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serves `bytes` for `request`.
    pub fn insert(&self, request: FetchRequest, bytes: impl Into<Bytes>) {
        self.entries.insert(request, Ok(bytes.into()));
    }

    /// Fails `request` with `error`.
    pub fn fail(&self, request: FetchRequest, error: FetchError) {
        self.entries.insert(request, Err(error));
    }

    /// Number of fetches started so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    fn lookup(&self, request: &FetchRequest) -> Result<Bytes, FetchError> {
        if let Some(entry) = self.entries.get(request) {
            return entry.value().clone();
        }
        match &self.generator {
            Some(generator) => generator(request),
            None => Err(FetchError::NotFound(format!(
                "{} {}",
                request.kind, request.coord
            ))),
        }
    }
}

impl FetchBackend for MemoryFetchBackend {
    fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, FetchError>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(latency) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.lookup(&request)
        })
    }
}
