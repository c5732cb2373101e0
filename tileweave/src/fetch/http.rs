//! HTTP fetch backend.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BoxFuture, FetchBackend, FetchError, FetchRequest};

/// Default request timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Fetches tile payloads from a URL template.
///
/// The template may contain `{z}`, `{x}`, `{y}` and `{kind}` placeholders,
/// e.g. `https://tiles.example.com/{kind}/{z}/{x}/{y}.png`, where `x` is the
/// column and `y` the row.
pub struct HttpFetchBackend {
    client: reqwest::Client,
    url_template: String,
}

impl HttpFetchBackend {
    /// Creates a backend with the default timeout.
    pub fn new(url_template: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeout(url_template, Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
    }

    /// Creates a backend with a custom request timeout.
    pub fn with_timeout(
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    /// Expands the URL template for `request`.
    pub fn url_for(&self, request: &FetchRequest) -> String {
        self.url_template
            .replace("{z}", &request.coord.zoom.to_string())
            .replace("{x}", &request.coord.col.to_string())
            .replace("{y}", &request.coord.row.to_string())
            .replace("{kind}", request.kind.as_str())
    }

    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {} from {}", status, url)));
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read response: {}", e)))
    }
}

impl FetchBackend for HttpFetchBackend {
    fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Bytes, FetchError>> {
        Box::pin(async move {
            let url = self.url_for(&request);
            debug!(tile = %request.coord, kind = %request.kind, url = %url, "HTTP fetch");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = self.get(&url) => result,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use crate::tile::ProducerKind;

    #[test]
    fn test_url_template_expansion() {
        let backend =
            HttpFetchBackend::new("https://tiles.example.com/{kind}/{z}/{x}/{y}.png").unwrap();
        let request =
            FetchRequest::new(TileCoord::new(11, 22, 6).unwrap(), ProducerKind::Elevation);

        assert_eq!(
            backend.url_for(&request),
            "https://tiles.example.com/elevation/6/22/11.png"
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_request_returns_cancelled() {
        // Unroutable address; the cancelled token must win the race.
        let backend = HttpFetchBackend::new("http://10.255.255.1/{z}/{x}/{y}").unwrap();
        let request = FetchRequest::new(TileCoord::new(0, 0, 0).unwrap(), ProducerKind::Imagery);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = backend.fetch(request, cancel).await;
        assert_eq!(result, Err(FetchError::Cancelled));
    }
}
