//! Fetching remote documents.

use reqwest::{Client, Url};
use tracing::debug;

use crate::error::EngineError;
use crate::Result;

/// Downloads documents referenced by URL.
#[derive(Debug, Clone, Default)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Use a preconfigured HTTP client (proxies, timeouts, headers).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetch the full body of `url`.
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let fail = |reason: String| EngineError::Fetch {
            url: url.to_string(),
            reason,
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(fail(format!("unsupported scheme '{}'", url.scheme())));
        }

        debug!("fetching remote document: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status)));
        }

        let body = response.bytes().await.map_err(|e| fail(e.to_string()))?;
        debug!("fetched {} bytes from {}", body.len(), url);
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::serve_once;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fetches_body() {
        let url = serve_once("200 OK", b"%PDF-1.5 body".to_vec()).await;
        let body = Fetcher::default().fetch(&url).await.unwrap();
        assert_eq!(body, b"%PDF-1.5 body".to_vec());
    }

    #[tokio::test]
    async fn test_error_status_is_fetch_error() {
        let url = serve_once("404 Not Found", b"missing".to_vec()).await;
        let err = Fetcher::default().fetch(&url).await.unwrap_err();
        match err {
            EngineError::Fetch { reason, .. } => assert!(reason.contains("404"), "{reason}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let url = Url::parse("ftp://example.com/doc.pdf").unwrap();
        let err = Fetcher::default().fetch(&url).await.unwrap_err();
        match err {
            EngineError::Fetch { url, reason } => {
                assert_eq!(url, "ftp://example.com/doc.pdf");
                assert!(reason.contains("ftp"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_error() {
        // Port 9 (discard) is closed on loopback; the connection is refused.
        let url = Url::parse("http://127.0.0.1:9/doc.pdf").unwrap();
        let err = Fetcher::default().fetch(&url).await.unwrap_err();
        assert_eq!(err.name(), "FetchException");
    }
}
