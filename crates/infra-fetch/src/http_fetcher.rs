// HTTP artifact fetcher
// reqwest with rustls; success is strictly 200 with a non-empty body
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use rigger_core::port::{ArtifactFetcher, ArtifactOrigin, FetchError, FetchedArtifact};

/// Fetches bootstrap archives with plain HTTP GET
#[derive(Clone, Default)]
pub struct HttpArtifactFetcher {
    http: reqwest::Client,
}

impl HttpArtifactFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxy, timeouts, headers)
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedArtifact, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };

        debug!(url = %url, "Downloading artifact");
        let response = self.http.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        info!(url = %url, size = bytes.len(), "Artifact downloaded");
        Ok(FetchedArtifact {
            url: url.to_string(),
            bytes: bytes.to_vec(),
            origin: ArtifactOrigin::Network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tool-1.0.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive".to_vec()))
            .mount(&server)
            .await;

        let url = format!("{}/tool-1.0.tar.gz", server.uri());
        let artifact = HttpArtifactFetcher::new().fetch(&url).await.unwrap();

        assert_eq!(artifact.bytes, b"archive");
        assert_eq!(artifact.origin, ArtifactOrigin::Network);
        assert_eq!(artifact.url, url);
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        let server = MockServer::start().await;
        let url = format!("{}/missing.tar.gz", server.uri());

        let err = HttpArtifactFetcher::new().fetch(&url).await.unwrap_err();

        assert_eq!(err, FetchError::Status { url, status: 404 });
    }

    #[tokio::test]
    async fn test_fetch_non_200_success_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let url = format!("{}/tool.tar.gz", server.uri());
        let err = HttpArtifactFetcher::new().fetch(&url).await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 204, .. }));
    }

    #[tokio::test]
    async fn test_fetch_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = format!("{}/tool.tar.gz", server.uri());
        let err = HttpArtifactFetcher::new().fetch(&url).await.unwrap_err();

        assert_eq!(err, FetchError::EmptyBody { url });
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Port 9 (discard) is not served in test environments
        let err = HttpArtifactFetcher::new()
            .fetch("http://127.0.0.1:9/tool.tar.gz")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transport { .. }), "{err:?}");
    }
}
