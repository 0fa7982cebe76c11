// Artifact Fetcher Port
// Downloads tool archives for bootstrap

use async_trait::async_trait;
use thiserror::Error;

/// Where fetched bytes came from (diagnostics only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    Network,
    Cache,
}

/// Downloaded archive
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub url: String,
    pub bytes: Vec<u8>,
    pub origin: ArtifactOrigin,
}

/// Fetch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} returned an empty body")]
    EmptyBody { url: String },

    #[error("GET {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Archive cache error: {0}")]
    Cache(String),
}

/// Artifact Fetcher trait
///
/// Success means HTTP 200 with a non-empty body.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch the archive at `url`
    ///
    /// # Errors
    /// - FetchError::Status for any non-200 response
    /// - FetchError::EmptyBody for a 200 response without content
    /// - FetchError::Transport for connection failures
    async fn fetch(&self, url: &str) -> Result<FetchedArtifact, FetchError>;

    /// Forget any stored copy of `url` so the next fetch goes to the source
    async fn invalidate(&self, _url: &str) {}
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Mock fetcher serving canned bodies per URL; unknown URLs answer 404
    ///
    /// Bodies registered with `serve_cached` are answered from a pretend cache
    /// until invalidated.
    #[derive(Default)]
    pub struct MockArtifactFetcher {
        bodies: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        cached: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        invalidated: Arc<Mutex<Vec<String>>>,
        call_count: Arc<Mutex<usize>>,
        delay: Arc<Mutex<Option<std::time::Duration>>>,
    }

    impl MockArtifactFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
            self.bodies.lock().unwrap().insert(url.into(), body.into());
        }

        pub fn serve_cached(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
            self.cached.lock().unwrap().insert(url.into(), body.into());
        }

        /// Make every fetch take `delay`
        pub fn slow_down(&self, delay: std::time::Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }

        pub fn invalidated(&self) -> Vec<String> {
            self.invalidated.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArtifactFetcher for MockArtifactFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedArtifact, FetchError> {
            *self.call_count.lock().unwrap() += 1;

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(body) = self.cached.lock().unwrap().get(url) {
                return Ok(FetchedArtifact {
                    url: url.to_string(),
                    bytes: body.clone(),
                    origin: ArtifactOrigin::Cache,
                });
            }

            match self.bodies.lock().unwrap().get(url) {
                Some(body) if body.is_empty() => Err(FetchError::EmptyBody {
                    url: url.to_string(),
                }),
                Some(body) => Ok(FetchedArtifact {
                    url: url.to_string(),
                    bytes: body.clone(),
                    origin: ArtifactOrigin::Network,
                }),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }

        async fn invalidate(&self, url: &str) {
            self.cached.lock().unwrap().remove(url);
            self.invalidated.lock().unwrap().push(url.to_string());
        }
    }
}
