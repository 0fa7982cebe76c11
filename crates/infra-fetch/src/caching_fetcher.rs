// On-disk archive cache
// Entries are keyed by the hex SHA-256 of the URL; writes go through a temp file + rename
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rigger_core::port::{ArtifactFetcher, ArtifactOrigin, FetchError, FetchedArtifact};

/// Wraps a fetcher with a URL-keyed file cache
///
/// A cache hit never touches the network. Failing to write an entry is
/// logged and does not fail the fetch.
pub struct CachingArtifactFetcher<F> {
    inner: F,
    cache_dir: PathBuf,
}

impl<F: ArtifactFetcher> CachingArtifactFetcher<F> {
    /// Create the cache, creating `cache_dir` if needed
    ///
    /// # Errors
    /// Returns FetchError::Cache if the directory cannot be created.
    pub fn new(inner: F, cache_dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            FetchError::Cache(format!("cannot create {}: {}", cache_dir.display(), e))
        })?;
        Ok(Self { inner, cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// File holding the cached body of `url`
    pub fn entry_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(cache_key(url))
    }

    async fn lookup(&self, url: &str, entry: &Path) -> Option<Vec<u8>> {
        match tokio::fs::read(entry).await {
            Ok(bytes) if bytes.is_empty() => {
                warn!(url = %url, entry = %entry.display(), "Ignoring empty cache entry");
                None
            }
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read cache entry");
                None
            }
        }
    }

    async fn store(&self, entry: &Path, bytes: &[u8]) -> io::Result<()> {
        let partial = self
            .cache_dir
            .join(format!(".{}.part", Uuid::new_v4()));
        tokio::fs::write(&partial, bytes).await?;
        if let Err(e) = tokio::fs::rename(&partial, entry).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl<F: ArtifactFetcher> ArtifactFetcher for CachingArtifactFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchedArtifact, FetchError> {
        let entry = self.entry_path(url);

        if let Some(bytes) = self.lookup(url, &entry).await {
            debug!(url = %url, entry = %entry.display(), "Archive cache hit");
            return Ok(FetchedArtifact {
                url: url.to_string(),
                bytes,
                origin: ArtifactOrigin::Cache,
            });
        }

        let artifact = self.inner.fetch(url).await?;

        match self.store(&entry, &artifact.bytes).await {
            Ok(()) => info!(url = %url, entry = %entry.display(), "Archive cached"),
            Err(e) => warn!(url = %url, error = %e, "Failed to cache archive"),
        }

        Ok(artifact)
    }

    async fn invalidate(&self, url: &str) {
        let entry = self.entry_path(url);
        match tokio::fs::remove_file(&entry).await {
            Ok(()) => info!(url = %url, entry = %entry.display(), "Cached archive discarded"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(url = %url, error = %e, "Failed to discard cached archive"),
        }
        self.inner.invalidate(url).await;
    }
}

fn cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}
