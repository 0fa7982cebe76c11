// Rigger Infrastructure - Bootstrap Adapters
// Implements: ArtifactFetcher, ToolInstaller (ADR-001)

mod archive_installer;
mod caching_fetcher;
mod http_fetcher;

pub use archive_installer::ArchiveToolInstaller;
pub use caching_fetcher::CachingArtifactFetcher;
pub use http_fetcher::HttpArtifactFetcher;
