// Port Layer - Interfaces for external dependencies

pub mod artifact_fetcher;
pub mod process_runner;
pub mod time_provider; // For deterministic testing
pub mod tool_installer;
pub mod tool_locator;

// Re-exports
pub use artifact_fetcher::{ArtifactFetcher, ArtifactOrigin, FetchError, FetchedArtifact};
pub use process_runner::ProcessRunner;
pub use time_provider::TimeProvider;
pub use tool_installer::{InstallError, ToolInstaller};
pub use tool_locator::ToolLocator;
