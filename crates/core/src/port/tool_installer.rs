// Tool Installer Port
// Unpacks bootstrap archives into isolated per-version directories

use crate::domain::{Platform, ToolSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Install errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("No bootstrap target for {0}")]
    NoTarget(Platform),

    #[error("Archive extraction failed: {0}")]
    Extract(String),

    #[error("Binary not found in archive: {0}")]
    MissingBinary(PathBuf),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for InstallError {
    fn from(err: std::io::Error) -> Self {
        InstallError::Io(err.to_string())
    }
}

/// Tool Installer trait
#[async_trait]
pub trait ToolInstaller: Send + Sync {
    /// Binary of a previous install of `spec` for `platform`, if one exists on disk
    fn find_installed(&self, spec: &ToolSpec, platform: Platform) -> Option<PathBuf>;

    /// Extract `archive` into a fresh directory dedicated to `spec`'s version
    /// and return the executable path
    ///
    /// # Errors
    /// - InstallError::Extract if the archive cannot be unpacked
    /// - InstallError::MissingBinary if the expected binary is absent after extraction
    async fn install(
        &self,
        spec: &ToolSpec,
        platform: Platform,
        archive: Vec<u8>,
    ) -> Result<PathBuf, InstallError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Mock installer that "installs" to a fixed path per tool name
    #[derive(Default)]
    pub struct MockToolInstaller {
        targets: Arc<Mutex<HashMap<String, PathBuf>>>,
        installed: Arc<Mutex<HashMap<String, PathBuf>>>,
        install_count: Arc<Mutex<usize>>,
        fail_with: Arc<Mutex<Option<InstallError>>>,
        rejected: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MockToolInstaller {
        pub fn new() -> Self {
            Self::default()
        }

        /// Path a bootstrap of `tool` will produce
        pub fn install_to(&self, tool: impl Into<String>, path: impl Into<PathBuf>) {
            self.targets.lock().unwrap().insert(tool.into(), path.into());
        }

        /// Pretend `tool` is already installed at `path`
        pub fn preinstalled(&self, tool: impl Into<String>, path: impl Into<PathBuf>) {
            self.installed
                .lock()
                .unwrap()
                .insert(tool.into(), path.into());
        }

        pub fn fail_with(&self, error: InstallError) {
            *self.fail_with.lock().unwrap() = Some(error);
        }

        /// Fail extraction of exactly this archive
        pub fn reject_archive(&self, archive: impl Into<Vec<u8>>) {
            self.rejected.lock().unwrap().push(archive.into());
        }

        pub fn install_count(&self) -> usize {
            *self.install_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl ToolInstaller for MockToolInstaller {
        fn find_installed(&self, spec: &ToolSpec, _platform: Platform) -> Option<PathBuf> {
            self.installed.lock().unwrap().get(spec.name()).cloned()
        }

        async fn install(
            &self,
            spec: &ToolSpec,
            platform: Platform,
            archive: Vec<u8>,
        ) -> Result<PathBuf, InstallError> {
            *self.install_count.lock().unwrap() += 1;

            if self.rejected.lock().unwrap().contains(&archive) {
                return Err(InstallError::Extract("corrupt archive".to_string()));
            }

            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }

            let path = self
                .targets
                .lock()
                .unwrap()
                .get(spec.name())
                .cloned()
                .ok_or(InstallError::NoTarget(platform))?;
            self.installed
                .lock()
                .unwrap()
                .insert(spec.name().to_string(), path.clone());
            Ok(path)
        }
    }
}
