// Search-path tool locator
// reason: `which` mirrors shell lookup rules (PATHEXT on Windows, executable bit on Unix)
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

use rigger_core::port::ToolLocator;

/// Locates executables on `PATH` or on an explicit search path
#[derive(Debug, Default, Clone)]
pub struct PathToolLocator {
    search_path: Option<OsString>,
}

impl PathToolLocator {
    /// Locator using the process `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator restricted to `search_path` (same syntax as `PATH`)
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }
}

impl ToolLocator for PathToolLocator {
    fn find_on_path(&self, executable: &str) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(executable, Some(paths), cwd)
            }
            None => which::which(executable),
        };

        match found {
            Ok(path) => {
                debug!(executable = %executable, path = %path.display(), "Found executable on search path");
                Some(path)
            }
            Err(e) => {
                debug!(executable = %executable, error = %e, "Executable not on search path");
                None
            }
        }
    }
}
