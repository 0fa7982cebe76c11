// Tool Locator Port
// Resolves an executable name against the search path

use std::path::PathBuf;

/// Search-path lookup for executables
pub trait ToolLocator: Send + Sync {
    /// Absolute path of `executable` if it is found on the search path
    fn find_on_path(&self, executable: &str) -> Option<PathBuf>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock locator backed by a fixed name -> path table
    #[derive(Default)]
    pub struct MockToolLocator {
        entries: Mutex<HashMap<String, PathBuf>>,
    }

    impl MockToolLocator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tool(self, executable: impl Into<String>, path: impl Into<PathBuf>) -> Self {
            self.entries
                .lock()
                .unwrap()
                .insert(executable.into(), path.into());
            self
        }
    }

    impl ToolLocator for MockToolLocator {
        fn find_on_path(&self, executable: &str) -> Option<PathBuf> {
            self.entries.lock().unwrap().get(executable).cloned()
        }
    }
}
