// Rigger Infrastructure - System Adapters
// Implements: ProcessRunner, ToolLocator (ADR-001), in-process output capture

#[cfg(unix)]
pub mod capture;
pub mod path_locator;
pub mod subprocess_runner;

pub use path_locator::PathToolLocator;
pub use subprocess_runner::{normalize_exit, SubprocessRunner};
