// Domain Layer - Tool identity and execution outcomes

pub mod error;
pub mod execution;
pub mod platform;
pub mod tool_spec;

// Re-exports
pub use error::DomainError;
pub use execution::{ExecutionResult, ProcessRequest};
pub use platform::Platform;
pub use tool_spec::{
    BootstrapTarget, ToolDefinition, ToolSpec, ToolSpecBuilder, VersionExtractor,
    DEFAULT_VERSION_ARGS,
};
