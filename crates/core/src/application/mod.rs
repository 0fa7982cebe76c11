// Application Layer - Use Cases

pub mod constants;
pub mod invoker;

// Re-exports
pub use invoker::{InvokerConfig, ToolInvoker};
