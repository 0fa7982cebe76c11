// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid tool spec '{tool}': {reason}")]
    InvalidToolSpec { tool: String, reason: String },

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
