//! Error types for the shared smartbatch types

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Error raised while interpreting shared values
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid run status: {0}")]
    InvalidStatus(String),

    #[error("Invalid log {option}: {value}")]
    InvalidLogOption { option: &'static str, value: String },
}

impl CommonError {
    pub(crate) fn log_option(option: &'static str, value: &str) -> Self {
        Self::InvalidLogOption {
            option,
            value: value.to_string(),
        }
    }
}
