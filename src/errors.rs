use crate::table::TableError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that abort setup. Per-request failures are never reported through
/// this type; they come back as [`crate::ExecutionOutcome`] values.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Capability policy misconfigured: {0}")]
    PolicyMisconfigured(String),

    #[error("Unknown policy template: {0}")]
    UnknownPolicy(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(#[from] TableError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
