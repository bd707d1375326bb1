//! Cloud connector error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CloudError {
    #[error("creation of {name} failed: {reason}")]
    CreationFailed { name: String, reason: String },

    #[error("destruction of {vm} failed: {reason}")]
    DestroyFailed { vm: String, reason: String },

    #[error("VM limit reached ({limit})")]
    LimitReached { limit: u32 },

    /// The connector is shutting down.
    #[error("connector terminated")]
    Terminated,

    #[error("unknown VM: {0}")]
    UnknownVm(String),

    #[error("no instance type can host {0}")]
    NoInstanceType(String),

    #[error("image not available: {0}")]
    NoImage(String),
}

pub type CloudResult<T> = Result<T, CloudError>;
