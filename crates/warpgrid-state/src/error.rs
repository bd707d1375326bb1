//! Error types for the WarpGrid runtime state and profile store.

use thiserror::Error;
use warp_core::{ActionId, CoreId, ImplementationId};

use crate::types::ActionState;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur in the runtime state or the profile store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("unknown action: {0}")]
    UnknownAction(ActionId),

    #[error("unknown core element: {0}")]
    UnknownCore(CoreId),

    #[error("unknown implementation: {0}")]
    UnknownImplementation(ImplementationId),

    #[error("action {action} cannot go from {from} to {to}")]
    InvalidTransition {
        action: ActionId,
        from: ActionState,
        to: ActionState,
    },

    #[error("scheduling dependency would form a cycle: {producer} -> {consumer}")]
    DependencyCycle {
        producer: ActionId,
        consumer: ActionId,
    },
}
