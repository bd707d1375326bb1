//! Scheduler error types.

use thiserror::Error;
use warp_core::ActionId;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No registered worker can ever host any implementation of the action.
    #[error("action {action} is blocked: {reason}")]
    Blocked { action: ActionId, reason: String },

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker already registered: {0}")]
    DuplicateWorker(String),

    #[error("worker {worker} still runs {running} action(s)")]
    WorkerBusy { worker: String, running: usize },

    /// The action holds no reservation on the worker it was looked up on.
    #[error("action {action} not found on worker {worker}")]
    ActionNotFound { action: ActionId, worker: String },

    #[error("action {action} cannot {operation} while {state}")]
    InvalidTransition {
        action: ActionId,
        operation: &'static str,
        state: String,
    },

    #[error("action {action} depends on failed action {predecessor}")]
    PredecessorFailed {
        action: ActionId,
        predecessor: ActionId,
    },

    #[error("state error: {0}")]
    State(#[from] warpgrid_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
