//! Orchestrator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] warpgrid_scheduler::SchedulerError),

    #[error("cloud error: {0}")]
    Cloud(#[from] warpgrid_cloud::CloudError),

    #[error("state error: {0}")]
    State(#[from] warpgrid_state::StateError),

    /// Capacity changes need a configured cloud connector.
    #[error("no cloud connector configured")]
    NoCloud,

    #[error("execution layer knows no worker named {0}")]
    UnknownWorker(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
