//! warpgrid-orchestrator: the entry point the submission layer talks to.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── Scheduler + ScheduleOptimizer (warpgrid-scheduler)
//!   ├── Connector (warpgrid-cloud, optional)
//!   ├── ProfileStore (warpgrid-state)
//!   └── ExecutionLayer (worker capacity snapshots)
//! ```

pub mod error;
pub mod execution;
pub mod orchestrator;

pub use error::{OrchestratorError, OrchestratorResult};
pub use execution::{ExecutionLayer, StaticWorkers, WorkerCapacity};
pub use orchestrator::{CapacityChange, Orchestrator, SubmitOutcome};
