//! warpgrid-scheduler: decides where and when every action runs.
//!
//! Each worker has a [`ResourceScheduler`] holding a gap [`Timeline`]
//! and the worker's execution profiles. The [`Scheduler`] scores every
//! (worker, implementation) pair for a new action and reserves a window on
//! the best one. The [`ScheduleOptimizer`] periodically rebuilds the
//! timelines and moves pending work between workers.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── RuntimeState (shared, behind a RwLock)
//!   ├── Score / Objective (total order over candidate placements)
//!   └── ResourceScheduler (one per worker)
//!       ├── Timeline (gaps, slots, parked actions, accounting)
//!       └── Profiles (per implementation)
//! ScheduleOptimizer
//!   ├── local pass: LocalOptimizationState (ready queue, holes)
//!   └── global pass: donors → receivers
//! ```

pub mod error;
pub mod local_state;
pub mod optimizer;
pub mod resource_scheduler;
pub mod scheduler;
pub mod score;
pub mod timeline;

pub use error::{SchedulerError, SchedulerResult};
pub use local_state::{Candidate, Hole, LocalOptimizationState};
pub use optimizer::{Migration, OptimizationReport, PassReport, ScheduleOptimizer, determine_donors_and_receivers};
pub use resource_scheduler::{ResourceScheduler, SlotView};
pub use scheduler::{CompletionReport, ScheduleOutcome, Scheduler, data_ready_on};
pub use score::{IdleRates, Score};
pub use timeline::{Accounting, Placement, Reservation, Slot, SlotStatus, Timeline};
