//! Core types shared by the WarpGrid orchestration crates.
//!
//! ```text
//! warp-core
//! ├── types       ActionId, CoreElement, Implementation, Objective
//! ├── resources   ResourceDescription (reduce / can_host / is_useless)
//! ├── profile     Profile (running execution statistics)
//! ├── gap         Gap (idle window on a worker timeline)
//! ├── clock       Clock, SystemClock, ManualClock
//! ├── completion  Completion (resolve-once result slot)
//! └── config      OrchestratorConfig (TOML)
//! ```

pub mod clock;
pub mod completion;
pub mod config;
pub mod gap;
pub mod profile;
pub mod resources;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::{Completion, CompletionHandle};
pub use config::{OrchestratorConfig, parse_duration};
pub use gap::{END_OF_TIME, Gap, START_OF_TIME};
pub use profile::{DEFAULT_EXECUTION_TIME, Profile};
pub use resources::{MethodResources, ResourceDescription, ServiceResources};
pub use types::*;
