//! warpgrid-cloud: elastic VM lifecycle on top of a [`CloudProvider`].
//!
//! # Architecture
//!
//! ```text
//! Connector
//!   ├── WorkerPool (bounded create/destroy jobs)
//!   ├── live / reusable / pending VMs
//!   ├── BillingWindow (slot, safety margin, poll bounds)
//!   └── deadline watcher (destroys reusable VMs before the next slot)
//! CloudProvider (trait)
//!   └── SimulatedProvider
//! ```

pub mod connector;
pub mod deadline;
pub mod error;
pub mod pool;
pub mod provider;
pub mod simulated;
pub mod vm;

pub use connector::{
    Connector, ConnectorCounts, ConnectorSettings, CreatedVm, CreationTicket, PauseOutcome, TerminationReport,
};
pub use deadline::{BillingWindow, ONE_HOUR_MS};
pub use error::{CloudError, CloudResult};
pub use provider::{BoxFuture, CloudProvider, InstanceType};
pub use simulated::SimulatedProvider;
pub use vm::{Vm, VmDescription, VmRequest};
