//! warpgrid-state: runtime state and profile persistence for WarpGrid.
//!
//! # Architecture
//!
//! ```text
//! RuntimeState (in memory, one per orchestrator)
//! ├── cores     Vec<CoreElement>         indexed by CoreId
//! └── actions   BTreeMap<ActionId, Action>
//!
//! ProfileStore (redb)
//! └── profiles  "{worker}/{core}:{impl}" -> Profile (JSON)
//! ```
//!
//! The `ProfileStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. `RuntimeState` is plain data; the
//! scheduler wraps it in a lock.

pub mod error;
pub mod runtime;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use runtime::{RuntimeState, StateCounts};
pub use store::ProfileStore;
pub use types::*;
