//! Action records held by the runtime state.
//!
//! An action moves through
//! `Unscheduled → Scheduled → Running → {Completed | Failed}`; a scheduled
//! action may go back to `Unscheduled` when its reservation is withdrawn.

use serde::{Deserialize, Serialize};
use std::fmt;
use warp_core::{ActionId, CoreId, ImplementationId};

/// Group priority of an action that does not belong to a group.
pub const NO_GROUP: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Unscheduled,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Completed | ActionState::Failed)
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_become(self, to: ActionState) -> bool {
        use ActionState::*;
        matches!(
            (self, to),
            (Unscheduled, Scheduled)
                | (Unscheduled, Failed)
                | (Scheduled, Running)
                | (Scheduled, Unscheduled)
                | (Scheduled, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionState::Unscheduled => "unscheduled",
            ActionState::Scheduled => "scheduled",
            ActionState::Running => "running",
            ActionState::Completed => "completed",
            ActionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What the submission layer provides for a new action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub core: CoreId,
    pub priority: i32,
    /// Lower runs first among equal priorities; [`NO_GROUP`] for single actions.
    pub group_priority: i64,
    pub data_predecessors: Vec<ActionId>,
}

impl ActionSpec {
    pub fn new(core: u32) -> Self {
        Self {
            core: CoreId(core),
            priority: 0,
            group_priority: NO_GROUP,
            data_predecessors: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_group(mut self, group_priority: i64) -> Self {
        self.group_priority = group_priority;
        self
    }

    pub fn after(mut self, predecessors: &[ActionId]) -> Self {
        self.data_predecessors.extend_from_slice(predecessors);
        self
    }
}

/// Where and when an action is expected to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker: String,
    pub implementation: ImplementationId,
    pub expected_start: i64,
    pub expected_end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub core: CoreId,
    pub priority: i32,
    pub group_priority: i64,
    pub state: ActionState,
    pub data_predecessors: Vec<ActionId>,
    pub data_successors: Vec<ActionId>,
    /// Actions whose placement must be known before this one is offered.
    pub scheduling_predecessors: Vec<ActionId>,
    pub scheduling_successors: Vec<ActionId>,
    pub assignment: Option<Assignment>,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Action {
    pub fn worker(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.worker.as_str())
    }

    pub fn expected_end(&self) -> Option<i64> {
        self.assignment.as_ref().map(|a| a.expected_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        use ActionState::*;
        assert!(Unscheduled.can_become(Scheduled));
        assert!(Scheduled.can_become(Unscheduled));
        assert!(Running.can_become(Failed));
        assert!(!Running.can_become(Unscheduled));
        assert!(!Completed.can_become(Running));
        assert!(!Unscheduled.can_become(Running));
        assert!(Failed.is_terminal());
    }

    #[test]
    fn spec_builder() {
        let spec = ActionSpec::new(2)
            .with_priority(3)
            .after(&[ActionId(1)]);
        assert_eq!(spec.core, CoreId(2));
        assert_eq!(spec.priority, 3);
        assert_eq!(spec.group_priority, NO_GROUP);
        assert_eq!(spec.data_predecessors, vec![ActionId(1)]);
    }
}
