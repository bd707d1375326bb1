//! RuntimeState: the arenas of core elements and actions owned by one
//! orchestrator instance.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use warp_core::{ActionId, CoreElement, CoreId, Implementation, ImplementationId, ResourceDescription};

use crate::error::{StateError, StateResult};
use crate::types::{Action, ActionSpec, ActionState, Assignment};

/// Number of actions per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub unscheduled: usize,
    pub scheduled: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct RuntimeState {
    cores: Vec<CoreElement>,
    actions: BTreeMap<ActionId, Action>,
    /// Failed actions already collected; later consumers still fail on them.
    failed_collected: BTreeSet<ActionId>,
    next_action: u64,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Core elements ──────────────────────────────────────────────

    /// Register a core element with one implementation per requirement.
    pub fn register_core(&mut self, signature: &str, requirements: Vec<ResourceDescription>) -> CoreId {
        let id = self.cores.len() as u32;
        self.cores.push(CoreElement::new(id, signature, requirements));
        CoreId(id)
    }

    /// Register a prebuilt core element; its id must be the next free one.
    pub fn register_core_element(&mut self, core: CoreElement) -> CoreId {
        let id = CoreId(self.cores.len() as u32);
        debug_assert_eq!(core.id, id);
        self.cores.push(core);
        id
    }

    pub fn cores(&self) -> &[CoreElement] {
        &self.cores
    }

    pub fn core(&self, id: CoreId) -> StateResult<&CoreElement> {
        self.cores
            .get(id.0 as usize)
            .ok_or(StateError::UnknownCore(id))
    }

    pub fn implementation(&self, id: ImplementationId) -> StateResult<&Implementation> {
        self.core(id.core)?
            .implementations
            .get(id.index as usize)
            .ok_or(StateError::UnknownImplementation(id))
    }

    // ── Actions ────────────────────────────────────────────────────

    /// Create an unscheduled action and link it to its data predecessors.
    ///
    /// Predecessors that completed and were collected are dropped from the
    /// new action's list. Collected failed predecessors are kept so the
    /// action fails when offered.
    pub fn create_action(&mut self, spec: ActionSpec, now: i64) -> StateResult<ActionId> {
        self.core(spec.core)?;
        let id = ActionId(self.next_action);
        self.next_action += 1;

        let mut predecessors = Vec::with_capacity(spec.data_predecessors.len());
        for pred in spec.data_predecessors {
            if predecessors.contains(&pred) {
                continue;
            }
            if let Some(p) = self.actions.get_mut(&pred) {
                p.data_successors.push(id);
                predecessors.push(pred);
            } else if self.failed_collected.contains(&pred) {
                predecessors.push(pred);
            }
        }

        self.actions.insert(
            id,
            Action {
                id,
                core: spec.core,
                priority: spec.priority,
                group_priority: spec.group_priority,
                state: ActionState::Unscheduled,
                data_predecessors: predecessors,
                data_successors: Vec::new(),
                scheduling_predecessors: Vec::new(),
                scheduling_successors: Vec::new(),
                assignment: None,
                submitted_at: now,
                started_at: None,
                finished_at: None,
            },
        );
        debug!(action = %id, core = %spec.core, "action created");
        Ok(id)
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.actions.contains_key(&id)
    }

    pub fn action(&self, id: ActionId) -> StateResult<&Action> {
        self.actions.get(&id).ok_or(StateError::UnknownAction(id))
    }

    pub fn action_mut(&mut self, id: ActionId) -> StateResult<&mut Action> {
        self.actions.get_mut(&id).ok_or(StateError::UnknownAction(id))
    }

    /// Actions in id order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    /// Whether `id` failed, including failed actions already collected.
    pub fn has_failed(&self, id: ActionId) -> bool {
        match self.actions.get(&id) {
            Some(a) => a.state == ActionState::Failed,
            None => self.failed_collected.contains(&id),
        }
    }

    pub fn implementations_of(&self, id: ActionId) -> StateResult<&[Implementation]> {
        let core = self.action(id)?.core;
        Ok(&self.core(core)?.implementations)
    }

    /// Move an action to `to`, returning the previous state.
    pub fn transition(&mut self, id: ActionId, to: ActionState, now: i64) -> StateResult<ActionState> {
        let action = self.action_mut(id)?;
        let from = action.state;
        if !from.can_become(to) {
            return Err(StateError::InvalidTransition { action: id, from, to });
        }
        action.state = to;
        match to {
            ActionState::Running => action.started_at = Some(now),
            ActionState::Completed | ActionState::Failed => action.finished_at = Some(now),
            ActionState::Unscheduled => action.assignment = None,
            ActionState::Scheduled => {}
        }
        debug!(action = %id, %from, %to, "action state changed");
        Ok(from)
    }

    pub fn set_assignment(&mut self, id: ActionId, assignment: Option<Assignment>) -> StateResult<()> {
        self.action_mut(id)?.assignment = assignment;
        Ok(())
    }

    /// The first data predecessor that failed, if any.
    pub fn failed_predecessor(&self, id: ActionId) -> StateResult<Option<ActionId>> {
        Ok(self
            .action(id)?
            .data_predecessors
            .iter()
            .copied()
            .find(|p| self.has_failed(*p)))
    }

    // ── Scheduling dependencies ────────────────────────────────────

    /// Record that `consumer` is not offered for scheduling until `producer`
    /// has been placed.
    pub fn add_scheduling_dependency(&mut self, producer: ActionId, consumer: ActionId) -> StateResult<()> {
        self.action(producer)?;
        self.action(consumer)?;
        if producer == consumer || self.reaches(consumer, producer) {
            return Err(StateError::DependencyCycle { producer, consumer });
        }
        let p = self.action_mut(producer)?;
        if !p.scheduling_successors.contains(&consumer) {
            p.scheduling_successors.push(consumer);
        }
        let c = self.action_mut(consumer)?;
        if !c.scheduling_predecessors.contains(&producer) {
            c.scheduling_predecessors.push(producer);
        }
        Ok(())
    }

    fn reaches(&self, from: ActionId, to: ActionId) -> bool {
        let mut stack = vec![from];
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(a) = self.actions.get(&id) {
                stack.extend(a.scheduling_successors.iter().copied());
            }
        }
        false
    }

    /// Whether every scheduling predecessor has been placed or has finished.
    pub fn is_offerable(&self, id: ActionId) -> StateResult<bool> {
        Ok(self.action(id)?.scheduling_predecessors.iter().all(|p| {
            self.actions
                .get(p)
                .is_none_or(|a| a.assignment.is_some() || a.state.is_terminal())
        }))
    }

    // ── Garbage collection ─────────────────────────────────────────

    /// Remove finished actions that no live action depends on.
    pub fn collect_garbage(&mut self) -> Vec<ActionId> {
        let removable: Vec<ActionId> = self
            .actions
            .values()
            .filter(|a| a.state.is_terminal())
            .filter(|a| {
                a.data_successors
                    .iter()
                    .chain(a.scheduling_successors.iter())
                    .all(|s| self.actions.get(s).is_none_or(|s| s.state.is_terminal()))
            })
            .map(|a| a.id)
            .collect();

        for id in &removable {
            if let Some(action) = self.actions.remove(id) {
                if action.state == ActionState::Failed {
                    self.failed_collected.insert(*id);
                }
                for s in action.data_successors {
                    if let Some(succ) = self.actions.get_mut(&s) {
                        succ.data_predecessors.retain(|p| p != id);
                    }
                }
                for s in action.scheduling_successors {
                    if let Some(succ) = self.actions.get_mut(&s) {
                        succ.scheduling_predecessors.retain(|p| p != id);
                    }
                }
                for p in action.data_predecessors {
                    if let Some(pred) = self.actions.get_mut(&p) {
                        pred.data_successors.retain(|s| s != id);
                    }
                }
            }
        }
        if !removable.is_empty() {
            debug!(count = removable.len(), "finished actions collected");
        }
        removable
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for a in self.actions.values() {
            match a.state {
                ActionState::Unscheduled => counts.unscheduled += 1,
                ActionState::Scheduled => counts.scheduled += 1,
                ActionState::Running => counts.running += 1,
                ActionState::Completed => counts.completed += 1,
                ActionState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_core() -> RuntimeState {
        let mut state = RuntimeState::new();
        state.register_core("inc", vec![ResourceDescription::cpus(1), ResourceDescription::cpus(2)]);
        state
    }

    #[test]
    fn create_links_predecessors() {
        let mut state = state_with_core();
        let a = state.create_action(ActionSpec::new(0), 0).unwrap();
        let b = state
            .create_action(ActionSpec::new(0).after(&[a, a, ActionId(99)]), 0)
            .unwrap();
        assert_eq!(state.action(b).unwrap().data_predecessors, vec![a]);
        assert_eq!(state.action(a).unwrap().data_successors, vec![b]);
        assert_eq!(state.implementations_of(b).unwrap().len(), 2);
    }

    #[test]
    fn unknown_core_rejected() {
        let mut state = state_with_core();
        let err = state.create_action(ActionSpec::new(7), 0).unwrap_err();
        assert!(matches!(err, StateError::UnknownCore(CoreId(7))));
    }

    #[test]
    fn transition_rules() {
        let mut state = state_with_core();
        let a = state.create_action(ActionSpec::new(0), 0).unwrap();
        assert!(matches!(
            state.transition(a, ActionState::Running, 5),
            Err(StateError::InvalidTransition { .. })
        ));
        state.transition(a, ActionState::Scheduled, 5).unwrap();
        state.transition(a, ActionState::Running, 6).unwrap();
        assert_eq!(state.action(a).unwrap().started_at, Some(6));
        state.transition(a, ActionState::Completed, 9).unwrap();
        assert_eq!(state.action(a).unwrap().finished_at, Some(9));
    }

    #[test]
    fn scheduling_dependencies_gate_offering() {
        let mut state = state_with_core();
        let a = state.create_action(ActionSpec::new(0), 0).unwrap();
        let b = state.create_action(ActionSpec::new(0), 0).unwrap();
        state.add_scheduling_dependency(a, b).unwrap();
        assert!(!state.is_offerable(b).unwrap());
        assert!(matches!(
            state.add_scheduling_dependency(b, a),
            Err(StateError::DependencyCycle { .. })
        ));

        state
            .set_assignment(
                a,
                Some(Assignment {
                    worker: "w".into(),
                    implementation: ImplementationId::new(0, 0),
                    expected_start: 0,
                    expected_end: 10,
                }),
            )
            .unwrap();
        assert!(state.is_offerable(b).unwrap());
    }

    #[test]
    fn garbage_collection_waits_for_successors() {
        let mut state = state_with_core();
        let a = state.create_action(ActionSpec::new(0), 0).unwrap();
        let b = state.create_action(ActionSpec::new(0).after(&[a]), 0).unwrap();
        for id in [a] {
            state.transition(id, ActionState::Scheduled, 0).unwrap();
            state.transition(id, ActionState::Running, 0).unwrap();
            state.transition(id, ActionState::Completed, 1).unwrap();
        }
        assert!(state.collect_garbage().is_empty());

        state.transition(b, ActionState::Failed, 2).unwrap();
        let removed = state.collect_garbage();
        assert_eq!(removed, vec![a, b]);
        assert!(!state.contains(a));
        assert_eq!(state.counts(), StateCounts::default());
    }

    #[test]
    fn failed_predecessor_is_reported() {
        let mut state = state_with_core();
        let a = state.create_action(ActionSpec::new(0), 0).unwrap();
        let b = state.create_action(ActionSpec::new(0).after(&[a]), 0).unwrap();
        assert_eq!(state.failed_predecessor(b).unwrap(), None);
        state.transition(a, ActionState::Failed, 1).unwrap();
        assert_eq!(state.failed_predecessor(b).unwrap(), Some(a));
    }

    #[test]
    fn collected_failure_still_fails_late_consumers() {
        let mut state = state_with_core();
        let a = state.create_action(ActionSpec::new(0), 0).unwrap();
        let done = state.create_action(ActionSpec::new(0), 0).unwrap();
        for (id, end) in [(a, ActionState::Failed), (done, ActionState::Completed)] {
            state.transition(id, ActionState::Scheduled, 0).unwrap();
            state.transition(id, ActionState::Running, 0).unwrap();
            state.transition(id, end, 1).unwrap();
        }
        assert_eq!(state.collect_garbage(), vec![a, done]);
        assert!(state.has_failed(a));
        assert!(!state.has_failed(done));

        let late = state
            .create_action(ActionSpec::new(0).after(&[a, done]), 2)
            .unwrap();
        assert_eq!(state.action(late).unwrap().data_predecessors, vec![a]);
        assert_eq!(state.failed_predecessor(late).unwrap(), Some(a));
    }
}
