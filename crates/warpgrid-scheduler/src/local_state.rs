//! Working state of one local optimization pass over a worker.
//!
//! Pending actions move through three queues while the pass rebuilds the
//! worker's timeline:
//!
//! ```text
//!   waiting ──(same-worker inputs planned)──▶ ready ──(cursor ≥ ready)──▶ selectable
//!   blocked (input with unknown end): parked at the end of the pass
//! ```
//!
//! Holes are windows where resources sit idle before the action that took
//! them can start. Short actions can be slotted into them without delaying
//! that action.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use warp_core::{ActionId, ImplementationId, Profile, ResourceDescription};

use crate::score::selection_order;

/// Idle resources in `[start, end)` that `consumer` takes at `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hole {
    pub start: i64,
    pub end: i64,
    pub resources: ResourceDescription,
    /// Action whose end frees the resources; `None` if always free.
    pub origin: Option<ActionId>,
    pub consumer: ActionId,
}

/// A pending action as the pass sees it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub action: ActionId,
    pub priority: i32,
    pub group_priority: i64,
    pub implementation: ImplementationId,
    pub requirements: ResourceDescription,
    pub profile: Profile,
    pub data_ready: i64,
}

#[derive(Debug)]
struct Waiting {
    candidate: Candidate,
    pending: Vec<ActionId>,
}

#[derive(Debug, Default)]
pub struct LocalOptimizationState {
    holes: Vec<Hole>,
    ready: BinaryHeap<Reverse<(i64, ActionId)>>,
    candidates: HashMap<ActionId, Candidate>,
    selectable: Vec<ActionId>,
    waiting: BTreeMap<ActionId, Waiting>,
    blocked: Vec<Candidate>,
}

impl LocalOptimizationState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Classification ─────────────────────────────────────────────

    /// Queue an action whose inputs are all available at `data_ready`.
    pub fn defer(&mut self, candidate: Candidate) {
        self.ready.push(Reverse((candidate.data_ready, candidate.action)));
        self.candidates.insert(candidate.action, candidate);
    }

    /// Hold an action until every action in `pending` has been planned.
    pub fn wait_on(&mut self, candidate: Candidate, pending: Vec<ActionId>) {
        if pending.is_empty() {
            self.defer(candidate);
            return;
        }
        self.waiting.insert(candidate.action, Waiting { candidate, pending });
    }

    /// An action with an input whose end is unknown.
    pub fn block(&mut self, candidate: Candidate) {
        self.blocked.push(candidate);
    }

    /// An action was given a window ending at `end`: actions waiting on it
    /// become ready no earlier than that.
    pub fn planned(&mut self, action: ActionId, end: i64) {
        let mut released = Vec::new();
        for (id, w) in self.waiting.iter_mut() {
            if let Some(pos) = w.pending.iter().position(|p| *p == action) {
                w.pending.remove(pos);
                w.candidate.data_ready = w.candidate.data_ready.max(end);
                if w.pending.is_empty() {
                    released.push(*id);
                }
            }
        }
        for id in released {
            if let Some(w) = self.waiting.remove(&id) {
                self.defer(w.candidate);
            }
        }
    }

    // ── Selection ──────────────────────────────────────────────────

    /// Move every queued action ready by `cursor` to the selectable set.
    pub fn release_ready(&mut self, cursor: i64) {
        while let Some(Reverse((ready, action))) = self.ready.peek().copied() {
            if ready > cursor {
                break;
            }
            self.ready.pop();
            self.selectable.push(action);
        }
    }

    pub fn next_ready_time(&self) -> Option<i64> {
        self.ready.peek().map(|Reverse((t, _))| *t)
    }

    pub fn has_selectable(&self) -> bool {
        !self.selectable.is_empty()
    }

    /// Selectable candidates, higher priority then older first.
    pub fn selectable(&self) -> Vec<&Candidate> {
        let mut out: Vec<&Candidate> = self
            .selectable
            .iter()
            .filter_map(|id| self.candidates.get(id))
            .collect();
        out.sort_by(|a, b| selection_order((a.priority, a.action), (b.priority, b.action)));
        out
    }

    pub fn take(&mut self, action: ActionId) -> Option<Candidate> {
        self.selectable.retain(|a| *a != action);
        self.candidates.remove(&action)
    }

    /// Actions that were never released: blocked ones and those waiting on
    /// something that could not be planned.
    pub fn drain_unplanned(&mut self) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = std::mem::take(&mut self.waiting)
            .into_values()
            .map(|w| w.candidate)
            .collect();
        out.extend(self.candidates.drain().map(|(_, c)| c));
        out.append(&mut self.blocked);
        self.ready.clear();
        self.selectable.clear();
        out.sort_by_key(|c| c.action);
        out
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    // ── Holes ──────────────────────────────────────────────────────

    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }

    pub fn add_hole(&mut self, hole: Hole) {
        if hole.start >= hole.end || hole.resources.is_useless() {
            return;
        }
        let index = self
            .holes
            .iter()
            .position(|h| h.start > hole.start)
            .unwrap_or(self.holes.len());
        self.holes.insert(index, hole);
    }

    /// Earliest hole that fits `req` for `duration` once data is ready.
    pub fn find_hole(&self, req: &ResourceDescription, data_ready: i64, duration: i64) -> Option<usize> {
        self.holes.iter().position(|h| {
            h.resources.can_host_dynamic(req) && h.start.max(data_ready).saturating_add(duration) <= h.end
        })
    }

    /// Place `action` into hole `index` over `[start, end)` using `req`.
    ///
    /// What the action does not use stays a hole for the same consumer.
    /// The part of `req` before `start` is idle until `action` starts; the
    /// part after `end` is idle until the consumer starts, now freed by
    /// `action`.
    pub fn split_hole(&mut self, index: usize, action: ActionId, start: i64, end: i64, req: &ResourceDescription) -> Hole {
        let hole = self.holes.remove(index);
        let mut rest = hole.resources.clone();
        rest.reduce(req);
        self.add_hole(Hole {
            resources: rest,
            ..hole.clone()
        });
        self.add_hole(Hole {
            start: hole.start,
            end: start,
            resources: req.clone(),
            origin: hole.origin,
            consumer: action,
        });
        self.add_hole(Hole {
            start: end,
            end: hole.end,
            resources: req.clone(),
            origin: Some(action),
            consumer: hole.consumer,
        });
        hole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64, priority: i32, ready: i64) -> Candidate {
        Candidate {
            action: ActionId(id),
            priority,
            group_priority: -1,
            implementation: ImplementationId::new(0, 0),
            requirements: ResourceDescription::cpus(1),
            profile: Profile::with_average(10),
            data_ready: ready,
        }
    }

    #[test]
    fn ready_queue_releases_in_time_order() {
        let mut local = LocalOptimizationState::new();
        local.defer(candidate(3, 0, 100));
        local.defer(candidate(1, 0, 0));
        local.defer(candidate(2, 5, 0));

        local.release_ready(0);
        let ids: Vec<_> = local.selectable().iter().map(|c| c.action).collect();
        assert_eq!(ids, vec![ActionId(2), ActionId(1)]);
        assert_eq!(local.next_ready_time(), Some(100));

        local.take(ActionId(2)).unwrap();
        local.release_ready(100);
        let ids: Vec<_> = local.selectable().iter().map(|c| c.action).collect();
        assert_eq!(ids, vec![ActionId(1), ActionId(3)]);
    }

    #[test]
    fn waiting_actions_follow_planned_inputs() {
        let mut local = LocalOptimizationState::new();
        local.wait_on(candidate(5, 0, 20), vec![ActionId(1), ActionId(2)]);
        local.planned(ActionId(1), 40);
        assert_eq!(local.next_ready_time(), None);
        local.planned(ActionId(2), 30);
        assert_eq!(local.next_ready_time(), Some(40));
        local.block(candidate(6, 0, 0));
        assert_eq!(local.blocked_count(), 1);
        let unplanned: Vec<_> = local.drain_unplanned().iter().map(|c| c.action).collect();
        assert_eq!(unplanned, vec![ActionId(5), ActionId(6)]);
    }

    #[test]
    fn hole_split_keeps_unused_parts() {
        let mut local = LocalOptimizationState::new();
        local.add_hole(Hole {
            start: 0,
            end: 50,
            resources: ResourceDescription::cpus(2),
            origin: None,
            consumer: ActionId(2),
        });
        assert_eq!(local.find_hole(&ResourceDescription::cpus(3), 0, 10), None);
        assert_eq!(local.find_hole(&ResourceDescription::cpus(1), 45, 10), None);
        let index = local.find_hole(&ResourceDescription::cpus(1), 10, 20).unwrap();

        local.split_hole(index, ActionId(3), 10, 30, &ResourceDescription::cpus(1));
        let holes: Vec<_> = local
            .holes()
            .iter()
            .map(|h| (h.start, h.end, h.resources.clone(), h.origin))
            .collect();
        assert_eq!(
            holes,
            vec![
                (0, 50, ResourceDescription::cpus(1), None),
                (0, 10, ResourceDescription::cpus(1), None),
                (30, 50, ResourceDescription::cpus(1), Some(ActionId(3))),
            ]
        );
    }
}
