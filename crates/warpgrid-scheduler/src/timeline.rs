//! Gap timeline of one worker.
//!
//! The timeline keeps a list of unbounded gaps ordered by start time. A gap
//! `[t, +inf)` with origin `a` holds resources that become idle when `a`
//! ends; the gap with no origin holds resources that were always idle. The
//! resources idle at time `t` are the sum of the gaps that start at or
//! before `t`.
//!
//! Reserving an action takes its requirement out of the gaps and records
//! where it came from (its *resource predecessors*). Its start is the
//! latest of its data-ready time and the expected ends of those
//! predecessors. The resources come back as a new gap at its expected end.
//!
//! Actions that cannot be placed are parked behind one of two placeholders:
//! the data-blocking one (some input is produced by an action with no known
//! end) or the resource-blocking one (the gaps cannot cover the
//! requirement). Parked actions hold no resources and expect to run at
//! [`END_OF_TIME`].

use std::collections::HashMap;
use std::fmt::Write as _;

use warp_core::{ActionId, END_OF_TIME, Gap, ImplementationId, Profile, ResourceDescription, START_OF_TIME};

/// What an action on the timeline is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Holds a reservation and waits to be launched.
    Scheduled,
    Running,
    /// Parked behind the data-blocking placeholder.
    DataBlocked,
    /// Parked behind the resource-blocking placeholder.
    ResourceBlocked,
}

impl SlotStatus {
    pub fn is_parked(self) -> bool {
        matches!(self, SlotStatus::DataBlocked | SlotStatus::ResourceBlocked)
    }
}

/// Scheduling information of one action on this worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub implementation: ImplementationId,
    pub requirements: ResourceDescription,
    pub duration: i64,
    pub power: f64,
    pub price: f64,
    pub data_ready: i64,
    pub expected_start: i64,
    pub expected_end: i64,
    /// Resources taken from earlier gaps: start of the gap, origin, amount.
    pub predecessors: Vec<Gap>,
    /// Actions that take resources released by this one.
    pub successors: Vec<ActionId>,
    pub status: SlotStatus,
}

impl Slot {
    /// Whether the action still waits for resources held by another action.
    pub fn has_resource_predecessors(&self) -> bool {
        self.predecessors.iter().any(|p| p.origin.is_some())
    }

    fn cost(&self) -> f64 {
        self.price * self.duration as f64
    }

    fn energy(&self) -> f64 {
        self.power * self.duration as f64
    }
}

/// An action to place on the timeline.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub action: ActionId,
    pub implementation: ImplementationId,
    pub requirements: ResourceDescription,
    pub profile: Profile,
    pub data_ready: i64,
}

/// Where an action ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub status: SlotStatus,
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accounting {
    pub pending_cost: f64,
    pub pending_energy: f64,
    pub running_cost: f64,
    pub running_energy: f64,
    /// Expected end of the work currently running.
    pub running_end: i64,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    description: ResourceDescription,
    gaps: Vec<Gap>,
    slots: HashMap<ActionId, Slot>,
    data_blocked: Vec<ActionId>,
    resource_blocked: Vec<ActionId>,
    accounting: Accounting,
    scheduled_counts: HashMap<ImplementationId, u32>,
    running_counts: HashMap<ImplementationId, u32>,
}

impl Timeline {
    /// An empty timeline: the whole worker is free forever.
    pub fn new(description: ResourceDescription) -> Self {
        Self {
            gaps: vec![Gap::free(description.clone())],
            description,
            slots: HashMap::new(),
            data_blocked: Vec::new(),
            resource_blocked: Vec::new(),
            accounting: Accounting::default(),
            scheduled_counts: HashMap::new(),
            running_counts: HashMap::new(),
        }
    }

    pub fn description(&self) -> &ResourceDescription {
        &self.description
    }

    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    pub fn slot(&self, action: ActionId) -> Option<&Slot> {
        self.slots.get(&action)
    }

    pub fn slots(&self) -> impl Iterator<Item = (ActionId, &Slot)> {
        self.slots.iter().map(|(id, slot)| (*id, slot))
    }

    pub fn contains(&self, action: ActionId) -> bool {
        self.slots.contains_key(&action)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn accounting(&self) -> Accounting {
        self.accounting
    }

    pub fn data_blocked(&self) -> &[ActionId] {
        &self.data_blocked
    }

    pub fn resource_blocked(&self) -> &[ActionId] {
        &self.resource_blocked
    }

    pub fn scheduled_count(&self, implementation: ImplementationId) -> u32 {
        self.scheduled_counts.get(&implementation).copied().unwrap_or(0)
    }

    pub fn running_count(&self, implementation: ImplementationId) -> u32 {
        self.running_counts.get(&implementation).copied().unwrap_or(0)
    }

    pub fn running(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.slots
            .iter()
            .filter(|(_, s)| s.status == SlotStatus::Running)
            .map(|(id, _)| *id)
    }

    /// Start of the last gap, or 0 without gaps. Used as donation indicator.
    pub fn last_gap_start(&self) -> i64 {
        self.gaps.last().map_or(0, |g| g.start)
    }

    /// Earliest time, not before `floor`, at which the gaps hold `req`.
    pub fn resource_free_time(&self, req: &ResourceDescription, floor: i64) -> i64 {
        let mut wanted = req.clone();
        if wanted.is_useless() {
            return floor;
        }
        for gap in &self.gaps {
            let mut available = gap.resources.clone();
            available.take_common(&mut wanted);
            if wanted.is_useless() {
                return gap.start.max(floor);
            }
        }
        END_OF_TIME
    }

    // ── Reservation ────────────────────────────────────────────────

    /// Place an action using the gaps.
    ///
    /// Gaps that open no later than the data-ready time are used latest
    /// first, then later gaps in order. If the gaps cannot cover the
    /// requirement nothing is taken and the action is parked.
    pub fn schedule(&mut self, r: Reservation) -> Placement {
        if r.data_ready == END_OF_TIME {
            return self.park(r, SlotStatus::DataBlocked);
        }

        let Some((taken, start)) = self.reserve(r.action, &r.requirements, r.data_ready) else {
            return self.park(r, SlotStatus::ResourceBlocked);
        };

        let duration = r.profile.avg_time;
        let end = start.saturating_add(duration);
        self.release(end, r.action, r.requirements.clone());
        let slot = Slot {
            implementation: r.implementation,
            requirements: r.requirements,
            duration,
            power: r.profile.power,
            price: r.profile.price,
            data_ready: r.data_ready,
            expected_start: start,
            expected_end: end,
            predecessors: taken,
            successors: Vec::new(),
            status: SlotStatus::Scheduled,
        };
        self.add_pending(&slot);
        self.slots.insert(r.action, slot);
        Placement {
            status: SlotStatus::Scheduled,
            start,
            end,
        }
    }

    /// Take `req` out of the gaps for `action`, no earlier than `start_floor`.
    ///
    /// Returns the resource predecessors and the resulting start time, or
    /// `None` (with the gaps untouched) when the requirement is not covered.
    pub fn reserve(
        &mut self,
        action: ActionId,
        req: &ResourceDescription,
        start_floor: i64,
    ) -> Option<(Vec<Gap>, i64)> {
        let mut wanted = req.clone();
        let mut taken = Vec::new();

        let mut i = self.gaps.len();
        while i > 0 && !wanted.is_useless() {
            i -= 1;
            if self.gaps[i].start <= start_floor {
                use_gap(&mut self.gaps[i], &mut wanted, &mut taken);
                if self.gaps[i].is_useless() {
                    self.gaps.remove(i);
                }
            }
        }
        let mut i = 0;
        while i < self.gaps.len() && !wanted.is_useless() {
            let gap = &mut self.gaps[i];
            if gap.start > start_floor && gap.start < END_OF_TIME {
                use_gap(gap, &mut wanted, &mut taken);
                if gap.is_useless() {
                    self.gaps.remove(i);
                    continue;
                }
            }
            i += 1;
        }

        if !wanted.is_useless() {
            for gap in taken {
                self.add_gap(gap);
            }
            return None;
        }

        let mut start = start_floor;
        for piece in &taken {
            if let Some(origin) = piece.origin
                && let Some(pred) = self.slots.get_mut(&origin)
            {
                start = start.max(pred.expected_end);
                pred.successors.push(action);
            }
        }
        Some((taken, start))
    }

    /// Give resources back as an unbounded gap opening at `start`.
    pub fn release(&mut self, start: i64, origin: ActionId, resources: ResourceDescription) {
        self.add_gap(Gap::after(origin, start, resources));
    }

    fn park(&mut self, r: Reservation, status: SlotStatus) -> Placement {
        match status {
            SlotStatus::DataBlocked => self.data_blocked.push(r.action),
            _ => self.resource_blocked.push(r.action),
        }
        self.slots.insert(
            r.action,
            Slot {
                implementation: r.implementation,
                requirements: r.requirements,
                duration: r.profile.avg_time,
                power: r.profile.power,
                price: r.profile.price,
                data_ready: r.data_ready,
                expected_start: END_OF_TIME,
                expected_end: END_OF_TIME,
                predecessors: Vec::new(),
                successors: Vec::new(),
                status,
            },
        );
        Placement {
            status,
            start: END_OF_TIME,
            end: END_OF_TIME,
        }
    }

    /// Merge into the gap freed by the same origin, or insert after every
    /// gap that starts no later. Empty gaps are dropped.
    fn add_gap(&mut self, gap: Gap) {
        if gap.is_useless() {
            return;
        }
        if let Some(existing) = self.gaps.iter_mut().find(|g| g.origin == gap.origin) {
            existing.merge(&gap.resources);
            return;
        }
        let index = self
            .gaps
            .iter()
            .position(|g| g.start > gap.start)
            .unwrap_or(self.gaps.len());
        self.gaps.insert(index, gap);
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Mark a scheduled action as running from `now`.
    pub fn start(&mut self, action: ActionId, now: i64) -> bool {
        let Some(slot) = self.slots.get_mut(&action) else {
            return false;
        };
        if slot.status != SlotStatus::Scheduled {
            return false;
        }
        slot.status = SlotStatus::Running;
        slot.expected_start = now;
        slot.expected_end = now.saturating_add(slot.duration);
        let (end, implementation, cost, energy) =
            (slot.expected_end, slot.implementation, slot.cost(), slot.energy());

        self.accounting.pending_cost -= cost;
        self.accounting.pending_energy -= energy;
        self.accounting.running_cost += cost;
        self.accounting.running_energy += energy;
        self.accounting.running_end = self.accounting.running_end.max(end);
        decrement(&mut self.scheduled_counts, implementation);
        *self.running_counts.entry(implementation).or_default() += 1;

        for gap in self.gaps.iter_mut().filter(|g| g.origin == Some(action)) {
            gap.start = end;
        }
        self.gaps.sort_by_key(|g| g.start);
        true
    }

    /// Remove an action, handing the resources it took to its successors.
    ///
    /// Resources the action took from its predecessors go to the actions
    /// that were waiting on it; what is left returns to the gaps. Returns
    /// the successors that no longer wait on any other action's resources.
    pub fn unschedule(&mut self, action: ActionId) -> Option<Vec<ActionId>> {
        let slot = self.slots.remove(&action)?;
        match slot.status {
            SlotStatus::DataBlocked => {
                self.data_blocked.retain(|a| *a != action);
                return Some(Vec::new());
            }
            SlotStatus::ResourceBlocked => {
                self.resource_blocked.retain(|a| *a != action);
                return Some(Vec::new());
            }
            SlotStatus::Scheduled => {
                self.accounting.pending_cost -= slot.cost();
                self.accounting.pending_energy -= slot.energy();
                decrement(&mut self.scheduled_counts, slot.implementation);
            }
            SlotStatus::Running => {
                self.accounting.running_cost -= slot.cost();
                self.accounting.running_energy -= slot.energy();
                decrement(&mut self.running_counts, slot.implementation);
            }
        }

        let mut unassigned = slot.requirements.clone();
        let mut available: Vec<Gap> = Vec::new();
        for piece in &slot.predecessors {
            if let Some(origin) = piece.origin {
                available.push(Gap::new(piece.start, END_OF_TIME, Some(origin), piece.resources.clone()));
                unassigned.reduce(&piece.resources);
                if let Some(pred) = self.slots.get_mut(&origin) {
                    pred.successors.retain(|s| *s != action);
                }
            }
        }
        available.push(Gap::new(START_OF_TIME, END_OF_TIME, None, unassigned));

        let mut links: Vec<(ActionId, ActionId)> = Vec::new();
        let mut freed = Vec::new();
        for successor in &slot.successors {
            let Some(succ) = self.slots.get_mut(successor) else {
                continue;
            };
            let mut to_cover = slot.requirements.empty_like();
            succ.predecessors.retain(|p| {
                if p.origin == Some(action) {
                    to_cover.increase(&p.resources);
                    false
                } else {
                    true
                }
            });
            for gap in available.iter_mut() {
                if to_cover.is_useless() {
                    break;
                }
                let used = gap.resources.take_common(&mut to_cover);
                if used.is_useless() {
                    continue;
                }
                if let Some(origin) = gap.origin {
                    succ.predecessors
                        .push(Gap::new(gap.start, END_OF_TIME, Some(origin), used));
                    links.push((origin, *successor));
                }
            }
            available.retain(|g| !g.is_useless());
            if !succ.has_resource_predecessors() {
                freed.push(*successor);
            }
        }
        for (origin, successor) in links {
            if let Some(pred) = self.slots.get_mut(&origin)
                && !pred.successors.contains(&successor)
            {
                pred.successors.push(successor);
            }
        }

        self.gaps.retain(|g| g.origin != Some(action));
        for gap in available {
            if !gap.is_useless() {
                self.add_gap(gap);
            }
        }
        Some(freed)
    }

    /// Update the expected window of an action after re-planning.
    pub(crate) fn insert_slot(&mut self, action: ActionId, slot: Slot) {
        match slot.status {
            SlotStatus::Scheduled => self.add_pending(&slot),
            SlotStatus::Running => {
                self.accounting.running_cost += slot.cost();
                self.accounting.running_energy += slot.energy();
                self.accounting.running_end = self.accounting.running_end.max(slot.expected_end);
                *self.running_counts.entry(slot.implementation).or_default() += 1;
            }
            SlotStatus::DataBlocked => self.data_blocked.push(action),
            SlotStatus::ResourceBlocked => self.resource_blocked.push(action),
        }
        self.slots.insert(action, slot);
    }

    pub(crate) fn slot_mut(&mut self, action: ActionId) -> Option<&mut Slot> {
        self.slots.get_mut(&action)
    }

    /// Mutable access to the gap list, for re-planning.
    pub(crate) fn gaps_mut(&mut self) -> &mut Vec<Gap> {
        &mut self.gaps
    }

    fn add_pending(&mut self, slot: &Slot) {
        self.accounting.pending_cost += slot.cost();
        self.accounting.pending_energy += slot.energy();
        *self.scheduled_counts.entry(slot.implementation).or_default() += 1;
    }

    /// Sum of the requirements of every action whose window covers `t`.
    pub fn committed_at(&self, t: i64) -> ResourceDescription {
        let mut total = self.description.empty_like();
        for slot in self.slots.values() {
            if !slot.status.is_parked() && slot.expected_start <= t && t < slot.expected_end {
                total.increase(&slot.requirements);
            }
        }
        total
    }

    /// Resources held by gaps that are open at `t`.
    pub fn idle_at(&self, t: i64) -> ResourceDescription {
        let mut total = self.description.empty_like();
        for gap in self.gaps.iter().filter(|g| g.start <= t) {
            total.increase(&gap.resources);
        }
        total
    }

    /// Human-readable listing of gaps and parked actions.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for gap in &self.gaps {
            let _ = writeln!(out, "    gap {gap}");
        }
        if !self.data_blocked.is_empty() {
            let _ = writeln!(out, "    data-blocked: {}", join(&self.data_blocked));
        }
        if !self.resource_blocked.is_empty() {
            let _ = writeln!(out, "    resource-blocked: {}", join(&self.resource_blocked));
        }
        out
    }
}

fn use_gap(gap: &mut Gap, wanted: &mut ResourceDescription, taken: &mut Vec<Gap>) {
    let used = gap.resources.take_common(wanted);
    if !used.is_useless() {
        taken.push(Gap::new(gap.start, END_OF_TIME, gap.origin, used));
    }
}

fn decrement(counts: &mut HashMap<ImplementationId, u32>, implementation: ImplementationId) {
    if let Some(count) = counts.get_mut(&implementation) {
        *count = count.saturating_sub(1);
    }
}

fn join(ids: &[ActionId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORE_UNITS: [u32; 3] = [2, 3, 1];
    const CORE_TIMES: [i64; 3] = [50, 30, 20];

    fn reservation(id: u64, core: usize, data_ready: i64) -> Reservation {
        Reservation {
            action: ActionId(id),
            implementation: ImplementationId::new(core as u32, 0),
            requirements: ResourceDescription::cpus(CORE_UNITS[core]),
            profile: Profile::with_average(CORE_TIMES[core]),
            data_ready,
        }
    }

    fn window(t: &Timeline, id: u64) -> (i64, i64) {
        let s = t.slot(ActionId(id)).unwrap();
        (s.expected_start, s.expected_end)
    }

    #[test]
    fn eleven_actions_pack_deterministically() {
        let expected = [
            (0, 50),
            (50, 80),
            (50, 70),
            (80, 130),
            (130, 160),
            (130, 150),
            (160, 210),
            (210, 240),
            (210, 230),
            (240, 290),
            (290, 320),
        ];
        for _ in 0..3 {
            let mut t = Timeline::new(ResourceDescription::cpus(4));
            for id in 1..=11u64 {
                let core = ((id - 1) % 3) as usize;
                let placement = t.schedule(reservation(id, core, 0));
                assert_eq!(placement.status, SlotStatus::Scheduled);
            }
            for (i, w) in expected.iter().enumerate() {
                assert_eq!(window(&t, i as u64 + 1), *w, "action {}", i + 1);
            }
            let gaps: Vec<_> = t.gaps().iter().map(|g| (g.origin, g.start, g.resources.clone())).collect();
            assert_eq!(
                gaps,
                vec![
                    (Some(ActionId(10)), 290, ResourceDescription::cpus(1)),
                    (Some(ActionId(11)), 320, ResourceDescription::cpus(3)),
                ]
            );
        }
    }

    #[test]
    fn never_over_allocates() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        for id in 1..=11u64 {
            t.schedule(reservation(id, ((id - 1) % 3) as usize, (id as i64 % 4) * 7));
        }
        let limit = ResourceDescription::cpus(4);
        for time in 0..400 {
            assert!(limit.can_host(&t.committed_at(time)), "over-allocated at {time}");
        }
    }

    #[test]
    fn data_ready_delays_start() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        t.schedule(reservation(1, 0, 100));
        assert_eq!(window(&t, 1), (100, 150));
        t.schedule(reservation(2, 2, 0));
        assert_eq!(window(&t, 2), (0, 20));
        t.schedule(reservation(3, 1, 0));
        assert_eq!(window(&t, 3), (150, 180));
        assert_eq!(t.slot(ActionId(1)).unwrap().successors, vec![ActionId(3)]);
        assert!(t.slot(ActionId(3)).unwrap().has_resource_predecessors());
    }

    #[test]
    fn unknown_data_parks_action() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        let p = t.schedule(reservation(1, 0, END_OF_TIME));
        assert_eq!(p.status, SlotStatus::DataBlocked);
        assert_eq!(p.start, END_OF_TIME);
        assert_eq!(t.data_blocked(), &[ActionId(1)]);
        assert_eq!(t.idle_at(0), ResourceDescription::cpus(4));

        t.unschedule(ActionId(1)).unwrap();
        assert!(t.data_blocked().is_empty());
    }

    #[test]
    fn uncovered_requirement_parks_and_restores() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        let mut r = reservation(1, 0, 0);
        r.requirements = ResourceDescription::cpus(6);
        let before = t.gaps().to_vec();
        let p = t.schedule(r);
        assert_eq!(p.status, SlotStatus::ResourceBlocked);
        assert_eq!(t.gaps(), before.as_slice());
        assert_eq!(t.resource_blocked(), &[ActionId(1)]);
    }

    #[test]
    fn reserve_then_release_conserves_resources() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        t.schedule(reservation(1, 0, 0));
        let req = ResourceDescription::cpus(3);
        let (taken, start) = t.reserve(ActionId(2), &req, 10).unwrap();
        assert_eq!(start, 50);
        let total: u32 = taken
            .iter()
            .map(|g| match g.resources {
                ResourceDescription::Method(m) => m.processors,
                _ => 0,
            })
            .sum();
        assert_eq!(total, 3);
        t.release(start, ActionId(2), req);
        assert_eq!(t.idle_at(END_OF_TIME - 1), ResourceDescription::cpus(4));
    }

    #[test]
    fn unschedule_redistributes_to_successors() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        t.schedule(reservation(1, 0, 0)); // [0,50] 2 cpus
        t.schedule(reservation(2, 1, 0)); // [50,80] 3 cpus, takes 1 from #1
        t.schedule(reservation(3, 0, 0)); // takes 1 from #1 and 1 from #2
        assert_eq!(window(&t, 3), (80, 130));

        let freed = t.unschedule(ActionId(1)).unwrap();
        assert!(!t.contains(ActionId(1)));
        assert!(freed.contains(&ActionId(2)));
        let s2 = t.slot(ActionId(2)).unwrap();
        assert!(!s2.has_resource_predecessors());
        let s3 = t.slot(ActionId(3)).unwrap();
        assert!(s3.predecessors.iter().all(|p| p.origin != Some(ActionId(1))));
        assert!(s3.predecessors.iter().any(|p| p.origin == Some(ActionId(2))));
        assert!(!freed.contains(&ActionId(3)));

        assert!(t.gaps().iter().all(|g| g.origin != Some(ActionId(1))));
        let limit = ResourceDescription::cpus(4);
        assert!(limit.can_host(&t.idle_at(END_OF_TIME - 1)));
        assert_eq!(t.idle_at(END_OF_TIME - 1), ResourceDescription::cpus(4));
    }

    #[test]
    fn start_moves_accounting_and_gap() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        let mut r = reservation(1, 0, 0);
        r.profile = Profile::with_average(50).with_price(2.0).with_power(1.0);
        t.schedule(r);
        assert_eq!(t.accounting().pending_cost, 100.0);
        assert_eq!(t.scheduled_count(ImplementationId::new(0, 0)), 1);

        assert!(t.start(ActionId(1), 10));
        let acc = t.accounting();
        assert_eq!(acc.pending_cost, 0.0);
        assert_eq!(acc.running_cost, 100.0);
        assert_eq!(acc.running_energy, 50.0);
        assert_eq!(acc.running_end, 60);
        assert_eq!(t.running_count(ImplementationId::new(0, 0)), 1);
        assert_eq!(window(&t, 1), (10, 60));
        assert!(t.gaps().iter().any(|g| g.origin == Some(ActionId(1)) && g.start == 60));
        assert!(!t.start(ActionId(1), 11));

        t.unschedule(ActionId(1)).unwrap();
        assert_eq!(t.accounting().running_cost, 0.0);
        assert_eq!(t.gaps().len(), 1);
        assert_eq!(t.gaps()[0].origin, None);
        assert_eq!(t.gaps()[0].resources, ResourceDescription::cpus(4));
    }

    #[test]
    fn resource_free_time() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        t.schedule(reservation(1, 1, 0)); // 3 cpus until 30
        assert_eq!(t.resource_free_time(&ResourceDescription::cpus(1), 0), 0);
        assert_eq!(t.resource_free_time(&ResourceDescription::cpus(2), 0), 30);
        assert_eq!(t.resource_free_time(&ResourceDescription::cpus(2), 45), 45);
        assert_eq!(t.resource_free_time(&ResourceDescription::cpus(5), 0), END_OF_TIME);
        assert_eq!(t.last_gap_start(), 30);
    }

    #[test]
    fn zero_requirement_leaves_no_gap() {
        let mut t = Timeline::new(ResourceDescription::cpus(4));
        t.schedule(reservation(1, 1, 0));
        let mut r = reservation(2, 0, 0);
        r.requirements = ResourceDescription::cpus(0);
        r.profile = Profile::with_average(500);
        assert_eq!(t.schedule(r).status, SlotStatus::Scheduled);
        assert_eq!(window(&t, 2), (0, 500));
        assert!(t.gaps().iter().all(|g| g.origin != Some(ActionId(2))));
        assert_eq!(t.last_gap_start(), 30);
    }
}
