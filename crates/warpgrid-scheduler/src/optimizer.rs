//! ScheduleOptimizer: periodic re-planning of every worker's timeline.
//!
//! A *local pass* rebuilds one worker's timeline from scratch. Running
//! actions keep their resources until their expected end; pending actions
//! are re-offered in order of readiness, each one placed either after the
//! work already planned or inside a hole left idle before a later action.
//!
//! The *global* optimization runs a local pass on every worker, then lets
//! the workers whose timelines stretch furthest (the donors) hand pending
//! actions to the others when the move pays off despite its penalty. It
//! repeats while some action moved.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use warp_core::{ActionId, END_OF_TIME, Gap, ImplementationId};
use warpgrid_state::{ActionState, RuntimeState};

use crate::error::{SchedulerError, SchedulerResult};
use crate::local_state::{Candidate, Hole, LocalOptimizationState};
use crate::resource_scheduler::ResourceScheduler;
use crate::scheduler::{Scheduler, data_ready_on};
use crate::score::{Score, donation_order};
use crate::timeline::{Reservation, Slot, SlotStatus, Timeline};

/// Upper bound on donation rounds in one global optimization.
const MAX_ROUNDS: usize = 64;

/// Outcome of one local pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub worker: String,
    pub planned: usize,
    pub holes_filled: usize,
    pub parked: usize,
    /// Start of the last gap after the pass; the donation indicator.
    pub last_gap_start: i64,
}

/// A pending action handed from one worker to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub action: ActionId,
    pub from: String,
    pub to: String,
    pub implementation: ImplementationId,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationReport {
    pub rounds: usize,
    pub passes: Vec<PassReport>,
    pub migrations: Vec<Migration>,
}

pub struct ScheduleOptimizer {
    scheduler: Arc<Scheduler>,
    interval: Duration,
    move_penalty: i64,
}

impl ScheduleOptimizer {
    pub fn new(scheduler: Arc<Scheduler>, interval: Duration, move_penalty: i64) -> Self {
        Self {
            scheduler,
            interval,
            move_penalty,
        }
    }

    /// Run a single local pass on the named worker.
    pub async fn optimize_worker(&self, name: &str) -> SchedulerResult<PassReport> {
        let mut state = self.scheduler.state().write().await;
        let worker = self
            .scheduler
            .worker(name)
            .await
            .ok_or_else(|| SchedulerError::UnknownWorker(name.to_string()))?;
        let now = self.scheduler.now();
        Ok(self.local_pass(&mut state, &worker, now).await)
    }

    /// Local passes on every worker plus donation rounds, holding the state
    /// lock for the whole optimization.
    pub async fn global_optimization(&self) -> OptimizationReport {
        let mut state = self.scheduler.state().write().await;
        let workers = self.scheduler.workers().await;
        let now = self.scheduler.now();
        let mut report = OptimizationReport::default();

        while report.rounds < MAX_ROUNDS {
            report.rounds += 1;
            let mut indicators = Vec::with_capacity(workers.len());
            for worker in &workers {
                let pass = self.local_pass(&mut state, worker, now).await;
                indicators.push(pass.last_gap_start);
                report.passes.push(pass);
            }

            let (donors, receivers) = determine_donors_and_receivers(&indicators);
            let mut moved = false;
            for donor in donors {
                if let Some(migration) = self.donate(&mut state, &workers, donor, &receivers, now).await {
                    report.migrations.push(migration);
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        report
    }

    /// Optimize every `interval` until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "schedule optimizer started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let report = self.global_optimization().await;
                    debug!(
                        rounds = report.rounds,
                        migrations = report.migrations.len(),
                        "global optimization finished"
                    );
                }
                _ = shutdown.changed() => {
                    info!("schedule optimizer shutting down");
                    break;
                }
            }
        }
    }

    // ── Local pass ─────────────────────────────────────────────────

    async fn local_pass(&self, state: &mut RuntimeState, worker: &ResourceScheduler, now: i64) -> PassReport {
        let objective = self.scheduler.objective();
        let delay = self.scheduler.data_transfer_delay();
        let idle = worker.idle_rates();
        let profiles = worker.profiles().await;
        let mut timeline = worker.lock().await;
        let mut fresh = Timeline::new(timeline.description().clone());

        let mut running: Vec<(ActionId, Slot)> = timeline
            .slots()
            .filter(|(_, s)| s.status == SlotStatus::Running)
            .map(|(id, s)| (id, s.clone()))
            .collect();
        running.sort_by_key(|(id, _)| *id);
        for (id, mut slot) in running {
            if let Some(free) = fresh.gaps_mut().first_mut() {
                free.resources.reduce(&slot.requirements);
            }
            slot.expected_end = slot.expected_end.max(now);
            slot.predecessors.clear();
            slot.successors.clear();
            fresh.release(slot.expected_end, id, slot.requirements.clone());
            fresh.insert_slot(id, slot);
        }
        fresh.gaps_mut().retain(|g| !g.is_useless());

        let mut pending: Vec<(ActionId, Slot)> = timeline
            .slots()
            .filter(|(_, s)| s.status != SlotStatus::Running)
            .map(|(id, s)| (id, s.clone()))
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        let pending_ids: HashSet<ActionId> = pending.iter().map(|(id, _)| *id).collect();

        let mut local = LocalOptimizationState::new();
        for (id, slot) in pending {
            let Ok(action) = state.action(id) else {
                continue;
            };
            let mut data_ready = now;
            let mut internal = Vec::new();
            let mut blocked = false;
            for pred in &action.data_predecessors {
                let Ok(p) = state.action(*pred) else {
                    continue;
                };
                match p.state {
                    ActionState::Completed => continue,
                    ActionState::Failed => {
                        blocked = true;
                        break;
                    }
                    _ => {}
                }
                if pending_ids.contains(pred) {
                    internal.push(*pred);
                    continue;
                }
                match &p.assignment {
                    Some(a) if a.expected_end != END_OF_TIME => {
                        let mut available = a.expected_end;
                        if a.worker != worker.name() {
                            available = available.saturating_add(delay);
                        }
                        data_ready = data_ready.max(available);
                    }
                    _ => {
                        blocked = true;
                        break;
                    }
                }
            }
            let candidate = Candidate {
                action: id,
                priority: action.priority,
                group_priority: action.group_priority,
                implementation: slot.implementation,
                profile: profiles.get(&slot.implementation).copied().unwrap_or_default(),
                requirements: slot.requirements,
                data_ready,
            };
            if blocked {
                local.block(candidate);
            } else {
                local.wait_on(candidate, internal);
            }
        }

        let mut report = PassReport {
            worker: worker.name().to_string(),
            ..PassReport::default()
        };
        let mut cursor = now;
        loop {
            local.release_ready(cursor);
            if !local.has_selectable() {
                match local.next_ready_time() {
                    Some(t) => {
                        cursor = cursor.max(t);
                        continue;
                    }
                    None => break,
                }
            }

            let mut best: Option<(Score, ActionId, Option<usize>)> = None;
            for c in local.selectable() {
                let free = fresh.resource_free_time(&c.requirements, now);
                let after_planned =
                    Score::from_profile(c.priority, c.group_priority, c.data_ready, free, &c.profile, idle, now);
                let mut choice = (after_planned, None);
                if let Some(index) = local.find_hole(&c.requirements, c.data_ready, c.profile.avg_time) {
                    let hole = &local.holes()[index];
                    let in_hole = Score::from_profile(
                        c.priority,
                        c.group_priority,
                        c.data_ready,
                        hole.start,
                        &c.profile,
                        idle,
                        now,
                    );
                    if !after_planned.is_better(&in_hole, objective) {
                        choice = (in_hole, Some(index));
                    }
                }
                if choice.0.is_better_than(best.as_ref().map(|b| &b.0), objective) {
                    best = Some((choice.0, c.action, choice.1));
                }
            }

            let Some((_, action, hole)) = best else {
                break;
            };
            let Some(candidate) = local.take(action) else {
                break;
            };
            let end = match hole {
                Some(index) => {
                    report.holes_filled += 1;
                    fill_hole(&mut fresh, &mut local, index, candidate)
                }
                None => place_after(&mut fresh, &mut local, candidate, now),
            };
            report.planned += 1;
            local.planned(action, end);
        }

        for candidate in local.drain_unplanned() {
            fresh.schedule(Reservation {
                action: candidate.action,
                implementation: candidate.implementation,
                requirements: candidate.requirements,
                profile: candidate.profile,
                data_ready: END_OF_TIME,
            });
            report.parked += 1;
        }

        *timeline = fresh;
        for (id, slot) in timeline.slots() {
            if let Ok(action) = state.action_mut(id)
                && let Some(assignment) = action.assignment.as_mut()
            {
                assignment.expected_start = slot.expected_start;
                assignment.expected_end = slot.expected_end;
            }
        }
        report.last_gap_start = timeline.last_gap_start();
        debug!(
            worker = %report.worker,
            planned = report.planned,
            holes_filled = report.holes_filled,
            parked = report.parked,
            last_gap_start = report.last_gap_start,
            "local optimization pass"
        );
        report
    }

    // ── Donation ───────────────────────────────────────────────────

    /// Move the first pending action of `donor` that scores better on a
    /// receiver than where it is.
    async fn donate(
        &self,
        state: &mut RuntimeState,
        workers: &[Arc<ResourceScheduler>],
        donor: usize,
        receivers: &[usize],
        now: i64,
    ) -> Option<Migration> {
        let objective = self.scheduler.objective();
        let delay = self.scheduler.data_transfer_delay();
        let from = &workers[donor];

        let mut candidates: Vec<(i64, ActionId)> = from
            .slots()
            .await
            .into_iter()
            .filter(|(_, s)| s.status == SlotStatus::Scheduled)
            .map(|(id, s)| (s.expected_end, id))
            .collect();
        candidates.sort_by(|a, b| donation_order(*a, *b));

        for (_, id) in candidates {
            let Ok(action) = state.action(id) else {
                continue;
            };
            let (priority, group) = (action.priority, action.group_priority);
            let Ok(implementations) = state.implementations_of(id) else {
                continue;
            };
            let implementations = implementations.to_vec();

            let here = data_ready_on(state, id, from.name(), now, delay);
            let Some(current) = from.score_current(id, priority, group, here, now).await else {
                continue;
            };

            let mut best: Option<(Score, usize, usize, i64)> = None;
            for &r in receivers {
                let to = &workers[r];
                let data_ready = data_ready_on(state, id, to.name(), now, delay);
                for (i, implementation) in implementations.iter().enumerate() {
                    if !to.can_ever_host(&implementation.requirements) {
                        continue;
                    }
                    let score = to
                        .score_move(priority, group, implementation, data_ready, self.move_penalty, now)
                        .await;
                    if score.is_better_than(best.as_ref().map(|b| &b.0), objective) {
                        best = Some((score, r, i, data_ready));
                    }
                }
            }

            let Some((score, r, i, data_ready)) = best else {
                continue;
            };
            if !score.is_better(&current, objective) {
                continue;
            }

            let to = &workers[r];
            let implementation = &implementations[i];
            from.unschedule(id, now).await;
            let placement = to.reserve(id, implementation, data_ready).await;
            if let Ok(action) = state.action_mut(id)
                && let Some(assignment) = action.assignment.as_mut()
            {
                assignment.worker = to.name().to_string();
                assignment.implementation = implementation.id;
                assignment.expected_start = placement.start;
                assignment.expected_end = placement.end;
            }
            info!(
                action = %id,
                from = %from.name(),
                to = %to.name(),
                implementation = %implementation.id,
                start = placement.start,
                "action migrated"
            );
            return Some(Migration {
                action: id,
                from: from.name().to_string(),
                to: to.name().to_string(),
                implementation: implementation.id,
            });
        }
        None
    }
}

/// Split workers by donation indicator: donors share the highest value,
/// receivers are all others by ascending indicator (stable on ties).
pub fn determine_donors_and_receivers(indicators: &[i64]) -> (Vec<usize>, Vec<usize>) {
    let Some(max) = indicators.iter().copied().max() else {
        return (Vec::new(), Vec::new());
    };
    let donors: Vec<usize> = (0..indicators.len()).filter(|&i| indicators[i] == max).collect();
    let mut receivers: Vec<usize> = (0..indicators.len()).filter(|&i| indicators[i] != max).collect();
    receivers.sort_by_key(|&i| indicators[i]);
    (donors, receivers)
}

/// Place after the work already planned, recording the windows where the
/// taken resources sit idle before the action starts.
fn place_after(fresh: &mut Timeline, local: &mut LocalOptimizationState, c: Candidate, now: i64) -> i64 {
    let action = c.action;
    let placement = fresh.schedule(Reservation {
        action,
        implementation: c.implementation,
        requirements: c.requirements,
        profile: c.profile,
        data_ready: c.data_ready,
    });
    if placement.status == SlotStatus::Scheduled
        && let Some(slot) = fresh.slot(action)
    {
        for piece in &slot.predecessors {
            local.add_hole(Hole {
                start: piece.start.max(now),
                end: placement.start,
                resources: piece.resources.clone(),
                origin: piece.origin,
                consumer: action,
            });
        }
    }
    placement.end
}

/// Run the candidate inside a hole. The hole's consumer now takes those
/// resources from the candidate, whose freed resources never reach the gaps.
fn fill_hole(fresh: &mut Timeline, local: &mut LocalOptimizationState, index: usize, c: Candidate) -> i64 {
    let Some(hole) = local.holes().get(index).cloned() else {
        return END_OF_TIME;
    };
    let start = hole.start.max(c.data_ready);
    let end = start.saturating_add(c.profile.avg_time);
    local.split_hole(index, c.action, start, end, &c.requirements);

    let mut still_fed = false;
    if let Some(consumer) = fresh.slot_mut(hole.consumer) {
        let mut left = c.requirements.clone();
        for piece in consumer.predecessors.iter_mut().filter(|p| p.origin == hole.origin) {
            piece.resources.take_common(&mut left);
        }
        consumer.predecessors.retain(|p| !p.is_useless());
        still_fed = consumer.predecessors.iter().any(|p| p.origin == hole.origin);
        consumer
            .predecessors
            .push(Gap::new(end, END_OF_TIME, Some(c.action), c.requirements.clone()));
    }
    if let Some(origin) = hole.origin
        && let Some(pred) = fresh.slot_mut(origin)
    {
        if !still_fed {
            pred.successors.retain(|s| *s != hole.consumer);
        }
        pred.successors.push(c.action);
    }

    fresh.insert_slot(
        c.action,
        Slot {
            implementation: c.implementation,
            duration: c.profile.avg_time,
            power: c.profile.power,
            price: c.profile.price,
            data_ready: c.data_ready,
            expected_start: start,
            expected_end: end,
            predecessors: vec![Gap::new(hole.start, END_OF_TIME, hole.origin, c.requirements.clone())],
            successors: vec![hole.consumer],
            requirements: c.requirements,
            status: SlotStatus::Scheduled,
        },
    );
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::IdleRates;
    use std::collections::HashMap;
    use warp_core::{ManualClock, Profile, ResourceDescription};
    use warpgrid_state::{ActionSpec, Assignment};

    const CORES: [(u32, i64); 3] = [(2, 50), (3, 30), (1, 20)];

    async fn setup(workers: &[&str]) -> Arc<Scheduler> {
        let mut state = RuntimeState::new();
        for (i, (units, _)) in CORES.iter().enumerate() {
            state.register_core(&format!("core{i}"), vec![ResourceDescription::cpus(*units)]);
        }
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = Arc::new(Scheduler::new(Arc::new(tokio::sync::RwLock::new(state)), clock));
        for name in workers {
            add_worker(&scheduler, name).await;
        }
        scheduler
    }

    async fn add_worker(scheduler: &Scheduler, name: &str) {
        let worker = ResourceScheduler::new(name, ResourceDescription::cpus(4), IdleRates::default());
        let profiles = CORES
            .iter()
            .enumerate()
            .map(|(i, (_, avg))| (ImplementationId::new(i as u32, 0), Profile::with_average(*avg)))
            .collect::<HashMap<_, _>>();
        worker.load_profiles(profiles).await;
        scheduler.add_worker(worker).await.unwrap();
    }

    async fn submit(s: &Scheduler, spec: ActionSpec) -> ActionId {
        let id = s.state().write().await.create_action(spec, 0).unwrap();
        s.schedule(id).await.unwrap();
        id
    }

    async fn window(s: &Scheduler, id: ActionId) -> (i64, i64) {
        let state = s.state().read().await;
        let a = state.action(id).unwrap().assignment.clone().unwrap();
        (a.expected_start, a.expected_end)
    }

    /// An action running elsewhere whose output is ready at `end`.
    async fn remote_producer(s: &Scheduler, end: i64) -> ActionId {
        let mut state = s.state().write().await;
        let id = state.create_action(ActionSpec::new(0), 0).unwrap();
        state.transition(id, ActionState::Scheduled, 0).unwrap();
        state.transition(id, ActionState::Running, 0).unwrap();
        state
            .set_assignment(
                id,
                Some(Assignment {
                    worker: "remote".into(),
                    implementation: ImplementationId::new(0, 0),
                    expected_start: 0,
                    expected_end: end,
                }),
            )
            .unwrap();
        id
    }

    fn optimizer(s: &Arc<Scheduler>, penalty: i64) -> ScheduleOptimizer {
        ScheduleOptimizer::new(s.clone(), Duration::from_millis(10), penalty)
    }

    #[tokio::test]
    async fn pass_reorders_ready_actions_first() {
        let s = setup(&["w1"]).await;
        let producer = remote_producer(&s, 100).await;
        let d = submit(&s, ActionSpec::new(0).after(&[producer])).await;
        let small = submit(&s, ActionSpec::new(2)).await;
        let b = submit(&s, ActionSpec::new(1)).await;
        assert_eq!(window(&s, d).await, (100, 150));
        assert_eq!(window(&s, small).await, (0, 20));
        assert_eq!(window(&s, b).await, (150, 180));

        let report = optimizer(&s, 0).optimize_worker("w1").await.unwrap();
        assert_eq!(report.planned, 3);
        assert_eq!(window(&s, small).await, (0, 20));
        assert_eq!(window(&s, b).await, (0, 30));
        assert_eq!(window(&s, d).await, (100, 150));
    }

    #[tokio::test]
    async fn pass_fills_free_time_before_late_action() {
        let s = setup(&["w1"]).await;
        let producer = remote_producer(&s, 100).await;
        let d = submit(&s, ActionSpec::new(0).after(&[producer])).await;
        let small = submit(&s, ActionSpec::new(2)).await;
        let b = submit(&s, ActionSpec::new(1)).await;
        let f = submit(&s, ActionSpec::new(0)).await;
        assert_eq!(window(&s, f).await, (180, 230));

        optimizer(&s, 0).optimize_worker("w1").await.unwrap();
        assert_eq!(window(&s, small).await, (0, 20));
        assert_eq!(window(&s, b).await, (0, 30));
        assert_eq!(window(&s, f).await, (30, 80));
        assert_eq!(window(&s, d).await, (100, 150));

        let worker = s.worker("w1").await.unwrap();
        let timeline = worker.lock().await;
        for t in 0..200 {
            assert!(ResourceDescription::cpus(4).can_host(&timeline.committed_at(t)));
        }
    }

    #[tokio::test]
    async fn short_action_fills_hole() {
        let s = setup(&["w1"]).await;
        let a = submit(&s, ActionSpec::new(0).with_priority(2)).await;
        let c = submit(&s, ActionSpec::new(1).with_priority(1)).await;
        let small = submit(&s, ActionSpec::new(2)).await;
        assert_eq!(window(&s, a).await, (0, 50));
        assert_eq!(window(&s, c).await, (50, 80));
        assert_eq!(window(&s, small).await, (50, 70));

        let report = optimizer(&s, 0).optimize_worker("w1").await.unwrap();
        assert_eq!(report.holes_filled, 1);
        assert_eq!(window(&s, a).await, (0, 50));
        assert_eq!(window(&s, c).await, (50, 80));
        assert_eq!(window(&s, small).await, (0, 20));

        {
            let worker = s.worker("w1").await.unwrap();
            let timeline = worker.lock().await;
            let consumer = timeline.slot(c).unwrap();
            assert!(consumer.predecessors.iter().any(|p| p.origin == Some(small)));
            for t in 0..100 {
                assert!(ResourceDescription::cpus(4).can_host(&timeline.committed_at(t)));
            }
        }
        assert_eq!(s.launchable().await, vec![a, small]);
    }

    #[tokio::test]
    async fn blocked_inputs_are_parked() {
        let s = setup(&["w1"]).await;
        let producer = s.state().write().await.create_action(ActionSpec::new(0), 0).unwrap();
        let consumer = submit(&s, ActionSpec::new(2).after(&[producer])).await;
        let other = submit(&s, ActionSpec::new(2)).await;

        let report = optimizer(&s, 0).optimize_worker("w1").await.unwrap();
        assert_eq!(report.parked, 1);
        assert_eq!(report.planned, 1);
        assert_eq!(window(&s, consumer).await, (END_OF_TIME, END_OF_TIME));
        assert_eq!(window(&s, other).await, (0, 20));
    }

    #[tokio::test]
    async fn same_worker_chain_keeps_order() {
        let s = setup(&["w1"]).await;
        let first = submit(&s, ActionSpec::new(1)).await;
        let second = submit(&s, ActionSpec::new(2).after(&[first])).await;
        optimizer(&s, 0).optimize_worker("w1").await.unwrap();
        assert_eq!(window(&s, first).await, (0, 30));
        assert_eq!(window(&s, second).await, (30, 50));
    }

    #[tokio::test]
    async fn running_work_keeps_resources() {
        let s = setup(&["w1"]).await;
        let long = submit(&s, ActionSpec::new(1)).await;
        let next = submit(&s, ActionSpec::new(0)).await;
        s.start(long).await.unwrap();
        optimizer(&s, 0).optimize_worker("w1").await.unwrap();
        assert_eq!(window(&s, long).await, (0, 30));
        assert_eq!(window(&s, next).await, (30, 80));
    }

    #[test]
    fn donors_and_receivers() {
        let (donors, receivers) =
            determine_donors_and_receivers(&[35_000, 20_000, 15_000, 50_000, 40_000, 1_000]);
        assert_eq!(donors, vec![3]);
        assert_eq!(receivers, vec![5, 2, 1, 0, 4]);

        let (donors, receivers) = determine_donors_and_receivers(&[10, 10, 5]);
        assert_eq!(donors, vec![0, 1]);
        assert_eq!(receivers, vec![2]);
        assert_eq!(determine_donors_and_receivers(&[]), (vec![], vec![]));
    }

    #[tokio::test]
    async fn global_optimization_moves_work_to_idle_worker() {
        let s = setup(&["a"]).await;
        let first = submit(&s, ActionSpec::new(0)).await;
        let second = submit(&s, ActionSpec::new(0)).await;
        let third = submit(&s, ActionSpec::new(0)).await;
        assert_eq!(window(&s, third).await, (50, 100));
        add_worker(&s, "b").await;

        let report = optimizer(&s, 0).global_optimization().await;
        assert_eq!(report.migrations.len(), 1);
        assert_eq!(report.migrations[0].action, third);
        assert_eq!(report.migrations[0].to, "b");
        let state = s.state().read().await;
        assert_eq!(state.action(third).unwrap().worker(), Some("b"));
        assert_eq!(state.action(first).unwrap().worker(), Some("a"));
        assert_eq!(state.action(second).unwrap().worker(), Some("a"));
    }

    #[tokio::test]
    async fn move_penalty_keeps_work_in_place() {
        let s = setup(&["a"]).await;
        submit(&s, ActionSpec::new(0)).await;
        submit(&s, ActionSpec::new(0)).await;
        let third = submit(&s, ActionSpec::new(0)).await;
        add_worker(&s, "b").await;

        let report = optimizer(&s, 2_500).global_optimization().await;
        assert!(report.migrations.is_empty());
        assert_eq!(report.rounds, 1);
        assert_eq!(s.state().read().await.action(third).unwrap().worker(), Some("a"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let s = setup(&["a"]).await;
        let opt = optimizer(&s, 0);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { opt.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
