//! Scheduler: assigns actions to (worker, implementation) pairs.
//!
//! The scheduler owns the registered [`ResourceScheduler`]s in registration
//! order and shares the [`RuntimeState`] with the optimizer. Lock order is
//! always state first, then the worker list, then a worker's timeline.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use warp_core::{ActionId, Clock, END_OF_TIME, Implementation, ImplementationId, Objective, Profile};
use warpgrid_state::{ActionState, Assignment, RuntimeState};

use crate::error::{SchedulerError, SchedulerResult};
use crate::resource_scheduler::ResourceScheduler;
use crate::score::Score;
use crate::timeline::SlotStatus;

/// Result of offering one action to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A window was reserved.
    Scheduled {
        worker: String,
        implementation: ImplementationId,
        start: i64,
        end: i64,
    },
    /// Assigned to a worker but parked until data or resources are known.
    Parked { worker: String, status: SlotStatus },
    /// A scheduling predecessor has not been placed yet.
    Deferred,
}

/// What happened when an execution finished.
#[derive(Debug, Clone, Default)]
pub struct CompletionReport {
    pub action: ActionId,
    pub worker: Option<String>,
    pub implementation: Option<ImplementationId>,
    /// Updated profile of the implementation after a successful run.
    pub profile: Option<Profile>,
    /// Data successors failed along with the action.
    pub failed: Vec<ActionId>,
    /// Actions that can be launched now.
    pub launchable: Vec<ActionId>,
    /// Finished actions removed from the state.
    pub collected: Vec<ActionId>,
}

pub struct Scheduler {
    state: Arc<RwLock<RuntimeState>>,
    workers: RwLock<Vec<Arc<ResourceScheduler>>>,
    clock: Arc<dyn Clock>,
    objective: Objective,
    data_transfer_delay: i64,
    /// Unscheduled actions no worker could host when they were offered.
    blocked: Mutex<BTreeSet<ActionId>>,
}

impl Scheduler {
    pub fn new(state: Arc<RwLock<RuntimeState>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            workers: RwLock::new(Vec::new()),
            clock,
            objective: Objective::default(),
            data_transfer_delay: 0,
            blocked: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Delay added to data-ready time for inputs produced on another worker.
    pub fn with_data_transfer_delay(mut self, delay_ms: i64) -> Self {
        self.data_transfer_delay = delay_ms;
        self
    }

    pub fn state(&self) -> &Arc<RwLock<RuntimeState>> {
        &self.state
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn data_transfer_delay(&self) -> i64 {
        self.data_transfer_delay
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub async fn workers(&self) -> Vec<Arc<ResourceScheduler>> {
        self.workers.read().await.clone()
    }

    pub async fn worker(&self, name: &str) -> Option<Arc<ResourceScheduler>> {
        self.workers
            .read()
            .await
            .iter()
            .find(|w| w.name() == name)
            .cloned()
    }

    pub async fn blocked(&self) -> Vec<ActionId> {
        self.blocked.lock().await.iter().copied().collect()
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Register a worker and retry the actions that were blocked so far.
    pub async fn add_worker(&self, worker: ResourceScheduler) -> SchedulerResult<Arc<ResourceScheduler>> {
        let worker = Arc::new(worker);
        {
            let mut workers = self.workers.write().await;
            if workers.iter().any(|w| w.name() == worker.name()) {
                return Err(SchedulerError::DuplicateWorker(worker.name().to_string()));
            }
            workers.push(worker.clone());
        }
        info!(worker = %worker.name(), description = %worker.description(), "worker added");
        self.retry_blocked().await;
        Ok(worker)
    }

    /// Remove an idle-or-pending worker; its pending actions are offered
    /// again to the remaining workers. Returns the rescheduled actions.
    pub async fn remove_worker(&self, name: &str) -> SchedulerResult<Vec<ActionId>> {
        let mut state = self.state.write().await;
        let worker = {
            let mut workers = self.workers.write().await;
            let index = workers
                .iter()
                .position(|w| w.name() == name)
                .ok_or_else(|| SchedulerError::UnknownWorker(name.to_string()))?;
            let running = workers[index].running_count().await;
            if running > 0 {
                return Err(SchedulerError::WorkerBusy {
                    worker: name.to_string(),
                    running,
                });
            }
            workers.remove(index)
        };

        let now = self.now();
        let mut pending = Vec::new();
        for (id, _) in worker.slots().await {
            worker.unschedule(id, now).await;
            if state.contains(id) {
                state.transition(id, ActionState::Unscheduled, now)?;
                pending.push(id);
            }
        }
        info!(worker = %name, pending = pending.len(), "worker removed");

        for id in &pending {
            if let Err(e) = self.schedule_locked(&mut state, *id).await {
                warn!(action = %id, error = %e, "action not rescheduled");
            }
        }
        Ok(pending)
    }

    // ── Assignment ─────────────────────────────────────────────────

    /// Offer an unscheduled action, then the scheduling successors that
    /// become offerable once it is placed.
    pub async fn schedule(&self, id: ActionId) -> SchedulerResult<ScheduleOutcome> {
        let mut state = self.state.write().await;
        let outcome = self.schedule_locked(&mut state, id).await?;
        if outcome != ScheduleOutcome::Deferred {
            self.offer_successors(&mut state, id).await;
        }
        Ok(outcome)
    }

    /// Record that `consumer` is offered only once `producer` is placed.
    pub async fn add_scheduling_dependency(&self, producer: ActionId, consumer: ActionId) -> SchedulerResult<()> {
        let mut state = self.state.write().await;
        state.add_scheduling_dependency(producer, consumer)?;
        debug!(%producer, %consumer, "scheduling dependency added");
        Ok(())
    }

    pub(crate) async fn schedule_locked(
        &self,
        state: &mut RuntimeState,
        id: ActionId,
    ) -> SchedulerResult<ScheduleOutcome> {
        let action = state.action(id)?;
        if action.state != ActionState::Unscheduled {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                operation: "schedule",
                state: action.state.to_string(),
            });
        }
        let (priority, group, core) = (action.priority, action.group_priority, action.core);
        let now = self.now();

        if let Some(predecessor) = state.failed_predecessor(id)? {
            state.transition(id, ActionState::Failed, now)?;
            return Err(SchedulerError::PredecessorFailed { action: id, predecessor });
        }
        if !state.is_offerable(id)? {
            debug!(action = %id, "action deferred until its scheduling predecessors are placed");
            return Ok(ScheduleOutcome::Deferred);
        }

        let implementations = state.implementations_of(id)?.to_vec();
        let workers = self.workers().await;
        let mut best: Option<(Score, &Arc<ResourceScheduler>, &Implementation, i64)> = None;
        for worker in &workers {
            let data_ready = data_ready_on(state, id, worker.name(), now, self.data_transfer_delay);
            for implementation in &implementations {
                if !worker.can_ever_host(&implementation.requirements) {
                    continue;
                }
                let score = worker.score(priority, group, implementation, data_ready, now).await;
                if score.is_better_than(best.as_ref().map(|b| &b.0), self.objective) {
                    best = Some((score, worker, implementation, data_ready));
                }
            }
        }

        let Some((score, worker, implementation, data_ready)) = best else {
            self.blocked.lock().await.insert(id);
            return Err(SchedulerError::Blocked {
                action: id,
                reason: format!("no worker can host any implementation of core {core}"),
            });
        };

        let placement = worker.reserve(id, implementation, data_ready).await;
        state.transition(id, ActionState::Scheduled, now)?;
        state.set_assignment(
            id,
            Some(Assignment {
                worker: worker.name().to_string(),
                implementation: implementation.id,
                expected_start: placement.start,
                expected_end: placement.end,
            }),
        )?;
        self.blocked.lock().await.remove(&id);
        info!(
            action = %id,
            worker = %worker.name(),
            implementation = %implementation.id,
            start = placement.start,
            end = placement.end,
            expected_end = score.expected_end(),
            "action scheduled"
        );

        Ok(if placement.status.is_parked() {
            ScheduleOutcome::Parked {
                worker: worker.name().to_string(),
                status: placement.status,
            }
        } else {
            ScheduleOutcome::Scheduled {
                worker: worker.name().to_string(),
                implementation: implementation.id,
                start: placement.start,
                end: placement.end,
            }
        })
    }

    async fn offer_successors(&self, state: &mut RuntimeState, id: ActionId) {
        let mut worklist = vec![id];
        while let Some(placed) = worklist.pop() {
            let successors = match state.action(placed) {
                Ok(a) => a.scheduling_successors.clone(),
                Err(_) => continue,
            };
            for successor in successors {
                let ready = state
                    .action(successor)
                    .is_ok_and(|a| a.state == ActionState::Unscheduled)
                    && state.is_offerable(successor).unwrap_or(false);
                if !ready {
                    continue;
                }
                match self.schedule_locked(state, successor).await {
                    Ok(ScheduleOutcome::Deferred) => {}
                    Ok(_) => worklist.push(successor),
                    Err(e) => warn!(action = %successor, error = %e, "scheduling successor not placed"),
                }
            }
        }
    }

    /// Offer every blocked action again; returns those that were placed.
    pub async fn retry_blocked(&self) -> Vec<ActionId> {
        let pending: Vec<ActionId> = std::mem::take(&mut *self.blocked.lock().await)
            .into_iter()
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }
        let mut state = self.state.write().await;
        let mut placed = Vec::new();
        for id in pending {
            if !state
                .action(id)
                .is_ok_and(|a| a.state == ActionState::Unscheduled)
            {
                continue;
            }
            match self.schedule_locked(&mut state, id).await {
                Ok(ScheduleOutcome::Deferred) => {}
                Ok(_) => {
                    self.offer_successors(&mut state, id).await;
                    placed.push(id);
                }
                Err(e) => debug!(action = %id, error = %e, "action still blocked"),
            }
        }
        placed
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Scheduled actions whose resources and inputs are available now,
    /// earliest expected start first.
    pub async fn launchable(&self) -> Vec<ActionId> {
        let state = self.state.read().await;
        self.launchable_locked(&state).await
    }

    async fn launchable_locked(&self, state: &RuntimeState) -> Vec<ActionId> {
        let workers = self.workers().await;
        let mut ready = Vec::new();
        for action in state.actions().filter(|a| a.state == ActionState::Scheduled) {
            if !inputs_ready(state, action.id) {
                continue;
            }
            let Some(worker) = action
                .worker()
                .and_then(|name| workers.iter().find(|w| w.name() == name))
            else {
                continue;
            };
            if let Some(slot) = worker.slot(action.id).await
                && slot.status == SlotStatus::Scheduled
                && !slot.waits_for_resources
            {
                ready.push((slot.expected_start, action.id));
            }
        }
        ready.sort();
        ready.into_iter().map(|(_, id)| id).collect()
    }

    /// Mark a scheduled action as running on its worker.
    ///
    /// Only launchable actions start: inputs still being produced or
    /// resources still held by a predecessor on the worker leave the action
    /// waiting.
    pub async fn start(&self, id: ActionId) -> SchedulerResult<()> {
        let mut state = self.state.write().await;
        let now = self.now();
        let action = state.action(id)?;
        let Some(assignment) = action.assignment.clone().filter(|_| action.state == ActionState::Scheduled)
        else {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                operation: "start",
                state: action.state.to_string(),
            });
        };
        let worker = self
            .worker(&assignment.worker)
            .await
            .ok_or_else(|| SchedulerError::UnknownWorker(assignment.worker.clone()))?;
        let waiting = !inputs_ready(&state, id)
            || worker
                .slot(id)
                .await
                .is_some_and(|slot| slot.waits_for_resources);
        if waiting {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                operation: "start",
                state: "waiting".to_string(),
            });
        }
        if !worker.start(id, now).await {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                operation: "start",
                state: "parked".to_string(),
            });
        }
        let end = worker
            .slot(id)
            .await
            .map_or(END_OF_TIME, |s| s.expected_end);
        state.transition(id, ActionState::Running, now)?;
        state.set_assignment(
            id,
            Some(Assignment {
                expected_start: now,
                expected_end: end,
                ..assignment
            }),
        )?;
        info!(action = %id, worker = %worker.name(), expected_end = end, "action started");
        Ok(())
    }

    /// Handle the end of an execution reported by the execution layer.
    ///
    /// A success feeds the measured duration into the worker's profile. A
    /// failure fails every data successor that has not finished yet. Either
    /// way the action's resources go back to the timeline.
    pub async fn notify_completion(
        &self,
        id: ActionId,
        success: bool,
        duration_ms: i64,
    ) -> SchedulerResult<CompletionReport> {
        let mut state = self.state.write().await;
        let now = self.now();
        let action = state.action(id)?;
        if action.state != ActionState::Running {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                operation: "complete",
                state: action.state.to_string(),
            });
        }
        let assignment = action.assignment.clone();
        let worker = match &assignment {
            Some(a) => self.worker(&a.worker).await,
            None => None,
        };

        let mut report = CompletionReport {
            action: id,
            worker: assignment.as_ref().map(|a| a.worker.clone()),
            implementation: assignment.as_ref().map(|a| a.implementation),
            ..CompletionReport::default()
        };

        if success {
            if let (Some(worker), Some(a)) = (&worker, &assignment) {
                report.profile = Some(worker.record_execution(a.implementation, duration_ms).await);
            }
            state.transition(id, ActionState::Completed, now)?;
            info!(action = %id, duration_ms, "action completed");
        } else {
            state.transition(id, ActionState::Failed, now)?;
            warn!(action = %id, duration_ms, "action failed");
            report.failed = self.fail_successors(&mut state, id, now).await?;
        }

        if let Some(worker) = &worker {
            worker.unschedule(id, now).await;
        }
        report.launchable = self.launchable_locked(&state).await;
        report.collected = state.collect_garbage();
        Ok(report)
    }

    async fn fail_successors(
        &self,
        state: &mut RuntimeState,
        id: ActionId,
        now: i64,
    ) -> SchedulerResult<Vec<ActionId>> {
        let mut failed = Vec::new();
        let mut worklist = state.action(id)?.data_successors.clone();
        while let Some(successor) = worklist.pop() {
            let Ok(action) = state.action(successor) else {
                continue;
            };
            if action.state.is_terminal() || action.state == ActionState::Running {
                continue;
            }
            if let Some(name) = action.worker()
                && let Some(worker) = self.worker(name).await
            {
                worker.unschedule(successor, now).await;
            }
            worklist.extend(action.data_successors.iter().copied());
            state.transition(successor, ActionState::Failed, now)?;
            self.blocked.lock().await.remove(&successor);
            debug!(action = %successor, predecessor = %id, "action failed with its predecessor");
            failed.push(successor);
        }
        Ok(failed)
    }

    /// Withdraw an action that has not started: its reservation is
    /// released and it becomes unscheduled again.
    pub async fn cancel(&self, id: ActionId) -> SchedulerResult<()> {
        let mut state = self.state.write().await;
        let action = state.action(id)?;
        match action.state {
            ActionState::Unscheduled => {
                self.blocked.lock().await.remove(&id);
                Ok(())
            }
            ActionState::Scheduled => {
                let now = self.now();
                if let Some(name) = action.worker()
                    && let Some(worker) = self.worker(name).await
                {
                    worker.unschedule(id, now).await;
                }
                state.transition(id, ActionState::Unscheduled, now)?;
                info!(action = %id, "action withdrawn");
                Ok(())
            }
            other => Err(SchedulerError::InvalidTransition {
                action: id,
                operation: "cancel",
                state: other.to_string(),
            }),
        }
    }

    /// Human-readable state of every worker.
    pub async fn dump(&self) -> String {
        let state = self.state.read().await;
        let counts = state.counts();
        let mut out = format!(
            "actions: {} unscheduled, {} scheduled, {} running, {} completed, {} failed\n",
            counts.unscheduled, counts.scheduled, counts.running, counts.completed, counts.failed
        );
        for worker in self.workers().await {
            out.push_str(&worker.dump().await);
        }
        let blocked = self.blocked().await;
        if !blocked.is_empty() {
            out.push_str(&format!("  blocked: {}\n", blocked.len()));
        }
        out
    }
}

/// Whether every data predecessor of `id` has completed. Collected
/// predecessors count as completed unless they failed.
fn inputs_ready(state: &RuntimeState, id: ActionId) -> bool {
    state.action(id).is_ok_and(|action| {
        action.data_predecessors.iter().all(|p| match state.action(*p) {
            Ok(p) => p.state == ActionState::Completed,
            Err(_) => !state.has_failed(*p),
        })
    })
}

/// When every input of `id` is expected to be available on `worker`.
///
/// Completed (or collected) predecessors add nothing. A predecessor that
/// failed, is unassigned or has no known end makes the result
/// [`END_OF_TIME`]. Inputs produced on another worker arrive `delay` later.
pub fn data_ready_on(state: &RuntimeState, id: ActionId, worker: &str, now: i64, delay: i64) -> i64 {
    let Ok(action) = state.action(id) else {
        return now;
    };
    let mut ready = now;
    for pred in &action.data_predecessors {
        let Ok(p) = state.action(*pred) else {
            if state.has_failed(*pred) {
                return END_OF_TIME;
            }
            continue;
        };
        match p.state {
            ActionState::Completed => continue,
            ActionState::Failed => return END_OF_TIME,
            _ => {}
        }
        let Some(assignment) = &p.assignment else {
            return END_OF_TIME;
        };
        if assignment.expected_end == END_OF_TIME {
            return END_OF_TIME;
        }
        let mut available = assignment.expected_end;
        if assignment.worker != worker {
            available = available.saturating_add(delay);
        }
        ready = ready.max(available);
    }
    ready
}
