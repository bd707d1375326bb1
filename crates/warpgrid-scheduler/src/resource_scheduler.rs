//! ResourceScheduler: one worker's timeline, profiles and scoring.
//!
//! The timeline sits behind a single mutex. Direct reservations from the
//! [`Scheduler`](crate::Scheduler) and optimizer passes both take it, so
//! they never interleave on the same worker.

use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;
use warp_core::{ActionId, Gap, Implementation, ImplementationId, Profile, ResourceDescription};

use crate::score::{IdleRates, Score};
use crate::timeline::{Accounting, Placement, Reservation, SlotStatus, Timeline};

/// Where an action currently is on a worker, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotView {
    pub implementation: ImplementationId,
    pub status: SlotStatus,
    pub expected_start: i64,
    pub expected_end: i64,
    pub waits_for_resources: bool,
}

#[derive(Debug)]
pub struct ResourceScheduler {
    name: String,
    description: ResourceDescription,
    idle: IdleRates,
    /// Cloud workers can be handed back to their provider when idle.
    elastic: bool,
    profiles: RwLock<HashMap<ImplementationId, Profile>>,
    timeline: Mutex<Timeline>,
    /// When the worker last had nothing scheduled or running.
    idle_since: Mutex<Option<i64>>,
}

impl ResourceScheduler {
    pub fn new(name: &str, description: ResourceDescription, idle: IdleRates) -> Self {
        Self {
            name: name.to_string(),
            timeline: Mutex::new(Timeline::new(description.clone())),
            description,
            idle,
            elastic: false,
            profiles: RwLock::new(HashMap::new()),
            idle_since: Mutex::new(None),
        }
    }

    /// A worker backed by a cloud VM.
    pub fn elastic(mut self) -> Self {
        self.elastic = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &ResourceDescription {
        &self.description
    }

    pub fn idle_rates(&self) -> IdleRates {
        self.idle
    }

    pub fn is_elastic(&self) -> bool {
        self.elastic
    }

    /// Whether the worker's total capacity can ever satisfy `req`.
    pub fn can_ever_host(&self, req: &ResourceDescription) -> bool {
        self.description.can_host(req)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().await
    }

    // ── Profiles ───────────────────────────────────────────────────

    pub async fn profile(&self, implementation: ImplementationId) -> Profile {
        self.profiles
            .read()
            .await
            .get(&implementation)
            .copied()
            .unwrap_or_default()
    }

    /// Install profiles, keeping any that are already known with executions.
    pub async fn load_profiles(&self, profiles: HashMap<ImplementationId, Profile>) {
        let mut current = self.profiles.write().await;
        for (implementation, profile) in profiles {
            match current.get_mut(&implementation) {
                Some(existing) if existing.has_executions() => existing.accumulate(&profile),
                _ => {
                    current.insert(implementation, profile);
                }
            }
        }
    }

    /// Fold one measured execution into the profile and return it.
    pub async fn record_execution(&self, implementation: ImplementationId, duration_ms: i64) -> Profile {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.entry(implementation).or_default();
        profile.record_execution(duration_ms);
        debug!(worker = %self.name, %implementation, avg = profile.avg_time, "profile updated");
        *profile
    }

    pub async fn profiles(&self) -> HashMap<ImplementationId, Profile> {
        self.profiles.read().await.clone()
    }

    // ── Scores ─────────────────────────────────────────────────────

    /// Score running `implementation` here once data is ready at `data_ready`.
    pub async fn score(
        &self,
        priority: i32,
        group_priority: i64,
        implementation: &Implementation,
        data_ready: i64,
        now: i64,
    ) -> Score {
        let profile = self.profile(implementation.id).await;
        let free = self
            .timeline
            .lock()
            .await
            .resource_free_time(&implementation.requirements, now);
        Score::from_profile(priority, group_priority, data_ready, free, &profile, self.idle, now)
    }

    /// Score an action migrating here: both times carry the move penalty.
    pub async fn score_move(
        &self,
        priority: i32,
        group_priority: i64,
        implementation: &Implementation,
        data_ready: i64,
        penalty: i64,
        now: i64,
    ) -> Score {
        let profile = self.profile(implementation.id).await;
        let free = self
            .timeline
            .lock()
            .await
            .resource_free_time(&implementation.requirements, now);
        Score::from_profile(
            priority,
            group_priority,
            data_ready.saturating_add(penalty),
            free.saturating_add(penalty),
            &profile,
            self.idle,
            now,
        )
    }

    /// Score an action where it currently is: its expected start stands in
    /// for the resource-free time.
    pub async fn score_current(
        &self,
        action: ActionId,
        priority: i32,
        group_priority: i64,
        data_ready: i64,
        now: i64,
    ) -> Option<Score> {
        let (implementation, start) = {
            let timeline = self.timeline.lock().await;
            let slot = timeline.slot(action)?;
            (slot.implementation, slot.expected_start)
        };
        let profile = self.profile(implementation).await;
        Some(Score::from_profile(
            priority,
            group_priority,
            data_ready,
            start,
            &profile,
            self.idle,
            now,
        ))
    }

    // ── Timeline operations ────────────────────────────────────────

    /// Reserve a window for `action` with the given implementation.
    pub async fn reserve(&self, action: ActionId, implementation: &Implementation, data_ready: i64) -> Placement {
        let profile = self.profile(implementation.id).await;
        let placement = self.timeline.lock().await.schedule(Reservation {
            action,
            implementation: implementation.id,
            requirements: implementation.requirements.clone(),
            profile,
            data_ready,
        });
        *self.idle_since.lock().await = None;
        debug!(
            worker = %self.name,
            %action,
            implementation = %implementation.id,
            start = placement.start,
            end = placement.end,
            status = ?placement.status,
            "action reserved"
        );
        placement
    }

    /// Mark a reserved action as running.
    pub async fn start(&self, action: ActionId, now: i64) -> bool {
        self.timeline.lock().await.start(action, now)
    }

    /// Drop the action's reservation; returns successors that no longer
    /// wait on other actions' resources, or `None` if it was not here.
    pub async fn unschedule(&self, action: ActionId, now: i64) -> Option<Vec<ActionId>> {
        let mut timeline = self.timeline.lock().await;
        let freed = timeline.unschedule(action)?;
        if timeline.is_empty() {
            *self.idle_since.lock().await = Some(now);
        }
        debug!(worker = %self.name, %action, freed = freed.len(), "action unscheduled");
        Some(freed)
    }

    pub async fn slot(&self, action: ActionId) -> Option<SlotView> {
        let timeline = self.timeline.lock().await;
        timeline.slot(action).map(|s| SlotView {
            implementation: s.implementation,
            status: s.status,
            expected_start: s.expected_start,
            expected_end: s.expected_end,
            waits_for_resources: s.has_resource_predecessors(),
        })
    }

    /// Every action currently on the worker with its slot, in id order.
    pub async fn slots(&self) -> Vec<(ActionId, SlotView)> {
        let timeline = self.timeline.lock().await;
        let mut slots: Vec<_> = timeline
            .slots()
            .map(|(id, s)| {
                (
                    id,
                    SlotView {
                        implementation: s.implementation,
                        status: s.status,
                        expected_start: s.expected_start,
                        expected_end: s.expected_end,
                        waits_for_resources: s.has_resource_predecessors(),
                    },
                )
            })
            .collect();
        slots.sort_by_key(|(id, _)| *id);
        slots
    }

    pub async fn gaps(&self) -> Vec<Gap> {
        self.timeline.lock().await.gaps().to_vec()
    }

    pub async fn accounting(&self) -> Accounting {
        self.timeline.lock().await.accounting()
    }

    pub async fn running_count(&self) -> usize {
        self.timeline.lock().await.running().count()
    }

    pub async fn is_idle(&self) -> bool {
        self.timeline.lock().await.is_empty()
    }

    /// How long the worker has had nothing to do, or `None` if busy.
    pub async fn idle_for(&self, now: i64) -> Option<i64> {
        if !self.is_idle().await {
            return None;
        }
        let mut since = self.idle_since.lock().await;
        let start = *since.get_or_insert(now);
        Some(now.saturating_sub(start))
    }

    /// Human-readable state of the worker.
    pub async fn dump(&self) -> String {
        let timeline = self.timeline.lock().await;
        let acc = timeline.accounting();
        let mut out = format!(
            "  worker {} ({}){}: {} action(s), pending cost {:.3}, pending energy {:.1}\n",
            self.name,
            self.description,
            if self.elastic { " [cloud]" } else { "" },
            timeline.slots().count(),
            acc.pending_cost,
            acc.pending_energy,
        );
        out.push_str(&timeline.dump());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::{CoreElement, END_OF_TIME};

    fn worker() -> ResourceScheduler {
        ResourceScheduler::new("w1", ResourceDescription::cpus(4), IdleRates::default())
    }

    fn implementation(units: u32) -> Implementation {
        CoreElement::new(0, "task", vec![ResourceDescription::cpus(units)]).implementations[0].clone()
    }

    #[tokio::test]
    async fn rejects_impossible_requirements() {
        let w = worker();
        assert!(w.can_ever_host(&ResourceDescription::cpus(4)));
        assert!(!w.can_ever_host(&ResourceDescription::cpus(5)));
        assert!(!w.can_ever_host(&ResourceDescription::slots(1)));
    }

    #[tokio::test]
    async fn score_uses_profile_and_timeline() {
        let w = worker();
        let imp = implementation(3);
        w.load_profiles(HashMap::from([(imp.id, Profile::with_average(40))])).await;

        let first = w.score(0, -1, &imp, 0, 0).await;
        assert_eq!(first.resource_free, 0);
        assert_eq!(first.duration, 40);

        w.reserve(ActionId(1), &imp, 0).await;
        let second = w.score(0, -1, &imp, 0, 0).await;
        assert_eq!(second.resource_free, 40);
        assert!(first.is_better(&second, warp_core::Objective::Time));

        let moved = w.score_move(0, -1, &imp, 0, 2500, 0).await;
        assert_eq!(moved.resource_free, 2540);
        assert_eq!(moved.data_ready, 2500);

        let current = w.score_current(ActionId(1), 0, -1, 0, 0).await.unwrap();
        assert_eq!(current.resource_free, 0);
        assert!(w.score_current(ActionId(9), 0, -1, 0, 0).await.is_none());
    }

    #[tokio::test]
    async fn profile_learning() {
        let w = worker();
        let imp = implementation(1);
        assert_eq!(w.profile(imp.id).await.avg_time, 100);
        w.record_execution(imp.id, 30).await;
        let p = w.record_execution(imp.id, 50).await;
        assert_eq!(p.avg_time, 40);
        assert_eq!(p.executions, 2);

        // Loading stored profiles merges with what was learned.
        let mut stored = Profile::default();
        stored.record_execution(100);
        stored.record_execution(100);
        w.load_profiles(HashMap::from([(imp.id, stored)])).await;
        assert_eq!(w.profile(imp.id).await.avg_time, 70);
    }

    #[tokio::test]
    async fn idle_tracking() {
        let w = worker();
        let imp = implementation(1);
        assert_eq!(w.idle_for(100).await, Some(0));
        assert_eq!(w.idle_for(150).await, Some(50));

        w.reserve(ActionId(1), &imp, 0).await;
        assert_eq!(w.idle_for(200).await, None);
        w.unschedule(ActionId(1), 300).await.unwrap();
        assert_eq!(w.idle_for(350).await, Some(50));
    }

    #[tokio::test]
    async fn blocked_reservation_reports_placeholder() {
        let w = worker();
        let imp = implementation(2);
        let p = w.reserve(ActionId(4), &imp, END_OF_TIME).await;
        assert_eq!(p.status, SlotStatus::DataBlocked);
        let view = w.slot(ActionId(4)).await.unwrap();
        assert_eq!(view.expected_start, END_OF_TIME);
        assert!(w.dump().await.contains("data-blocked: #4"));
    }
}
