//! The orchestrator facade.
//!
//! Submission and completion calls go to the [`Scheduler`]; capacity
//! changes go to the [`Connector`]; measured profiles go to the
//! [`ProfileStore`]. Cloud workers join the scheduler once their VM is up,
//! from a task spawned per creation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warp_core::config::{CloudConfig, OrchestratorConfig};
use warp_core::{ActionId, Clock, ImplementationId, Profile, ResourceDescription};
use warpgrid_cloud::{CloudProvider, Connector, ConnectorSettings, CreationTicket, SimulatedProvider, TerminationReport, VmRequest};
use warpgrid_scheduler::{
    CompletionReport, IdleRates, ResourceScheduler, ScheduleOptimizer, ScheduleOutcome, Scheduler, SchedulerError,
};
use warpgrid_state::{ActionSpec, ProfileStore, RuntimeState};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::execution::{ExecutionLayer, WorkerCapacity};

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { action: ActionId, outcome: ScheduleOutcome },
    /// No worker can host the action now; it is retried when workers join.
    Blocked { action: ActionId, reason: String },
    /// A data predecessor already failed, so the action failed too.
    Failed { action: ActionId, predecessor: ActionId },
}

impl SubmitOutcome {
    pub fn action(&self) -> ActionId {
        match self {
            SubmitOutcome::Accepted { action, .. }
            | SubmitOutcome::Blocked { action, .. }
            | SubmitOutcome::Failed { action, .. } => *action,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapacityChange {
    /// VMs asked for; each joins as a worker once ready.
    pub requested: Vec<String>,
    /// Idle cloud workers handed back to the connector.
    pub released: Vec<String>,
}

/// What every cloud VM is asked for.
#[derive(Debug, Clone)]
struct CloudShape {
    image: String,
    request: ResourceDescription,
    idle: IdleRates,
}

impl From<&CloudConfig> for CloudShape {
    fn from(config: &CloudConfig) -> Self {
        Self {
            image: config
                .images
                .first()
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
            request: config
                .instance_types
                .first()
                .map(|t| t.description())
                .unwrap_or_default(),
            idle: IdleRates {
                power: config.idle_power,
                price: config.idle_price,
            },
        }
    }
}

pub struct Orchestrator {
    scheduler: Arc<Scheduler>,
    optimizer: Arc<ScheduleOptimizer>,
    optimizer_enabled: bool,
    interval: Duration,
    idle_timeout: i64,
    connector: Option<Arc<Connector>>,
    cloud: Option<CloudShape>,
    profiles: ProfileStore,
    /// Profiles from the configured average times, installed on every new worker.
    seeds: Arc<HashMap<ImplementationId, Profile>>,
    next_vm: AtomicU64,
    growing: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build from configuration. A `[cloud]` section with the `simulated`
    /// provider gets an in-process provider; other providers must be passed
    /// to [`Orchestrator::with_provider`].
    pub fn new(config: &OrchestratorConfig, clock: Arc<dyn Clock>, profiles: ProfileStore) -> Self {
        let provider = config.cloud.as_ref().and_then(|cloud| {
            if cloud.provider == "simulated" {
                Some(Arc::new(SimulatedProvider::from_config(cloud)) as Arc<dyn CloudProvider>)
            } else {
                warn!(provider = %cloud.provider, "unsupported cloud provider, running without elasticity");
                None
            }
        });
        Self::with_provider(config, clock, profiles, provider)
    }

    pub fn with_provider(
        config: &OrchestratorConfig,
        clock: Arc<dyn Clock>,
        profiles: ProfileStore,
        provider: Option<Arc<dyn CloudProvider>>,
    ) -> Self {
        let mut state = RuntimeState::new();
        let mut seeds = HashMap::new();
        for (index, core) in config.cores.iter().enumerate() {
            let element = core.to_core_element(index as u32);
            for (implementation, imp) in element.implementations.iter().zip(&core.implementations) {
                seeds.insert(implementation.id, imp.seed_profile());
            }
            state.register_core_element(element);
        }

        let scheduler = Arc::new(
            Scheduler::new(Arc::new(RwLock::new(state)), clock.clone())
                .with_objective(config.scheduler.objective)
                .with_data_transfer_delay(config.scheduler.data_transfer_delay_ms()),
        );
        let interval = config.optimizer.interval_duration();
        let optimizer = Arc::new(ScheduleOptimizer::new(
            scheduler.clone(),
            interval,
            config.optimizer.move_penalty_ms(),
        ));

        let (connector, cloud) = match (&config.cloud, provider) {
            (Some(cloud), Some(provider)) => (
                Some(Connector::new(provider, ConnectorSettings::from(cloud), clock)),
                Some(CloudShape::from(cloud)),
            ),
            _ => (None, None),
        };

        Self {
            scheduler,
            optimizer,
            optimizer_enabled: config.optimizer.enabled,
            interval,
            idle_timeout: config.optimizer.idle_timeout_ms(),
            connector,
            cloud,
            profiles,
            seeds: Arc::new(seeds),
            next_vm: AtomicU64::new(1),
            growing: Mutex::new(Vec::new()),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn optimizer(&self) -> &Arc<ScheduleOptimizer> {
        &self.optimizer
    }

    pub fn connector(&self) -> Option<&Arc<Connector>> {
        self.connector.as_ref()
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Register a fixed worker with the given capacity.
    pub async fn add_worker(&self, name: &str, capacity: WorkerCapacity) -> OrchestratorResult<()> {
        join_worker(&self.scheduler, &self.profiles, &self.seeds, name, capacity, false).await
    }

    /// Register every worker the execution layer knows about.
    pub async fn attach_workers(&self, layer: &dyn ExecutionLayer) -> OrchestratorResult<Vec<String>> {
        let mut attached = Vec::new();
        for name in layer.worker_names() {
            let capacity = layer.obtain_resource_handle(&name)?;
            self.add_worker(&name, capacity).await?;
            attached.push(name);
        }
        Ok(attached)
    }

    // ── Actions ────────────────────────────────────────────────────

    /// Create an action and offer it to the scheduler.
    pub async fn submit(&self, spec: ActionSpec) -> OrchestratorResult<SubmitOutcome> {
        let now = self.scheduler.now();
        let action = self.scheduler.state().write().await.create_action(spec, now)?;
        match self.scheduler.schedule(action).await {
            Ok(outcome) => Ok(SubmitOutcome::Accepted { action, outcome }),
            Err(SchedulerError::Blocked { reason, .. }) => {
                warn!(%action, %reason, "action blocked");
                Ok(SubmitOutcome::Blocked { action, reason })
            }
            Err(SchedulerError::PredecessorFailed { predecessor, .. }) => {
                Ok(SubmitOutcome::Failed { action, predecessor })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Offer `consumer` only once `producer` is placed.
    pub async fn add_scheduling_dependency(&self, producer: ActionId, consumer: ActionId) -> OrchestratorResult<()> {
        Ok(self.scheduler.add_scheduling_dependency(producer, consumer).await?)
    }

    pub async fn launchable(&self) -> Vec<ActionId> {
        self.scheduler.launchable().await
    }

    pub async fn start(&self, action: ActionId) -> OrchestratorResult<()> {
        Ok(self.scheduler.start(action).await?)
    }

    pub async fn cancel(&self, action: ActionId) -> OrchestratorResult<()> {
        Ok(self.scheduler.cancel(action).await?)
    }

    /// Feed an execution result back: profile update, resource release and
    /// failure propagation. The updated profile is persisted.
    pub async fn notify_completion(
        &self,
        action: ActionId,
        success: bool,
        duration_ms: i64,
    ) -> OrchestratorResult<CompletionReport> {
        let report = self.scheduler.notify_completion(action, success, duration_ms).await?;
        if let (Some(worker), Some(implementation), Some(profile)) =
            (&report.worker, report.implementation, &report.profile)
            && let Err(e) = self.profiles.put_profile(worker, implementation, profile)
        {
            warn!(%worker, %implementation, error = %e, "profile not persisted");
        }
        Ok(report)
    }

    // ── Capacity ───────────────────────────────────────────────────

    /// Grow by `delta` cloud workers, or shrink by releasing up to `-delta`
    /// idle ones (longest idle first).
    pub async fn request_capacity_change(&self, delta: i32) -> OrchestratorResult<CapacityChange> {
        let (Some(connector), Some(cloud)) = (&self.connector, &self.cloud) else {
            return Err(OrchestratorError::NoCloud);
        };
        let mut change = CapacityChange::default();

        if delta > 0 {
            for _ in 0..delta {
                let name = format!("cloud-{}", self.next_vm.fetch_add(1, Ordering::SeqCst));
                let request = VmRequest::new(&cloud.image, cloud.request.clone());
                match connector.turn_on(&name, request).await {
                    Ok(ticket) => {
                        self.spawn_join(ticket, cloud.idle).await;
                        change.requested.push(name);
                    }
                    Err(e) if change.requested.is_empty() => return Err(e.into()),
                    Err(e) => {
                        warn!(vm = %name, error = %e, "capacity request cut short");
                        break;
                    }
                }
            }
        } else if delta < 0 {
            let now = self.scheduler.now();
            let mut idle = Vec::new();
            for worker in self.scheduler.workers().await {
                if worker.is_elastic()
                    && let Some(for_ms) = worker.idle_for(now).await
                {
                    idle.push((for_ms, worker.name().to_string()));
                }
            }
            idle.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
            for (_, name) in idle.into_iter().take(delta.unsigned_abs() as usize) {
                self.release_worker(connector, &name).await?;
                change.released.push(name);
            }
        }
        info!(
            delta,
            requested = change.requested.len(),
            released = change.released.len(),
            "capacity change"
        );
        Ok(change)
    }

    async fn spawn_join(&self, ticket: CreationTicket, idle: IdleRates) {
        let scheduler = self.scheduler.clone();
        let profiles = self.profiles.clone();
        let seeds = self.seeds.clone();
        let handle = tokio::spawn(async move {
            let name = ticket.name.clone();
            match ticket.wait().await {
                Ok(vm) => {
                    let capacity = WorkerCapacity {
                        description: vm.description.instance.description.clone(),
                        idle,
                    };
                    match join_worker(&scheduler, &profiles, &seeds, &vm.name, capacity, true).await {
                        Ok(()) => info!(worker = %vm.name, env_id = %vm.env_id, reused = vm.reused, "cloud worker joined"),
                        Err(e) => warn!(worker = %vm.name, error = %e, "cloud worker not registered"),
                    }
                }
                Err(e) => warn!(vm = %name, error = %e, "capacity did not grow"),
            }
        });
        self.growing.lock().await.push(handle);
    }

    /// Wait until every requested VM has either joined or failed.
    pub async fn wait_for_capacity(&self) {
        let handles = std::mem::take(&mut *self.growing.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn release_worker(&self, connector: &Connector, name: &str) -> OrchestratorResult<()> {
        let moved = self.scheduler.remove_worker(name).await?;
        if !moved.is_empty() {
            debug!(worker = %name, moved = moved.len(), "pending actions moved off released worker");
        }
        let outcome = connector.pause(name).await?;
        // Cloud worker names restart from 1 with every daemon run.
        match self.profiles.delete_worker(name) {
            Ok(dropped) => debug!(worker = %name, dropped, "released worker profiles dropped"),
            Err(e) => warn!(worker = %name, error = %e, "released worker profiles not dropped"),
        }
        info!(worker = %name, ?outcome, "cloud worker released");
        Ok(())
    }

    /// Release cloud workers idle for longer than the idle timeout.
    pub async fn shrink_idle(&self) -> Vec<String> {
        let Some(connector) = &self.connector else {
            return Vec::new();
        };
        let now = self.scheduler.now();
        let mut released = Vec::new();
        for worker in self.scheduler.workers().await {
            if !worker.is_elastic() {
                continue;
            }
            let Some(for_ms) = worker.idle_for(now).await else {
                continue;
            };
            if for_ms < self.idle_timeout {
                continue;
            }
            match self.release_worker(connector, worker.name()).await {
                Ok(()) => released.push(worker.name().to_string()),
                Err(e) => warn!(worker = %worker.name(), error = %e, "idle worker not released"),
            }
        }
        released
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Run the optimizer, the deadline watcher and the idle shrink until
    /// shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if let Some(connector) = &self.connector {
            connector.start_deadline_watcher().await;
        }
        let optimizer = self.optimizer_enabled.then(|| {
            let optimizer = self.optimizer.clone();
            let rx = shutdown.clone();
            tokio::spawn(async move { optimizer.run(rx).await })
        });
        info!(
            optimizer = self.optimizer_enabled,
            cloud = self.connector.is_some(),
            "orchestrator running"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let released = self.shrink_idle().await;
                    if !released.is_empty() {
                        debug!(released = released.len(), "idle cloud workers released");
                    }
                }
                _ = shutdown.changed() => {
                    info!("orchestrator shutting down");
                    break;
                }
            }
        }
        if let Some(handle) = optimizer {
            let _ = handle.await;
        }
    }

    /// Wait for outstanding creations, then destroy every VM.
    pub async fn shutdown(&self) -> Option<TerminationReport> {
        self.wait_for_capacity().await;
        match &self.connector {
            Some(connector) => Some(connector.terminate_all().await),
            None => None,
        }
    }

    /// Human-readable dump: actions, every worker's gaps, VMs and cost.
    pub async fn current_state(&self) -> String {
        let mut out = self.scheduler.dump().await;
        if let Some(connector) = &self.connector {
            out.push_str(&connector.dump().await);
        }
        out
    }
}

async fn join_worker(
    scheduler: &Scheduler,
    profiles: &ProfileStore,
    seeds: &HashMap<ImplementationId, Profile>,
    name: &str,
    capacity: WorkerCapacity,
    elastic: bool,
) -> OrchestratorResult<()> {
    let mut worker = ResourceScheduler::new(name, capacity.description, capacity.idle);
    if elastic {
        worker = worker.elastic();
    }
    worker.load_profiles(seeds.clone()).await;
    worker.load_profiles(profiles.worker_profiles(name)?).await;
    scheduler.add_worker(worker).await?;
    Ok(())
}
