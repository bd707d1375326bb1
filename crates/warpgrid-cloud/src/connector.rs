//! Connector: elastic VM lifecycle for one cloud provider.
//!
//! ```text
//! turn_on ──▶ pending ──(pool: provider.create)──▶ live
//!    ▲                                               │ pause
//!    └──────────── reuse ◀── reusable ◀──(slot not nearly over)
//!                               │ deadline watcher     │ otherwise
//!                               ▼                      ▼
//!                          (pool: provider.destroy) ◀──┘
//! ```
//!
//! A VM is in exactly one of `live` or `reusable`; it is moved between them
//! under their locks, never copied. Costs of destroyed VMs are folded into
//! a total that only grows.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warp_core::{Clock, Completion, CompletionHandle, config::CloudConfig};

use crate::deadline::{BillingWindow, run_deadline_watcher};
use crate::error::{CloudError, CloudResult};
use crate::pool::WorkerPool;
use crate::provider::{CloudProvider, InstanceType};
use crate::vm::{Vm, VmDescription, VmRequest};

#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub billing: BillingWindow,
    pub initial_creation_time_ms: i64,
    pub creation_workers: usize,
}

impl From<&CloudConfig> for ConnectorSettings {
    fn from(config: &CloudConfig) -> Self {
        Self {
            billing: BillingWindow {
                slot_ms: config.slot_ms(),
                safety_margin_ms: config.safety_margin_ms(),
                min_poll: config.min_poll_duration(),
                max_poll: config.max_poll_duration(),
            },
            initial_creation_time_ms: config.initial_creation_time_ms(),
            creation_workers: config.creation_workers,
        }
    }
}

/// A VM ready to back a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedVm {
    pub name: String,
    pub env_id: String,
    pub description: VmDescription,
    pub reused: bool,
}

/// Handle on an asynchronous creation.
#[derive(Debug, Clone)]
pub struct CreationTicket {
    pub name: String,
    handle: CompletionHandle<CloudResult<CreatedVm>>,
}

impl CreationTicket {
    pub async fn wait(self) -> CloudResult<CreatedVm> {
        self.handle.wait().await.unwrap_or(Err(CloudError::Terminated))
    }

    pub fn try_get(&self) -> Option<CloudResult<CreatedVm>> {
        self.handle.try_get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// Kept for reuse until shortly before its slot ends.
    Saved { time_left: i64 },
    Destroyed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TerminationReport {
    pub destroyed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConnectorCounts {
    pub live: usize,
    pub reusable: usize,
    pub pending: usize,
}

#[derive(Debug)]
struct CostStats {
    mean_creation_ms: i64,
    created: u64,
    deleted_cost: f64,
    cost_per_hour: f64,
}

#[derive(Debug)]
pub struct Connector {
    provider: Arc<dyn CloudProvider>,
    settings: ConnectorSettings,
    clock: Arc<dyn Clock>,
    live: Mutex<HashMap<String, Vm>>,
    reusable: Mutex<Vec<Vm>>,
    pending: Mutex<HashMap<String, VmRequest>>,
    stats: Mutex<CostStats>,
    pool: WorkerPool,
    stopped: AtomicBool,
    wakeup: Notify,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    pub fn new(provider: Arc<dyn CloudProvider>, settings: ConnectorSettings, clock: Arc<dyn Clock>) -> Arc<Self> {
        let pool = WorkerPool::new(provider.name(), settings.creation_workers);
        Arc::new(Self {
            stats: Mutex::new(CostStats {
                mean_creation_ms: settings.initial_creation_time_ms,
                created: 0,
                deleted_cost: 0.0,
                cost_per_hour: 0.0,
            }),
            provider,
            settings,
            clock,
            live: Mutex::new(HashMap::new()),
            reusable: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            pool,
            stopped: AtomicBool::new(false),
            wakeup: Notify::new(),
            watcher: Mutex::new(None),
        })
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn billing(&self) -> BillingWindow {
        self.settings.billing
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    /// Start the background deadline watcher.
    pub async fn start_deadline_watcher(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_none() {
            *watcher = Some(tokio::spawn(run_deadline_watcher(self.clone())));
        }
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Obtain a VM for worker `name`: reuse a compatible reusable VM, or
    /// start an asynchronous creation. Returns at once; wait on the ticket
    /// for the VM.
    pub async fn turn_on(self: &Arc<Self>, name: &str, request: VmRequest) -> CloudResult<CreationTicket> {
        if self.is_stopped() {
            return Err(CloudError::Terminated);
        }
        let completion = Completion::new();
        let ticket = CreationTicket {
            name: name.to_string(),
            handle: completion.handle(),
        };

        if let Some(vm) = self.take_reusable(name, &request).await {
            let created = CreatedVm {
                name: name.to_string(),
                env_id: vm.env_id.clone(),
                description: vm.description.clone(),
                reused: true,
            };
            info!(vm = %name, env_id = %vm.env_id, "VM reused");
            self.live.lock().await.insert(name.to_string(), vm);
            completion.resolve(Ok(created));
            return Ok(ticket);
        }

        let image = self
            .provider
            .compatible_images(&request.resources)
            .into_iter()
            .find(|i| *i == request.image)
            .ok_or_else(|| CloudError::NoImage(request.image.clone()))?;
        let instance = self
            .provider
            .best_instance_type(&request.resources, &request.resources)
            .ok_or_else(|| CloudError::NoInstanceType(request.resources.to_string()))?;

        {
            let mut pending = self.pending.lock().await;
            if let Some(limit) = self.provider.max_vms() {
                let alive = self.live.lock().await.len() + self.reusable.lock().await.len() + pending.len();
                if alive >= limit as usize {
                    return Err(CloudError::LimitReached { limit });
                }
            }
            pending.insert(name.to_string(), request);
        }

        let this = self.clone();
        let vm_name = name.to_string();
        let requested_at = self.now();
        let submitted = self.pool.submit(Box::pin(async move {
            let result = this.create_vm(&vm_name, instance, image, requested_at).await;
            completion.resolve(result);
        }));
        if let Err(e) = submitted {
            self.pending.lock().await.remove(name);
            return Err(e);
        }
        debug!(vm = %name, "VM creation queued");
        Ok(ticket)
    }

    async fn take_reusable(&self, name: &str, request: &VmRequest) -> Option<Vm> {
        let mut reusable = self.reusable.lock().await;
        let index = reusable.iter().position(|vm| vm.description.can_host(request))?;
        let mut vm = reusable.remove(index);
        vm.to_delete = false;
        vm.description.name = name.to_string();
        Some(vm)
    }

    async fn create_vm(
        &self,
        name: &str,
        instance: InstanceType,
        image: String,
        requested_at: i64,
    ) -> CloudResult<CreatedVm> {
        let created = self.provider.create(name, &instance, &image).await;
        self.pending.lock().await.remove(name);
        let env_id = match created {
            Ok(env_id) => env_id,
            Err(e) => {
                warn!(vm = %name, error = %e, "VM creation failed");
                return Err(match e {
                    CloudError::CreationFailed { .. } => e,
                    other => CloudError::CreationFailed {
                        name: name.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        if self.is_stopped() {
            if let Err(e) = self.provider.destroy(&env_id).await {
                warn!(vm = %name, error = %e, "VM created during shutdown not destroyed");
            }
            return Err(CloudError::Terminated);
        }

        let ready = self.now();
        let creation_time = ready.saturating_sub(requested_at);
        let description = VmDescription {
            name: name.to_string(),
            image,
            instance,
        };
        {
            let mut stats = self.stats.lock().await;
            let n = stats.created as i64;
            stats.mean_creation_ms = (stats.mean_creation_ms * n + creation_time) / (n + 1);
            stats.created += 1;
            stats.cost_per_hour += self.settings.billing.cost_per_hour(description.instance.price_per_slot);
        }
        self.live.lock().await.insert(
            name.to_string(),
            Vm {
                env_id: env_id.clone(),
                description: description.clone(),
                request_time: requested_at,
                start_time: ready,
                creation_time,
                to_delete: false,
            },
        );
        self.wakeup.notify_one();
        info!(vm = %name, env_id = %env_id, creation_ms = creation_time, "VM created");
        Ok(CreatedVm {
            name: name.to_string(),
            env_id,
            description,
            reused: false,
        })
    }

    // ── Pause and destruction ──────────────────────────────────────

    /// The worker backed by `name` is idle. Keep the VM for reuse while
    /// its paid slot lasts, or destroy it when the slot is nearly over.
    pub async fn pause(&self, name: &str) -> CloudResult<PauseOutcome> {
        let mut vm = self
            .live
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| CloudError::UnknownVm(name.to_string()))?;
        let now = self.now();
        let billing = self.settings.billing;
        if billing.should_save(vm.elapsed(now)) {
            let time_left = vm.time_left(now, billing.slot_ms);
            vm.to_delete = true;
            self.reusable.lock().await.push(vm);
            self.wakeup.notify_one();
            info!(vm = %name, time_left_ms = time_left, "VM saved for reuse");
            Ok(PauseOutcome::Saved { time_left })
        } else {
            self.retire(vm, now).await;
            Ok(PauseOutcome::Destroyed)
        }
    }

    /// Destroy every reusable VM whose slot is about to end and return how
    /// long to sleep before the next check.
    pub async fn scan_deadlines(&self, now: i64) -> Duration {
        let billing = self.settings.billing;
        let mut due = Vec::new();
        let mut time_left = Vec::new();
        {
            let mut reusable = self.reusable.lock().await;
            let mut kept = Vec::with_capacity(reusable.len());
            for vm in reusable.drain(..) {
                let left = vm.time_left(now, billing.slot_ms);
                if vm.to_delete && billing.is_due(left) {
                    due.push(vm);
                } else {
                    time_left.push(left);
                    kept.push(vm);
                }
            }
            *reusable = kept;
        }
        time_left.extend(
            self.live
                .lock()
                .await
                .values()
                .map(|vm| vm.time_left(now, billing.slot_ms)),
        );

        for vm in due {
            self.retire(vm, now).await;
        }
        let mean = self.stats.lock().await.mean_creation_ms;
        billing.next_sleep(time_left, mean)
    }

    /// Fold the VM's cost into the total and hand it to the pool for
    /// destruction.
    async fn retire(&self, vm: Vm, now: i64) {
        let cost = self.account_destruction(&vm, now).await;
        info!(vm = %vm.name(), env_id = %vm.env_id, cost, "VM destroyed");
        let provider = self.provider.clone();
        let submitted = self.pool.submit(Box::pin(async move {
            if let Err(e) = provider.destroy(&vm.env_id).await {
                warn!(vm = %vm.name(), error = %e, "VM destruction failed");
            }
        }));
        if submitted.is_err() {
            warn!("destruction queued after shutdown");
        }
    }

    async fn account_destruction(&self, vm: &Vm, now: i64) -> f64 {
        let billing = self.settings.billing;
        let cost = vm.cost(now, billing.slot_ms);
        let mut stats = self.stats.lock().await;
        stats.deleted_cost += cost;
        stats.cost_per_hour =
            (stats.cost_per_hour - billing.cost_per_hour(vm.description.instance.price_per_slot)).max(0.0);
        cost
    }

    /// Stop the watcher, wait for queued jobs, then destroy every VM.
    /// Individual failures are reported, not fatal.
    pub async fn terminate_all(&self) -> TerminationReport {
        self.stopped.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
        if let Some(handle) = self.watcher.lock().await.take() {
            let _ = handle.await;
        }
        self.pool.shutdown().await;

        let mut vms: Vec<Vm> = self.live.lock().await.drain().map(|(_, vm)| vm).collect();
        vms.append(&mut *self.reusable.lock().await);
        vms.sort_by(|a, b| a.name().cmp(b.name()));

        let now = self.now();
        let mut report = TerminationReport::default();
        for vm in vms {
            self.account_destruction(&vm, now).await;
            match self.provider.destroy(&vm.env_id).await {
                Ok(()) => report.destroyed.push(vm.name().to_string()),
                Err(e) => {
                    warn!(vm = %vm.name(), error = %e, "VM destruction failed during shutdown");
                    report.failed.push((vm.name().to_string(), e.to_string()));
                }
            }
        }
        if let Err(e) = self.provider.terminate().await {
            warn!(provider = %self.provider.name(), error = %e, "provider termination failed");
        }
        info!(
            destroyed = report.destroyed.len(),
            failed = report.failed.len(),
            "connector terminated"
        );
        report
    }

    // ── Accounting ─────────────────────────────────────────────────

    /// Cost of destroyed VMs plus what the alive ones have accrued.
    pub async fn total_cost(&self) -> f64 {
        let now = self.now();
        let slot = self.settings.billing.slot_ms;
        let mut total = self.stats.lock().await.deleted_cost;
        total += self.live.lock().await.values().map(|vm| vm.cost(now, slot)).sum::<f64>();
        total += self.reusable.lock().await.iter().map(|vm| vm.cost(now, slot)).sum::<f64>();
        total
    }

    pub async fn current_cost_per_hour(&self) -> f64 {
        self.stats.lock().await.cost_per_hour
    }

    /// Expected time to get a new VM, from the running mean.
    pub async fn next_creation_time(&self) -> i64 {
        self.stats.lock().await.mean_creation_ms
    }

    pub async fn counts(&self) -> ConnectorCounts {
        ConnectorCounts {
            live: self.live.lock().await.len(),
            reusable: self.reusable.lock().await.len(),
            pending: self.pending.lock().await.len(),
        }
    }

    pub async fn vm(&self, name: &str) -> Option<Vm> {
        self.live.lock().await.get(name).cloned()
    }

    /// Human-readable state of the connector.
    pub async fn dump(&self) -> String {
        let counts = self.counts().await;
        format!(
            "  cloud {}: {} live, {} reusable, {} pending, {:.2}/h, total cost {:.2}\n",
            self.provider.name(),
            counts.live,
            counts.reusable,
            counts.pending,
            self.current_cost_per_hour().await,
            self.total_cost().await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedProvider;
    use warp_core::{ManualClock, ResourceDescription};

    fn settings() -> ConnectorSettings {
        ConnectorSettings {
            billing: BillingWindow {
                slot_ms: 60_000,
                safety_margin_ms: 10_000,
                min_poll: Duration::from_millis(1_000),
                max_poll: Duration::from_millis(30_000),
            },
            initial_creation_time_ms: 120_000,
            creation_workers: 2,
        }
    }

    fn setup(max_vms: Option<u32>) -> (Arc<Connector>, Arc<SimulatedProvider>, Arc<ManualClock>) {
        let provider = Arc::new(SimulatedProvider::new("sim", max_vms));
        let clock = Arc::new(ManualClock::new(0));
        let connector = Connector::new(provider.clone(), settings(), clock.clone());
        (connector, provider, clock)
    }

    fn request(cpus: u32) -> VmRequest {
        VmRequest::new("default", ResourceDescription::method(cpus, 1024))
    }

    #[tokio::test]
    async fn create_then_save_then_destroy_at_deadline() {
        let (c, provider, clock) = setup(None);
        let vm = c.turn_on("cloud-1", request(2)).await.unwrap().wait().await.unwrap();
        assert!(!vm.reused);
        assert_eq!(vm.description.instance.name, "small");
        assert_eq!(c.current_cost_per_hour().await, 120.0);
        assert_eq!(c.next_creation_time().await, 0);

        clock.set(20_000);
        assert_eq!(
            c.pause("cloud-1").await.unwrap(),
            PauseOutcome::Saved { time_left: 40_000 }
        );
        assert_eq!(c.counts().await.reusable, 1);

        assert_eq!(c.scan_deadlines(45_000).await, Duration::from_millis(5_000));
        assert_eq!(c.counts().await.reusable, 1);

        clock.set(51_000);
        c.scan_deadlines(51_000).await;
        assert_eq!(c.counts().await, ConnectorCounts::default());
        assert_eq!(c.total_cost().await, 2.0);
        assert_eq!(c.current_cost_per_hour().await, 0.0);

        c.terminate_all().await;
        assert_eq!(provider.destroyed().await, vec![vm.env_id]);
    }

    #[tokio::test]
    async fn pause_near_boundary_destroys_now() {
        let (c, _, clock) = setup(None);
        c.turn_on("cloud-1", request(2)).await.unwrap().wait().await.unwrap();
        clock.set(55_000);
        assert_eq!(c.pause("cloud-1").await.unwrap(), PauseOutcome::Destroyed);
        assert_eq!(c.counts().await, ConnectorCounts::default());
        assert!(matches!(c.pause("cloud-1").await, Err(CloudError::UnknownVm(_))));
    }

    #[tokio::test]
    async fn reusable_vm_serves_compatible_request() {
        let (c, provider, clock) = setup(None);
        let first = c.turn_on("cloud-1", request(4)).await.unwrap().wait().await.unwrap();
        clock.set(10_000);
        c.pause("cloud-1").await.unwrap();

        let other_image = VmRequest::new("gpu", ResourceDescription::method(1, 1024));
        assert!(matches!(
            c.turn_on("cloud-2", other_image).await,
            Err(CloudError::NoImage(_))
        ));

        let again = c.turn_on("cloud-3", request(2)).await.unwrap().wait().await.unwrap();
        assert!(again.reused);
        assert_eq!(again.env_id, first.env_id);
        assert_eq!(again.name, "cloud-3");
        assert_eq!(c.counts().await.live, 1);
        assert_eq!(provider.created().await, 1);
    }

    #[tokio::test]
    async fn limit_counts_pending_and_reusable() {
        let (c, _, _) = setup(Some(1));
        let ticket = c.turn_on("cloud-1", request(1)).await.unwrap();
        assert_eq!(
            c.turn_on("cloud-2", request(1)).await.unwrap_err(),
            CloudError::LimitReached { limit: 1 }
        );
        ticket.wait().await.unwrap();
    }

    #[tokio::test]
    async fn creation_failure_reported_to_caller() {
        let (c, provider, _) = setup(None);
        provider.fail_next_creations(1);
        let err = c.turn_on("cloud-1", request(1)).await.unwrap().wait().await.unwrap_err();
        assert!(matches!(err, CloudError::CreationFailed { .. }));
        assert_eq!(c.counts().await, ConnectorCounts::default());

        assert!(c.turn_on("cloud-1", request(1)).await.unwrap().wait().await.is_ok());
    }

    #[tokio::test]
    async fn terminate_all_is_best_effort() {
        let (c, provider, _) = setup(None);
        c.start_deadline_watcher().await;
        let a = c.turn_on("cloud-a", request(1)).await.unwrap().wait().await.unwrap();
        c.turn_on("cloud-b", request(1)).await.unwrap().wait().await.unwrap();
        provider.fail_destroy(&a.env_id).await;

        let report = c.terminate_all().await;
        assert_eq!(report.destroyed, vec!["cloud-b".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "cloud-a");
        assert!(provider.is_terminated());
        assert!(matches!(
            c.turn_on("cloud-c", request(1)).await,
            Err(CloudError::Terminated)
        ));
    }

    #[tokio::test]
    async fn total_cost_never_decreases() {
        let (c, _, clock) = setup(None);
        c.turn_on("cloud-1", request(1)).await.unwrap().wait().await.unwrap();
        let mut last = 0.0;
        for t in [1, 30_000, 59_000, 61_000, 70_000] {
            clock.set(t);
            if t == 59_000 {
                c.pause("cloud-1").await.unwrap();
            }
            let total = c.total_cost().await;
            assert!(total >= last);
            last = total;
        }
        assert_eq!(last, 2.0);
    }
}
