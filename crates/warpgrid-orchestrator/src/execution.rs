//! The execution layer seam: where worker capacity comes from.

use std::collections::BTreeMap;

use warp_core::ResourceDescription;
use warp_core::config::WorkerConfig;
use warpgrid_scheduler::IdleRates;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Capacity snapshot of one worker, taken when it joins the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCapacity {
    pub description: ResourceDescription,
    pub idle: IdleRates,
}

/// Provided by whatever actually runs actions on workers.
pub trait ExecutionLayer: Send + Sync {
    fn obtain_resource_handle(&self, worker: &str) -> OrchestratorResult<WorkerCapacity>;

    /// Workers known to the layer, in a stable order.
    fn worker_names(&self) -> Vec<String>;
}

/// Workers listed in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkers {
    workers: BTreeMap<String, WorkerCapacity>,
}

impl StaticWorkers {
    pub fn from_config(workers: &[WorkerConfig]) -> Self {
        let workers = workers
            .iter()
            .map(|w| {
                (
                    w.name.clone(),
                    WorkerCapacity {
                        description: w.description(),
                        idle: IdleRates {
                            power: w.idle_power,
                            price: w.idle_price,
                        },
                    },
                )
            })
            .collect();
        Self { workers }
    }

    pub fn insert(&mut self, name: &str, capacity: WorkerCapacity) {
        self.workers.insert(name.to_string(), capacity);
    }
}

impl ExecutionLayer for StaticWorkers {
    fn obtain_resource_handle(&self, worker: &str) -> OrchestratorResult<WorkerCapacity> {
        self.workers
            .get(worker)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownWorker(worker.to_string()))
    }

    fn worker_names(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_from_config() {
        let workers = StaticWorkers::from_config(&[WorkerConfig {
            name: "svc".into(),
            processors: 0,
            gpus: 0,
            memory_mb: 0,
            storage_mb: 0,
            slots: Some(3),
            idle_power: 12.5,
            idle_price: 0.0,
        }]);
        let capacity = workers.obtain_resource_handle("svc").unwrap();
        assert_eq!(capacity.description, ResourceDescription::slots(3));
        assert_eq!(capacity.idle.power, 12.5);
        assert_eq!(workers.worker_names(), vec!["svc".to_string()]);
        assert!(matches!(
            workers.obtain_resource_handle("nope"),
            Err(OrchestratorError::UnknownWorker(_))
        ));
    }
}
