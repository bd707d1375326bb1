//! In-process provider used by `warpd` when no real cloud is configured,
//! and by tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;
use warp_core::ResourceDescription;
use warp_core::config::CloudConfig;

use crate::error::{CloudError, CloudResult};
use crate::provider::{BoxFuture, CloudProvider, InstanceType};

#[derive(Debug)]
pub struct SimulatedProvider {
    name: String,
    max_vms: Option<u32>,
    images: Vec<String>,
    instance_types: Vec<InstanceType>,
    latency: Duration,
    next_id: AtomicU64,
    failing_creations: AtomicU32,
    failing_destroys: Mutex<HashSet<String>>,
    active: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
    terminated: AtomicBool,
}

impl SimulatedProvider {
    /// A provider with a `default` image and two instance types.
    pub fn new(name: &str, max_vms: Option<u32>) -> Self {
        Self::with_catalog(
            name,
            max_vms,
            vec!["default".to_string()],
            vec![
                InstanceType {
                    name: "small".into(),
                    description: ResourceDescription::method(4, 4096),
                    price_per_slot: 2.0,
                },
                InstanceType {
                    name: "large".into(),
                    description: ResourceDescription::method(16, 16384),
                    price_per_slot: 6.0,
                },
            ],
            Duration::ZERO,
        )
    }

    pub fn from_config(config: &CloudConfig) -> Self {
        let instance_types = config
            .instance_types
            .iter()
            .map(|t| InstanceType {
                name: t.name.clone(),
                description: t.description(),
                price_per_slot: t.price_per_slot,
            })
            .collect();
        Self::with_catalog(
            &config.provider,
            config.max_vms,
            config.images.clone(),
            instance_types,
            config.creation_latency_duration(),
        )
    }

    fn with_catalog(
        name: &str,
        max_vms: Option<u32>,
        images: Vec<String>,
        instance_types: Vec<InstanceType>,
        latency: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            max_vms,
            images,
            instance_types,
            latency,
            next_id: AtomicU64::new(1),
            failing_creations: AtomicU32::new(0),
            failing_destroys: Mutex::new(HashSet::new()),
            active: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn instance_types(&self) -> &[InstanceType] {
        &self.instance_types
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Make the next `n` creations fail.
    pub fn fail_next_creations(&self, n: u32) {
        self.failing_creations.store(n, Ordering::SeqCst);
    }

    /// Make every destruction of `env_id` fail.
    pub async fn fail_destroy(&self, env_id: &str) {
        self.failing_destroys.lock().await.insert(env_id.to_string());
    }

    /// Number of VMs ever created.
    pub async fn created(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    pub async fn active(&self) -> Vec<String> {
        self.active.lock().await.clone()
    }

    pub async fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().await.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl CloudProvider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_vms(&self) -> Option<u32> {
        self.max_vms
    }

    fn compatible_images(&self, _constraints: &ResourceDescription) -> Vec<String> {
        self.images.clone()
    }

    fn best_instance_type(
        &self,
        amount: &ResourceDescription,
        constraints: &ResourceDescription,
    ) -> Option<InstanceType> {
        self.instance_types
            .iter()
            .filter(|t| t.description.can_host(amount) && t.description.can_host(constraints))
            .min_by(|a, b| {
                a.price_per_slot
                    .total_cmp(&b.price_per_slot)
                    .then_with(|| a.name.cmp(&b.name))
            })
            .cloned()
    }

    fn create<'a>(&'a self, name: &'a str, instance: &'a InstanceType, image: &'a str) -> BoxFuture<'a, CloudResult<String>> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let failing = self
                .failing_creations
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(CloudError::CreationFailed {
                    name: name.to_string(),
                    reason: "simulated failure".into(),
                });
            }
            let env_id = format!("sim-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            debug!(vm = %name, env_id = %env_id, instance = %instance.name, image, "simulated VM up");
            self.active.lock().await.push(env_id.clone());
            Ok(env_id)
        })
    }

    fn destroy<'a>(&'a self, env_id: &'a str) -> BoxFuture<'a, CloudResult<()>> {
        Box::pin(async move {
            if self.failing_destroys.lock().await.contains(env_id) {
                return Err(CloudError::DestroyFailed {
                    vm: env_id.to_string(),
                    reason: "simulated failure".into(),
                });
            }
            let mut active = self.active.lock().await;
            let index = active
                .iter()
                .position(|id| id == env_id)
                .ok_or_else(|| CloudError::UnknownVm(env_id.to_string()))?;
            active.remove(index);
            self.destroyed.lock().await.push(env_id.to_string());
            Ok(())
        })
    }

    fn terminate(&self) -> BoxFuture<'_, CloudResult<()>> {
        Box::pin(async move {
            self.terminated.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::config::InstanceTypeConfig;

    #[test]
    fn cheapest_fitting_instance() {
        let p = SimulatedProvider::new("sim", None);
        let req = ResourceDescription::method(2, 1024);
        assert_eq!(p.best_instance_type(&req, &req).unwrap().name, "small");
        let big = ResourceDescription::method(8, 1024);
        assert_eq!(p.best_instance_type(&big, &big).unwrap().name, "large");
        let huge = ResourceDescription::cpus(64);
        assert!(p.best_instance_type(&huge, &huge).is_none());
    }

    #[test]
    fn catalog_from_config() {
        let config = CloudConfig {
            provider: "lab".into(),
            instance_types: vec![InstanceTypeConfig {
                name: "m1".into(),
                processors: 2,
                gpus: 0,
                memory_mb: 2048,
                storage_mb: 0,
                price_per_slot: 0.5,
            }],
            ..Default::default()
        };
        let p = SimulatedProvider::from_config(&config);
        assert_eq!(p.name(), "lab");
        assert_eq!(p.max_vms(), Some(8));
        assert_eq!(p.instance_types()[0].description, ResourceDescription::method(2, 2048));
    }

    #[tokio::test]
    async fn create_and_destroy() {
        let p = SimulatedProvider::new("sim", None);
        let t = p.instance_types()[0].clone();
        let id = p.create("vm", &t, "default").await.unwrap();
        assert_eq!(id, "sim-1");
        assert_eq!(p.active().await, vec!["sim-1".to_string()]);
        p.destroy(&id).await.unwrap();
        assert!(matches!(p.destroy(&id).await, Err(CloudError::UnknownVm(_))));
        assert_eq!(p.destroyed().await, vec!["sim-1".to_string()]);
    }
}
