//! The cloud provider seam.
//!
//! A [`CloudProvider`] is consumed, not owned: it knows which images and
//! instance types exist and performs the actual create/destroy calls. The
//! [`Connector`](crate::Connector) decides when to call it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use warp_core::ResourceDescription;

use crate::error::CloudResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One leasable machine shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    pub name: String,
    pub description: ResourceDescription,
    pub price_per_slot: f64,
}

pub trait CloudProvider: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Hard limit on VMs alive at once, if the provider has one.
    fn max_vms(&self) -> Option<u32>;

    /// Images able to run work with the given constraints.
    fn compatible_images(&self, constraints: &ResourceDescription) -> Vec<String>;

    /// Cheapest instance type covering `amount` under `constraints`.
    fn best_instance_type(
        &self,
        amount: &ResourceDescription,
        constraints: &ResourceDescription,
    ) -> Option<InstanceType>;

    /// Boot a VM and return its provider id once it is usable.
    fn create<'a>(&'a self, name: &'a str, instance: &'a InstanceType, image: &'a str) -> BoxFuture<'a, CloudResult<String>>;

    fn destroy<'a>(&'a self, env_id: &'a str) -> BoxFuture<'a, CloudResult<()>>;

    /// Release provider-level resources after every VM is gone.
    fn terminate(&self) -> BoxFuture<'_, CloudResult<()>>;
}
