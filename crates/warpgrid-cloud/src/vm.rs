//! Leased VMs and the requests that produce them.

use serde::{Deserialize, Serialize};
use warp_core::ResourceDescription;

use crate::provider::InstanceType;

/// What a caller asks the connector for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRequest {
    pub image: String,
    pub resources: ResourceDescription,
}

impl VmRequest {
    pub fn new(image: &str, resources: ResourceDescription) -> Self {
        Self {
            image: image.to_string(),
            resources,
        }
    }
}

/// What a VM is: the worker it backs, its image and its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmDescription {
    pub name: String,
    pub image: String,
    pub instance: InstanceType,
}

impl VmDescription {
    /// Same image name and enough room for the requested resources.
    pub fn can_host(&self, request: &VmRequest) -> bool {
        self.image == request.image && self.instance.description.can_host(&request.resources)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub env_id: String,
    pub description: VmDescription,
    pub request_time: i64,
    /// When billing started.
    pub start_time: i64,
    /// Milliseconds from request to ready.
    pub creation_time: i64,
    /// Idle and kept only until its paid slot runs out.
    pub to_delete: bool,
}

impl Vm {
    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn elapsed(&self, now: i64) -> i64 {
        now.saturating_sub(self.start_time).max(0)
    }

    /// Milliseconds left in the current billing slot.
    pub fn time_left(&self, now: i64, slot: i64) -> i64 {
        if slot <= 0 {
            return i64::MAX;
        }
        slot - self.elapsed(now) % slot
    }

    /// `ceil(elapsed / slot)` slots at the instance price. Without a slot
    /// every elapsed millisecond is billed.
    pub fn cost(&self, now: i64, slot: i64) -> f64 {
        let price = self.description.instance.price_per_slot;
        let elapsed = self.elapsed(now);
        if slot <= 0 {
            return elapsed as f64 * price;
        }
        let slots = elapsed / slot + i64::from(elapsed % slot != 0);
        slots as f64 * price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(start: i64) -> Vm {
        Vm {
            env_id: "sim-1".into(),
            description: VmDescription {
                name: "cloud-1".into(),
                image: "default".into(),
                instance: InstanceType {
                    name: "small".into(),
                    description: ResourceDescription::method(4, 4096),
                    price_per_slot: 2.0,
                },
            },
            request_time: start,
            start_time: start,
            creation_time: 0,
            to_delete: false,
        }
    }

    #[test]
    fn billing_slots() {
        let v = vm(1_000);
        assert_eq!(v.cost(1_000, 60_000), 0.0);
        assert_eq!(v.cost(1_001, 60_000), 2.0);
        assert_eq!(v.cost(61_000, 60_000), 2.0);
        assert_eq!(v.cost(61_001, 60_000), 4.0);
        assert_eq!(v.time_left(21_000, 60_000), 40_000);
        assert_eq!(v.time_left(61_000, 60_000), 60_000);
    }

    #[test]
    fn unslotted_billing_counts_milliseconds() {
        let v = vm(1_000);
        assert_eq!(v.cost(1_000, 0), 0.0);
        assert_eq!(v.cost(1_250, 0), 500.0);
        assert_eq!(v.time_left(1_250, 0), i64::MAX);
    }

    #[test]
    fn reuse_needs_same_image_and_room() {
        let d = vm(0).description;
        assert!(d.can_host(&VmRequest::new("default", ResourceDescription::method(2, 1024))));
        assert!(!d.can_host(&VmRequest::new("other", ResourceDescription::method(2, 1024))));
        assert!(!d.can_host(&VmRequest::new("default", ResourceDescription::method(8, 1024))));
    }
}
