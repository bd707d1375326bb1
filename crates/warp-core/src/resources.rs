//! Resource capacity vectors.
//!
//! A [`ResourceDescription`] describes either what a worker offers or what an
//! implementation needs. Processors, GPUs and memory are *dynamic*: they are
//! consumed while an action runs and come back when it ends. Storage is
//! *static*: it only constrains where an implementation may run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capacity of a method worker, or the requirement of a method implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodResources {
    pub processors: u32,
    pub gpus: u32,
    pub memory_mb: u64,
    pub storage_mb: u64,
}

/// Capacity of a service endpoint, counted in concurrent invocation slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceResources {
    pub slots: u32,
}

/// A typed capacity vector.
///
/// Descriptions of different kinds never host each other and never
/// subtract from each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDescription {
    Method(MethodResources),
    Service(ServiceResources),
}

impl Default for ResourceDescription {
    fn default() -> Self {
        ResourceDescription::Method(MethodResources::default())
    }
}

/// Subtract up to `wanted` from `available`, returning what was actually taken.
fn take<T>(available: &mut T, wanted: T) -> T
where
    T: Copy + Ord + std::ops::SubAssign,
{
    let taken = (*available).min(wanted);
    *available -= taken;
    taken
}

impl ResourceDescription {
    /// A method description with only processors set.
    pub fn cpus(processors: u32) -> Self {
        ResourceDescription::Method(MethodResources {
            processors,
            ..Default::default()
        })
    }

    pub fn method(processors: u32, memory_mb: u64) -> Self {
        ResourceDescription::Method(MethodResources {
            processors,
            memory_mb,
            ..Default::default()
        })
    }

    pub fn slots(slots: u32) -> Self {
        ResourceDescription::Service(ServiceResources { slots })
    }

    /// An all-zero description of the same kind.
    pub fn empty_like(&self) -> Self {
        match self {
            ResourceDescription::Method(_) => {
                ResourceDescription::Method(MethodResources::default())
            }
            ResourceDescription::Service(_) => {
                ResourceDescription::Service(ServiceResources::default())
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceDescription::Method(_) => "method",
            ResourceDescription::Service(_) => "service",
        }
    }

    /// Whether `self` contains `req` on every dimension, static ones included.
    pub fn can_host(&self, req: &ResourceDescription) -> bool {
        match (self, req) {
            (ResourceDescription::Method(a), ResourceDescription::Method(b)) => {
                a.processors >= b.processors
                    && a.gpus >= b.gpus
                    && a.memory_mb >= b.memory_mb
                    && a.storage_mb >= b.storage_mb
            }
            (ResourceDescription::Service(a), ResourceDescription::Service(b)) => {
                a.slots >= b.slots
            }
            _ => false,
        }
    }

    /// Whether `self` contains the dynamic part of `req`.
    pub fn can_host_dynamic(&self, req: &ResourceDescription) -> bool {
        match (self, req) {
            (ResourceDescription::Method(a), ResourceDescription::Method(b)) => {
                a.processors >= b.processors && a.gpus >= b.gpus && a.memory_mb >= b.memory_mb
            }
            (ResourceDescription::Service(a), ResourceDescription::Service(b)) => {
                a.slots >= b.slots
            }
            _ => false,
        }
    }

    /// Subtract the dynamic part of `req`, clipping at zero.
    ///
    /// Returns the unmet remainder: the part of `req` that `self` could not
    /// cover. An empty remainder means the reduction was complete.
    pub fn reduce(&mut self, req: &ResourceDescription) -> ResourceDescription {
        let mut remainder = req.clone();
        self.take_common(&mut remainder);
        remainder
    }

    /// Take from `self` as much of `wanted` as possible.
    ///
    /// Both sides are decreased by the amount taken, which is returned.
    pub fn take_common(&mut self, wanted: &mut ResourceDescription) -> ResourceDescription {
        match (self, wanted) {
            (ResourceDescription::Method(a), ResourceDescription::Method(b)) => {
                let used = MethodResources {
                    processors: take(&mut a.processors, b.processors),
                    gpus: take(&mut a.gpus, b.gpus),
                    memory_mb: take(&mut a.memory_mb, b.memory_mb),
                    storage_mb: 0,
                };
                b.processors -= used.processors;
                b.gpus -= used.gpus;
                b.memory_mb -= used.memory_mb;
                ResourceDescription::Method(used)
            }
            (ResourceDescription::Service(a), ResourceDescription::Service(b)) => {
                let used = ServiceResources {
                    slots: take(&mut a.slots, b.slots),
                };
                b.slots -= used.slots;
                ResourceDescription::Service(used)
            }
            (this, _) => this.empty_like(),
        }
    }

    /// Add the dynamic part of `other` back.
    pub fn increase(&mut self, other: &ResourceDescription) {
        match (self, other) {
            (ResourceDescription::Method(a), ResourceDescription::Method(b)) => {
                a.processors = a.processors.saturating_add(b.processors);
                a.gpus = a.gpus.saturating_add(b.gpus);
                a.memory_mb = a.memory_mb.saturating_add(b.memory_mb);
            }
            (ResourceDescription::Service(a), ResourceDescription::Service(b)) => {
                a.slots = a.slots.saturating_add(b.slots);
            }
            _ => {}
        }
    }

    /// No dynamic capacity left.
    pub fn is_useless(&self) -> bool {
        match self {
            ResourceDescription::Method(m) => m.processors == 0 && m.gpus == 0 && m.memory_mb == 0,
            ResourceDescription::Service(s) => s.slots == 0,
        }
    }

    /// How many copies of `req` fit side by side in `self`.
    ///
    /// Dimensions that `req` does not use do not limit the count. A
    /// requirement that uses nothing fits an unbounded number of times.
    pub fn simultaneous_capacity(&self, req: &ResourceDescription) -> u32 {
        fn ratio(have: u64, need: u64) -> u64 {
            if need == 0 { u64::MAX } else { have / need }
        }
        let count = match (self, req) {
            (ResourceDescription::Method(a), ResourceDescription::Method(b)) => {
                if a.storage_mb < b.storage_mb {
                    0
                } else {
                    ratio(a.processors.into(), b.processors.into())
                        .min(ratio(a.gpus.into(), b.gpus.into()))
                        .min(ratio(a.memory_mb, b.memory_mb))
                }
            }
            (ResourceDescription::Service(a), ResourceDescription::Service(b)) => {
                ratio(a.slots.into(), b.slots.into())
            }
            _ => 0,
        };
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for ResourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceDescription::Method(m) => {
                write!(f, "{}cpu", m.processors)?;
                if m.gpus > 0 {
                    write!(f, "/{}gpu", m.gpus)?;
                }
                if m.memory_mb > 0 {
                    write!(f, "/{}MB", m.memory_mb)?;
                }
                Ok(())
            }
            ResourceDescription::Service(s) => write!(f, "{}slots", s.slots),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_clips_and_reports_remainder() {
        let mut worker = ResourceDescription::method(4, 1024);
        let rest = worker.reduce(&ResourceDescription::method(3, 512));
        assert!(rest.is_useless());
        assert_eq!(worker, ResourceDescription::method(1, 512));

        let rest = worker.reduce(&ResourceDescription::method(2, 256));
        assert_eq!(worker, ResourceDescription::method(0, 256));
        assert_eq!(rest, ResourceDescription::cpus(1));
    }

    #[test]
    fn take_common_decreases_both_sides() {
        let mut gap = ResourceDescription::cpus(2);
        let mut wanted = ResourceDescription::cpus(3);
        let used = gap.take_common(&mut wanted);
        assert_eq!(used, ResourceDescription::cpus(2));
        assert!(gap.is_useless());
        assert_eq!(wanted, ResourceDescription::cpus(1));
    }

    #[test]
    fn kinds_do_not_mix() {
        let mut worker = ResourceDescription::cpus(4);
        assert!(!worker.can_host(&ResourceDescription::slots(1)));
        let rest = worker.reduce(&ResourceDescription::slots(1));
        assert_eq!(rest, ResourceDescription::slots(1));
        assert_eq!(worker, ResourceDescription::cpus(4));
    }

    #[test]
    fn storage_is_static() {
        let worker = ResourceDescription::Method(MethodResources {
            processors: 2,
            storage_mb: 100,
            ..Default::default()
        });
        let req = ResourceDescription::Method(MethodResources {
            processors: 1,
            storage_mb: 200,
            ..Default::default()
        });
        assert!(!worker.can_host(&req));
        assert!(worker.can_host_dynamic(&req));

        let mut w = worker.clone();
        w.reduce(&req);
        assert_eq!(
            w,
            ResourceDescription::Method(MethodResources {
                processors: 1,
                storage_mb: 100,
                ..Default::default()
            })
        );
    }

    #[test]
    fn increase_restores() {
        let mut worker = ResourceDescription::method(4, 1024);
        let req = ResourceDescription::method(3, 1000);
        worker.reduce(&req);
        worker.increase(&req);
        assert_eq!(worker, ResourceDescription::method(4, 1024));
    }

    #[test]
    fn simultaneous_capacity_counts_copies() {
        let worker = ResourceDescription::method(4, 1000);
        assert_eq!(worker.simultaneous_capacity(&ResourceDescription::cpus(2)), 2);
        assert_eq!(worker.simultaneous_capacity(&ResourceDescription::method(1, 300)), 3);
        assert_eq!(worker.simultaneous_capacity(&ResourceDescription::cpus(5)), 0);
        assert_eq!(worker.simultaneous_capacity(&ResourceDescription::slots(1)), 0);
    }

    #[test]
    fn serde_tagged() {
        let json = serde_json::to_string(&ResourceDescription::slots(3)).unwrap();
        assert_eq!(json, r#"{"kind":"service","slots":3}"#);
        let back: ResourceDescription =
            serde_json::from_str(r#"{"kind":"method","processors":2}"#).unwrap();
        assert_eq!(back, ResourceDescription::cpus(2));
    }
}
