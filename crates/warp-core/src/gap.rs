//! Idle windows on a worker's timeline.

use crate::resources::ResourceDescription;
use crate::types::ActionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Start of a gap that has always been free.
pub const START_OF_TIME: i64 = i64::MIN;
/// End of a gap that never closes, and the expected time of anything blocked.
pub const END_OF_TIME: i64 = i64::MAX;

/// A window `[start, end)` during which `resources` are idle on one worker.
///
/// `origin` is the action whose completion frees the resources; `None`
/// means they were free from the start. `capacity` is the most the gap has
/// held since it was created, so `resources` is always contained in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub start: i64,
    pub end: i64,
    pub origin: Option<ActionId>,
    pub resources: ResourceDescription,
    pub capacity: ResourceDescription,
}

impl Gap {
    pub fn new(
        start: i64,
        end: i64,
        origin: Option<ActionId>,
        resources: ResourceDescription,
    ) -> Self {
        Self {
            start,
            end,
            origin,
            capacity: resources.clone(),
            resources,
        }
    }

    /// The whole worker, free forever.
    pub fn free(resources: ResourceDescription) -> Self {
        Self::new(START_OF_TIME, END_OF_TIME, None, resources)
    }

    /// An unbounded gap opened when `origin` ends.
    pub fn after(origin: ActionId, start: i64, resources: ResourceDescription) -> Self {
        Self::new(start, END_OF_TIME, Some(origin), resources)
    }

    pub fn is_useless(&self) -> bool {
        self.resources.is_useless()
    }

    /// Add resources freed by the same origin.
    pub fn merge(&mut self, resources: &ResourceDescription) {
        self.resources.increase(resources);
        if !self.capacity.can_host_dynamic(&self.resources) {
            self.capacity = self.resources.clone();
        }
    }
}

pub(crate) fn fmt_time(f: &mut fmt::Formatter<'_>, t: i64) -> fmt::Result {
    match t {
        START_OF_TIME => write!(f, "-inf"),
        END_OF_TIME => write!(f, "+inf"),
        t => write!(f, "{t}"),
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        fmt_time(f, self.start)?;
        write!(f, ", ")?;
        fmt_time(f, self.end)?;
        write!(f, ") {} of {}", self.resources, self.capacity)?;
        match self.origin {
            Some(origin) => write!(f, " after {origin}"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_gap_spans_all_time() {
        let gap = Gap::free(ResourceDescription::cpus(4));
        assert_eq!((gap.start, gap.end), (START_OF_TIME, END_OF_TIME));
        assert_eq!(gap.to_string(), "[-inf, +inf) 4cpu of 4cpu");
    }

    #[test]
    fn merge_tracks_high_water_mark() {
        let mut gap = Gap::free(ResourceDescription::cpus(4));
        let mut wanted = ResourceDescription::cpus(3);
        gap.resources.take_common(&mut wanted);
        gap.merge(&ResourceDescription::cpus(3));
        assert_eq!(gap.capacity, ResourceDescription::cpus(4));
    }

    #[test]
    fn merge_grows_capacity() {
        let mut gap = Gap::after(ActionId(3), 50, ResourceDescription::cpus(1));
        gap.merge(&ResourceDescription::cpus(2));
        assert_eq!(gap.resources, ResourceDescription::cpus(3));
        assert_eq!(gap.capacity, ResourceDescription::cpus(3));
        assert_eq!(gap.to_string(), "[50, +inf) 3cpu of 3cpu after #3");
    }
}
