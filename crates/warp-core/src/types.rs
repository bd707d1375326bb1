//! Shared identifiers and task descriptions used across WarpGrid crates.

use crate::resources::ResourceDescription;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one submitted action, unique per orchestrator instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a core element (a task signature).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreId(pub u32);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Identifies one implementation of one core element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImplementationId {
    pub core: CoreId,
    pub index: u32,
}

impl ImplementationId {
    pub fn new(core: u32, index: u32) -> Self {
        Self {
            core: CoreId(core),
            index,
        }
    }
}

impl fmt::Display for ImplementationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.core.0, self.index)
    }
}

/// One executable variant of a core element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub id: ImplementationId,
    pub signature: String,
    pub requirements: ResourceDescription,
}

impl Implementation {
    pub fn new(id: ImplementationId, signature: &str, requirements: ResourceDescription) -> Self {
        Self {
            id,
            signature: signature.to_string(),
            requirements,
        }
    }
}

/// A logical task signature and its alternative implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreElement {
    pub id: CoreId,
    pub signature: String,
    pub implementations: Vec<Implementation>,
}

impl CoreElement {
    /// A core element with one implementation per requirement, indexed in order.
    pub fn new(id: u32, signature: &str, requirements: Vec<ResourceDescription>) -> Self {
        let implementations = requirements
            .into_iter()
            .enumerate()
            .map(|(index, req)| {
                Implementation::new(
                    ImplementationId::new(id, index as u32),
                    &format!("{signature}#{index}"),
                    req,
                )
            })
            .collect();
        Self {
            id: CoreId(id),
            signature: signature.to_string(),
            implementations,
        }
    }
}

/// What the scheduler optimises once priorities are equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    /// Earliest expected completion.
    #[default]
    Time,
    /// Lowest monetary cost.
    Cost,
    /// Lowest energy.
    Energy,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Objective::Time => "time",
            Objective::Cost => "cost",
            Objective::Energy => "energy",
        };
        write!(f, "{s}")
    }
}
