//! Orchestrator TOML configuration.
//!
//! Every section is optional. Durations are strings such as `"500ms"`,
//! `"30s"`, `"2m"` or `"1h"`.

use crate::profile::Profile;
use crate::resources::{MethodResources, ResourceDescription, ServiceResources};
use crate::types::{CoreElement, CoreId, Implementation, ImplementationId, Objective};
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerConfig,
    pub optimizer: OptimizerConfig,
    pub cloud: Option<CloudConfig>,
    pub profiles: ProfilesConfig,
    pub workers: Vec<WorkerConfig>,
    pub cores: Vec<CoreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub objective: Objective,
    /// Added to the data-ready time per data predecessor placed elsewhere.
    pub data_transfer_delay: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Time,
            data_transfer_delay: "200ms".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub interval: String,
    /// Penalty applied to a migration candidate's resource-free and data-ready times.
    pub move_penalty: String,
    /// Cloud workers idle for this long are handed back to the connector.
    pub idle_timeout: String,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "1s".to_string(),
            move_penalty: "2500ms".to_string(),
            idle_timeout: "60s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub provider: String,
    /// Hard limit on live VMs; `None` means unlimited.
    pub max_vms: Option<u32>,
    pub creation_workers: usize,
    /// Billing slot size.
    pub slot: String,
    /// Reusable VMs are destroyed once less than this is left in their slot.
    pub safety_margin: String,
    pub min_poll: String,
    pub max_poll: String,
    /// Seed for the running mean of VM creation times.
    pub initial_creation_time: String,
    /// Simulated creation latency, only used by the simulated provider.
    pub creation_latency: String,
    pub idle_power: f64,
    pub idle_price: f64,
    pub images: Vec<String>,
    pub instance_types: Vec<InstanceTypeConfig>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: "simulated".to_string(),
            max_vms: Some(8),
            creation_workers: 4,
            slot: "1h".to_string(),
            safety_margin: "30s".to_string(),
            min_poll: "1s".to_string(),
            max_poll: "2m".to_string(),
            initial_creation_time: "2m".to_string(),
            creation_latency: "0ms".to_string(),
            idle_power: 0.0,
            idle_price: 0.0,
            images: vec!["default".to_string()],
            instance_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceTypeConfig {
    pub name: String,
    pub processors: u32,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub storage_mb: u64,
    pub price_per_slot: f64,
}

impl InstanceTypeConfig {
    pub fn description(&self) -> ResourceDescription {
        ResourceDescription::Method(MethodResources {
            processors: self.processors,
            gpus: self.gpus,
            memory_mb: self.memory_mb,
            storage_mb: self.storage_mb,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// redb file; in-memory when absent.
    pub path: Option<PathBuf>,
}

/// A worker known at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    #[serde(default)]
    pub processors: u32,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub storage_mb: u64,
    /// Set for service workers; method fields are then ignored.
    pub slots: Option<u32>,
    #[serde(default)]
    pub idle_power: f64,
    #[serde(default)]
    pub idle_price: f64,
}

impl WorkerConfig {
    pub fn description(&self) -> ResourceDescription {
        describe(self.processors, self.gpus, self.memory_mb, self.storage_mb, self.slots)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub signature: String,
    pub implementations: Vec<ImplementationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplementationConfig {
    pub processors: u32,
    pub gpus: u32,
    pub memory_mb: u64,
    pub storage_mb: u64,
    pub slots: Option<u32>,
    /// Expected duration before anything was measured.
    pub avg_time: Option<String>,
    pub power: f64,
    pub price: f64,
}

impl ImplementationConfig {
    pub fn requirements(&self) -> ResourceDescription {
        describe(self.processors, self.gpus, self.memory_mb, self.storage_mb, self.slots)
    }

    /// Initial profile used on every worker until real executions are recorded.
    pub fn seed_profile(&self) -> Profile {
        let avg = self
            .avg_time
            .as_deref()
            .and_then(parse_duration)
            .map(|d| d.as_millis() as i64);
        let base = match avg {
            Some(avg) => Profile::with_average(avg),
            None => Profile::default(),
        };
        base.with_power(self.power).with_price(self.price)
    }
}

fn describe(
    processors: u32,
    gpus: u32,
    memory_mb: u64,
    storage_mb: u64,
    slots: Option<u32>,
) -> ResourceDescription {
    match slots {
        Some(slots) => ResourceDescription::Service(ServiceResources { slots }),
        None => ResourceDescription::Method(MethodResources {
            processors,
            gpus,
            memory_mb,
            storage_mb,
        }),
    }
}

impl CoreConfig {
    /// Build the core element registered under `id`.
    pub fn to_core_element(&self, id: u32) -> CoreElement {
        CoreElement {
            id: CoreId(id),
            signature: self.signature.clone(),
            implementations: self
                .implementations
                .iter()
                .enumerate()
                .map(|(index, imp)| {
                    Implementation::new(
                        ImplementationId::new(id, index as u32),
                        &format!("{}#{index}", self.signature),
                        imp.requirements(),
                    )
                })
                .collect(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: OrchestratorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject durations that do not parse and obviously broken cloud settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut durations = vec![
            ("scheduler.data_transfer_delay", &self.scheduler.data_transfer_delay),
            ("optimizer.interval", &self.optimizer.interval),
            ("optimizer.move_penalty", &self.optimizer.move_penalty),
            ("optimizer.idle_timeout", &self.optimizer.idle_timeout),
        ];
        if let Some(cloud) = &self.cloud {
            durations.extend([
                ("cloud.slot", &cloud.slot),
                ("cloud.safety_margin", &cloud.safety_margin),
                ("cloud.min_poll", &cloud.min_poll),
                ("cloud.max_poll", &cloud.max_poll),
                ("cloud.initial_creation_time", &cloud.initial_creation_time),
                ("cloud.creation_latency", &cloud.creation_latency),
            ]);
        }
        for (key, value) in durations {
            if parse_duration(value).is_none() {
                bail!("invalid duration for {key}: {value:?}");
            }
        }
        for core in &self.cores {
            for imp in &core.implementations {
                if let Some(avg) = &imp.avg_time
                    && parse_duration(avg).is_none()
                {
                    bail!("invalid avg_time for {}: {avg:?}", core.signature);
                }
            }
        }
        if let Some(cloud) = &self.cloud {
            if cloud.creation_workers == 0 {
                bail!("cloud.creation_workers must be at least 1");
            }
            if cloud.min_poll_duration() > cloud.max_poll_duration() {
                bail!("cloud.min_poll must not exceed cloud.max_poll");
            }
        }
        let mut names = std::collections::HashSet::new();
        for worker in &self.workers {
            if !names.insert(worker.name.as_str()) {
                bail!("duplicate worker name: {}", worker.name);
            }
        }
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn data_transfer_delay_ms(&self) -> i64 {
        millis(&self.data_transfer_delay, 200)
    }
}

impl OptimizerConfig {
    pub fn interval_duration(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn move_penalty_ms(&self) -> i64 {
        millis(&self.move_penalty, 2500)
    }

    pub fn idle_timeout_ms(&self) -> i64 {
        millis(&self.idle_timeout, 60_000)
    }
}

impl CloudConfig {
    pub fn slot_ms(&self) -> i64 {
        millis(&self.slot, 3_600_000)
    }

    pub fn safety_margin_ms(&self) -> i64 {
        millis(&self.safety_margin, 30_000)
    }

    pub fn min_poll_duration(&self) -> Duration {
        parse_duration(&self.min_poll).unwrap_or(Duration::from_secs(1))
    }

    pub fn max_poll_duration(&self) -> Duration {
        parse_duration(&self.max_poll).unwrap_or(Duration::from_secs(120))
    }

    pub fn initial_creation_time_ms(&self) -> i64 {
        millis(&self.initial_creation_time, 120_000)
    }

    pub fn creation_latency_duration(&self) -> Duration {
        parse_duration(&self.creation_latency).unwrap_or_default()
    }
}

fn millis(value: &str, fallback: i64) -> i64 {
    parse_duration(value)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(fallback)
}

/// Parse `"250ms"`, `"30s"`, `"2m"` or `"1h"`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    let (digits, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };
    let value = digits.trim().parse::<u64>().ok()?;
    let secs = match unit {
        's' => value,
        'm' => value.checked_mul(60)?,
        'h' => value.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}
