//! Execution statistics per (worker, implementation).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Average used for an implementation that never ran on a worker.
pub const DEFAULT_EXECUTION_TIME: i64 = 100;

fn no_min() -> i64 {
    i64::MAX
}

fn no_max() -> i64 {
    i64::MIN
}

fn default_avg() -> i64 {
    DEFAULT_EXECUTION_TIME
}

/// Historical execution statistics, times in milliseconds.
///
/// `power` is the average draw while running (watts) and `price` the cost
/// per millisecond of execution. Both are zero unless configured or learned.
/// Missing JSON keys fall back to the "never ran" values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub executions: u64,
    #[serde(rename = "minTime", default = "no_min")]
    pub min_time: i64,
    #[serde(rename = "avgTime", default = "default_avg")]
    pub avg_time: i64,
    #[serde(rename = "maxTime", default = "no_max")]
    pub max_time: i64,
    #[serde(default)]
    pub power: f64,
    #[serde(default)]
    pub price: f64,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            executions: 0,
            min_time: no_min(),
            avg_time: DEFAULT_EXECUTION_TIME,
            max_time: no_max(),
            power: 0.0,
            price: 0.0,
        }
    }
}

impl Profile {
    /// A profile with a known average and no recorded executions.
    pub fn with_average(avg_time: i64) -> Self {
        Self {
            avg_time,
            ..Default::default()
        }
    }

    pub fn with_power(mut self, power: f64) -> Self {
        self.power = power;
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    /// Fold one measured execution into the running statistics.
    pub fn record_execution(&mut self, duration_ms: i64) {
        let duration_ms = duration_ms.max(0);
        let n = self.executions as i128;
        if self.executions == 0 {
            self.avg_time = duration_ms;
        } else {
            self.avg_time = ((self.avg_time as i128 * n + duration_ms as i128) / (n + 1)) as i64;
        }
        self.min_time = self.min_time.min(duration_ms);
        self.max_time = self.max_time.max(duration_ms);
        self.executions += 1;
    }

    /// Merge another profile into this one with an execution-weighted average.
    pub fn accumulate(&mut self, other: &Profile) {
        if other.executions == 0 {
            return;
        }
        let total = self.executions + other.executions;
        self.avg_time = ((self.avg_time as i128 * self.executions as i128
            + other.avg_time as i128 * other.executions as i128)
            / total as i128) as i64;
        self.min_time = self.min_time.min(other.min_time);
        self.max_time = self.max_time.max(other.max_time);
        self.executions = total;
        if other.power > 0.0 {
            self.power = other.power;
        }
        if other.price > 0.0 {
            self.price = other.price;
        }
    }

    pub fn has_executions(&self) -> bool {
        self.executions > 0
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "executions={} minTime={} avgTime={} maxTime={}",
            self.executions, self.min_time, self.avg_time, self.max_time
        )
    }
}
