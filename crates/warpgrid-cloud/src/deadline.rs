//! Billing-slot arithmetic and the deadline watcher loop.
//!
//! Idle VMs are not destroyed as soon as their worker is done: the current
//! slot is already paid for, so they are kept for reuse and destroyed just
//! before the next slot would be billed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::connector::Connector;

pub const ONE_HOUR_MS: i64 = 3_600_000;

/// Billing parameters shared by the connector and its watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingWindow {
    pub slot_ms: i64,
    pub safety_margin_ms: i64,
    pub min_poll: Duration,
    pub max_poll: Duration,
}

impl BillingWindow {
    /// Whether a VM idle after `elapsed` ms should be kept for reuse. At or
    /// past the margin before the boundary it is destroyed at once.
    pub fn should_save(&self, elapsed: i64) -> bool {
        if self.slot_ms <= 0 {
            return false;
        }
        elapsed.max(0) % self.slot_ms < self.slot_ms - self.safety_margin_ms
    }

    /// Whether a reusable VM with `time_left` in its slot must go now.
    pub fn is_due(&self, time_left: i64) -> bool {
        time_left < self.safety_margin_ms
    }

    /// How long to sleep given the time left in each VM's slot.
    pub fn next_sleep(&self, time_left: impl IntoIterator<Item = i64>, mean_creation_ms: i64) -> Duration {
        let soonest = time_left
            .into_iter()
            .map(|t| t.saturating_sub(self.safety_margin_ms))
            .min();
        match soonest {
            None => millis(mean_creation_ms.max(self.slot_ms - self.safety_margin_ms)),
            Some(ms) => millis(ms).clamp(self.min_poll, self.max_poll),
        }
    }

    /// Price per hour of an instance billed `price_per_slot` per slot.
    pub fn cost_per_hour(&self, price_per_slot: f64) -> f64 {
        if self.slot_ms <= 0 {
            price_per_slot
        } else {
            price_per_slot * ONE_HOUR_MS as f64 / self.slot_ms as f64
        }
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// Sleep until the next slot boundary, destroy what is due, repeat until
/// the connector stops. A wake-up before the deadline just rescans.
pub async fn run_deadline_watcher(connector: Arc<Connector>) {
    info!(provider = %connector.provider_name(), "deadline watcher started");
    while !connector.is_stopped() {
        let sleep = connector.scan_deadlines(connector.now()).await;
        debug!(sleep_ms = sleep.as_millis() as u64, "deadline watcher sleeping");
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = connector.wakeup().notified() => {
                debug!("deadline watcher woken");
            }
        }
    }
    info!(provider = %connector.provider_name(), "deadline watcher stopped");
}
