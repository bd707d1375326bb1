//! Multi-criteria scores and the orderings used by the scheduler and the
//! optimizer.
//!
//! A [`Score`] ranks one (worker, implementation) choice for one action.
//! Comparison is a total order: action priority first (higher wins), then
//! group priority (lower wins), then the configured [`Objective`], then
//! every remaining field. Two scores compare equal only when all fields are
//! equal.

use std::cmp::Ordering;

use warp_core::{ActionId, END_OF_TIME, Objective, Profile};

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub priority: i32,
    pub group_priority: i64,
    /// When all input data is expected to be available.
    pub data_ready: i64,
    /// When the worker is expected to have room for the implementation.
    pub resource_free: i64,
    /// Expected execution time of the implementation.
    pub duration: i64,
    /// mJ: idle draw while waiting and running, plus the implementation's draw.
    pub energy: f64,
    /// Currency: idle price while waiting and running, plus the implementation's price.
    pub cost: f64,
}

/// Idle figures of the worker a score is computed for.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdleRates {
    /// Watts.
    pub power: f64,
    /// Currency per hour.
    pub price: f64,
}

impl Score {
    /// Build a score from timing and the implementation's profile on a worker.
    ///
    /// Waiting time is measured from `now`; an unbounded wait makes energy
    /// and cost infinite.
    pub fn from_profile(
        priority: i32,
        group_priority: i64,
        data_ready: i64,
        resource_free: i64,
        profile: &Profile,
        idle: IdleRates,
        now: i64,
    ) -> Self {
        let duration = profile.avg_time;
        let waiting = data_ready.max(resource_free);
        let (energy, cost) = if waiting == END_OF_TIME {
            (f64::INFINITY, f64::INFINITY)
        } else {
            let busy = (waiting.saturating_sub(now).max(0) as f64) + duration as f64;
            (
                busy * idle.power + profile.power * duration as f64,
                busy * idle.price / MS_PER_HOUR + profile.price * duration as f64,
            )
        };
        Self {
            priority,
            group_priority,
            data_ready,
            resource_free,
            duration,
            energy,
            cost,
        }
    }

    /// Expected completion: start once both data and resources are there.
    pub fn expected_end(&self) -> i64 {
        self.data_ready
            .max(self.resource_free)
            .saturating_add(self.duration)
    }

    /// `Greater` means `self` is the better choice.
    pub fn compare(&self, other: &Score, objective: Objective) -> Ordering {
        let lower_wins = |a: i64, b: i64| b.cmp(&a);
        let lower_wins_f = |a: f64, b: f64| b.total_cmp(&a);

        let end = lower_wins(self.expected_end(), other.expected_end());
        let energy = lower_wins_f(self.energy, other.energy);
        let cost = lower_wins_f(self.cost, other.cost);
        let (first, second, third) = match objective {
            Objective::Time => (end, cost, energy),
            Objective::Cost => (cost, end, energy),
            Objective::Energy => (energy, end, cost),
        };

        self.priority
            .cmp(&other.priority)
            .then(lower_wins(self.group_priority, other.group_priority))
            .then(first)
            .then(second)
            .then(third)
            .then(lower_wins(self.data_ready, other.data_ready))
            .then(lower_wins(self.resource_free, other.resource_free))
            .then(lower_wins(self.duration, other.duration))
    }

    pub fn is_better(&self, other: &Score, objective: Objective) -> bool {
        self.compare(other, objective) == Ordering::Greater
    }

    /// `self` is better than `other`, or there is no `other` yet.
    pub fn is_better_than(&self, other: Option<&Score>, objective: Objective) -> bool {
        other.is_none_or(|o| self.is_better(o, objective))
    }
}

// ── Action orderings ───────────────────────────────────────────────

/// Selection order among otherwise equal actions: higher priority, then older.
pub fn selection_order(a: (i32, ActionId), b: (i32, ActionId)) -> Ordering {
    b.0.cmp(&a.0).then(a.1.cmp(&b.1))
}

/// Donation order: latest expected end first, then older.
pub fn donation_order(a: (i64, ActionId), b: (i64, ActionId)) -> Ordering {
    b.0.cmp(&a.0).then(a.1.cmp(&b.1))
}

/// Release order: earliest data-ready time first, then older.
pub fn ready_order(a: (i64, ActionId), b: (i64, ActionId)) -> Ordering {
    a.0.cmp(&b.0).then(a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(priority: i32, data: i64, free: i64, dur: i64) -> Score {
        Score {
            priority,
            group_priority: -1,
            data_ready: data,
            resource_free: free,
            duration: dur,
            energy: 0.0,
            cost: 0.0,
        }
    }

    #[test]
    fn priority_dominates() {
        let urgent = score(1, 1000, 1000, 500);
        let quick = score(0, 0, 0, 1);
        assert!(urgent.is_better(&quick, Objective::Time));
        assert!(!quick.is_better(&urgent, Objective::Time));
    }

    #[test]
    fn lower_group_wins() {
        let mut a = score(0, 0, 0, 10);
        let mut b = a;
        a.group_priority = 2;
        b.group_priority = 5;
        assert!(a.is_better(&b, Objective::Time));
    }

    #[test]
    fn time_objective_uses_expected_end() {
        let a = score(0, 100, 0, 50); // ends at 150
        let b = score(0, 0, 120, 20); // ends at 140
        assert!(b.is_better(&a, Objective::Time));
    }

    #[test]
    fn cost_objective() {
        let mut cheap = score(0, 0, 0, 100);
        cheap.cost = 1.0;
        let mut fast = score(0, 0, 0, 10);
        fast.cost = 2.0;
        assert!(cheap.is_better(&fast, Objective::Cost));
        assert!(fast.is_better(&cheap, Objective::Time));
    }

    #[test]
    fn antisymmetric_and_total() {
        let samples = [
            score(0, 0, 0, 10),
            score(0, 0, 10, 0),
            score(0, 10, 0, 0),
            score(0, 5, 5, 5),
            score(1, 5, 5, 5),
            Score {
                energy: 3.0,
                ..score(0, 0, 0, 10)
            },
        ];
        for objective in [Objective::Time, Objective::Cost, Objective::Energy] {
            for a in &samples {
                for b in &samples {
                    let ab = a.is_better(b, objective);
                    let ba = b.is_better(a, objective);
                    assert!(!(ab && ba));
                    if a != b {
                        assert!(ab || ba, "{a:?} vs {b:?} left undecided");
                    } else {
                        assert!(!ab && !ba);
                    }
                }
            }
        }
    }

    #[test]
    fn energy_and_cost_from_profile() {
        let profile = Profile::with_average(100).with_power(2.0).with_price(0.5);
        let idle = IdleRates {
            power: 10.0,
            price: 3600.0,
        };
        let s = Score::from_profile(0, -1, 1_050, 1_000, &profile, idle, 1_000);
        // waiting 50ms + 100ms running
        assert_eq!(s.energy, 150.0 * 10.0 + 2.0 * 100.0);
        assert_eq!(s.cost, 150.0 * 3600.0 / 3_600_000.0 + 0.5 * 100.0);

        let blocked = Score::from_profile(0, -1, END_OF_TIME, 0, &profile, idle, 0);
        assert!(blocked.energy.is_infinite());
        assert!(blocked.cost.is_infinite());
        assert_eq!(blocked.expected_end(), END_OF_TIME);
    }

    #[test]
    fn action_orderings() {
        assert_eq!(
            selection_order((2, ActionId(5)), (1, ActionId(1))),
            Ordering::Less
        );
        assert_eq!(
            selection_order((1, ActionId(1)), (1, ActionId(5))),
            Ordering::Less
        );
        assert_eq!(
            donation_order((300, ActionId(9)), (100, ActionId(1))),
            Ordering::Less
        );
        assert_eq!(ready_order((10, ActionId(9)), (20, ActionId(1))), Ordering::Less);
    }
}
