use std::cmp::Ordering;

use super::scoring::Score;
use crate::settings::ComparatorSettings;

/// Ranks scored blueprints: service-level ceilings first, then cost, transition time and latency, where the last
/// three only count once the difference reaches the ratio threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct BlueprintComparator {
    settings: ComparatorSettings,
}

impl BlueprintComparator {
    pub fn new(settings: ComparatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ComparatorSettings {
        &self.settings
    }

    /// Whether `a` is strictly better than `b`.
    pub fn is_better(&self, a: &Score, b: &Score) -> bool {
        if let Some(decision) = Self::ceiling(a.txn_lat_s_p90, b.txn_lat_s_p90, self.settings.max_txn_p90_latency_s) {
            return decision;
        }

        let a_p99 = a.analytical_latency_p99();
        let b_p99 = b.analytical_latency_p99();
        if let Some(decision) = Self::ceiling(a_p99, b_p99, self.settings.max_query_latency_s) {
            return decision;
        }

        let ordered = [
            (a.total_cost(), b.total_cost()),
            (a.transition_time_s(), b.transition_time_s()),
            (a_p99, b_p99),
        ];

        for (a_value, b_value) in ordered {
            if self.is_significant(a_value, b_value) {
                return a_value < b_value;
            }
        }

        false
    }

    /// Total order for sorting best first.
    pub fn ordering(&self, a: &Score, b: &Score) -> Ordering {
        if self.is_better(a, b) {
            Ordering::Less
        } else if self.is_better(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// `Some(a is better)` when the ceiling decides: both over, the lower wins; one over, it loses. `None` when
    /// neither is over or either value is unknown.
    fn ceiling(a: f64, b: f64, ceiling: f64) -> Option<bool> {
        if a.is_nan() || b.is_nan() {
            return None;
        }

        match (ceiling < a, ceiling < b) {
            (true, true) => Some(a < b),
            (true, false) => Some(false),
            (false, true) => Some(true),
            (false, false) => None,
        }
    }

    fn is_significant(&self, a: f64, b: f64) -> bool {
        let (hi, lo) = if a < b { (b, a) } else { (a, b) };
        let ratio = if lo == 0.0 || hi == 0.0 { f64::INFINITY } else { hi / lo };
        let differ = a != b;
        differ && self.settings.ratio_threshold <= ratio
    }
}
