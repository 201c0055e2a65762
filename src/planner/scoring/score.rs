use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::elements::Engine;

/// Scorer intermediates kept with a score for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreDebugValues {
    /// Per-machine analytical load predicted on the OLTP writer or each replica.
    pub oltp_row_analytical_load: f64,

    /// CPU denorm the transactional latency model sees on the writer.
    pub oltp_row_txn_cpu_denorm: f64,

    pub oltp_row_query_factor: Option<f64>,
    pub oltp_row_peak_cpu_denorm: f64,
    pub warehouse_query_factor: Option<f64>,

    /// Predicted utilization of the hottest warehouse node, in `[0, 1]`.
    pub warehouse_max_node_cpu_util: f64,
}

impl Default for ScoreDebugValues {
    fn default() -> Self {
        Self {
            oltp_row_analytical_load: 0.0,
            oltp_row_txn_cpu_denorm: 0.0,
            oltp_row_query_factor: Some(1.0),
            oltp_row_peak_cpu_denorm: 0.0,
            warehouse_query_factor: Some(1.0),
            warehouse_max_node_cpu_util: 0.0,
        }
    }
}

/// Predicted cost, transition effort and performance of a blueprint. Costs are USD per hour except the one-time
/// table movement cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub provisioning_cost: f64,
    pub storage_cost: f64,
    pub scan_cost: f64,
    pub table_movement_trans_cost: f64,
    pub table_movement_trans_time_s: f64,
    pub provisioning_trans_time_s: f64,

    /// Predicted latency of each analytical query, grouped by the engine it is routed to.
    #[serde(default)]
    pub analytical_latencies: BTreeMap<Engine, Vec<f64>>,

    #[serde(
        serialize_with = "crate::serde::serialize_nan_as_none",
        deserialize_with = "crate::serde::deserialize_none_as_nan"
    )]
    pub txn_lat_s_p50: f64,

    #[serde(
        serialize_with = "crate::serde::serialize_nan_as_none",
        deserialize_with = "crate::serde::deserialize_none_as_nan"
    )]
    pub txn_lat_s_p90: f64,

    #[serde(default)]
    pub debug: ScoreDebugValues,
}

impl Default for Score {
    fn default() -> Self {
        Self {
            provisioning_cost: 0.0,
            storage_cost: 0.0,
            scan_cost: 0.0,
            table_movement_trans_cost: 0.0,
            table_movement_trans_time_s: 0.0,
            provisioning_trans_time_s: 0.0,
            analytical_latencies: BTreeMap::new(),
            txn_lat_s_p50: f64::NAN,
            txn_lat_s_p90: f64::NAN,
            debug: ScoreDebugValues::default(),
        }
    }
}

impl Score {
    pub fn hourly_operational_cost(&self) -> f64 {
        self.provisioning_cost + self.storage_cost + self.scan_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.hourly_operational_cost() + self.table_movement_trans_cost
    }

    pub fn transition_time_s(&self) -> f64 {
        self.table_movement_trans_time_s + self.provisioning_trans_time_s
    }

    pub fn num_analytical_queries(&self) -> usize {
        self.analytical_latencies.values().map(Vec::len).sum()
    }

    /// Zero when no analytical query is scored.
    pub fn analytical_latency_p99(&self) -> f64 {
        let all: Vec<f64> = self.analytical_latencies.values().flatten().copied().collect();
        percentile(all, 0.99)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cost=${:.4}/h (+${:.4} movement), transition={:.1}s, query_p99={:.3}s, txn_p90={:.4}s",
            self.hourly_operational_cost(),
            self.table_movement_trans_cost,
            self.transition_time_s(),
            self.analytical_latency_p99(),
            self.txn_lat_s_p90,
        )
    }
}

/// Linearly interpolated percentile, `q` in `[0, 1]`.
pub fn percentile(mut values: Vec<f64>, q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let rank = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f64;
    values[lo] + (values[hi] - values[lo]) * weight
}
