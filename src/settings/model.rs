use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::blueprint::RepositorySettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub planner: PlannerSettings,
    pub triggers: TriggerSettings,
    pub transition: TransitionSettings,
    pub repository: RepositorySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Number of candidates kept by the beam search.
    pub beam_size: usize,

    /// Bounds the provisioning neighborhood in multiples of the current blueprint's resource value.
    pub max_provisioning_multiplier: f64,

    pub ensure_tables_together_on_one_engine: bool,

    #[serde(
        rename = "planning_window_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub planning_window: Duration,

    /// Multiple of the planning window the workload provider looks back over.
    pub workload_window_multiplier: u32,

    /// The beam search yields to the scheduler after this many queries.
    pub yield_every_n_queries: usize,

    /// Used when a workload carries no row width for a table.
    pub default_bytes_per_row: f64,

    /// Fraction of a fresh engine's capacity assumed busy when load cannot be derived from observations.
    pub initialize_load_fraction: f64,

    /// Floor applied to a query factor below 1, so moving queries away never removes all load at once.
    pub min_load_removal_fraction: f64,

    pub comparator: ComparatorSettings,
    pub oltp_row: OltpRowModelSettings,
    pub warehouse: WarehouseModelSettings,
    pub serverless: ServerlessModelSettings,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            beam_size: 100,
            max_provisioning_multiplier: 2.5,
            ensure_tables_together_on_one_engine: true,
            planning_window: Duration::from_secs(3600),
            workload_window_multiplier: 1,
            yield_every_n_queries: 100,
            default_bytes_per_row: 100.0,
            initialize_load_fraction: 0.25,
            min_load_removal_fraction: 0.75,
            comparator: ComparatorSettings::default(),
            oltp_row: OltpRowModelSettings::default(),
            warehouse: WarehouseModelSettings::default(),
            serverless: ServerlessModelSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorSettings {
    pub max_txn_p90_latency_s: f64,
    pub max_query_latency_s: f64,

    /// Minimum `max / min` ratio for a cost, transition time or latency difference to matter.
    pub ratio_threshold: f64,
}

impl Default for ComparatorSettings {
    fn default() -> Self {
        Self {
            max_txn_p90_latency_s: 0.030,
            max_query_latency_s: 10.0,
            ratio_threshold: 1.1,
        }
    }
}

/// `p = max(observed - b, 0) × (K - u) / (K - u') + b`, per percentile.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnLatencyModel {
    pub k: f64,
    pub b_p50: f64,
    pub b_p90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OltpRowModelSettings {
    /// Coefficients over `[load × rf, load, rf, 1]²`.
    pub latency_coefs: [f64; 4],
    pub txn_latency: TxnLatencyModel,

    /// CPU denorm per transaction/s below the inflection point.
    pub cpu_per_txn: f64,

    /// CPU denorm per transaction/s past the inflection point at half the vCPUs.
    pub cpu_per_txn_overload: f64,

    pub prov_to_peak_cpu_denorm: f64,
    pub io_optimized: bool,
    pub usd_per_million_ios: f64,
    pub regular_usd_per_mb_per_month: f64,
    pub io_opt_usd_per_mb_per_month: f64,
    pub extract_rate_mb_per_s: f64,
    pub load_rate_mb_per_s: f64,

    #[serde(
        rename = "provisioning_change_time_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub provisioning_change_time: Duration,

    #[serde(
        rename = "per_instance_change_time_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub per_instance_change_time: Duration,
}

impl Default for OltpRowModelSettings {
    fn default() -> Self {
        Self {
            latency_coefs: [0.01, 0.0, 0.8, 0.2],
            txn_latency: TxnLatencyModel { k: 1.05, b_p50: 0.0015, b_p90: 0.003 },
            cpu_per_txn: 0.002,
            cpu_per_txn_overload: 0.004,
            prov_to_peak_cpu_denorm: 0.9,
            io_optimized: false,
            usd_per_million_ios: 0.20,
            regular_usd_per_mb_per_month: 0.0001,
            io_opt_usd_per_mb_per_month: 0.000225,
            extract_rate_mb_per_s: 10.0,
            load_rate_mb_per_s: 10.0,
            provisioning_change_time: Duration::from_secs(600),
            per_instance_change_time: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseModelSettings {
    /// Coefficients `[c1, c2]` of `c1 × rf + c2`.
    pub latency_coefs: [f64; 2],
    pub extract_rate_mb_per_s: f64,
    pub load_rate_mb_per_s: f64,
    pub peak_load_threshold_pct: f64,
    pub peak_load_multiplier: f64,

    #[serde(
        rename = "elastic_resize_time_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub elastic_resize_time: Duration,

    #[serde(
        rename = "classic_resize_time_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub classic_resize_time: Duration,
}

impl Default for WarehouseModelSettings {
    fn default() -> Self {
        Self {
            latency_coefs: [0.8, 0.2],
            extract_rate_mb_per_s: 10.0,
            load_rate_mb_per_s: 10.0,
            peak_load_threshold_pct: 95.0,
            peak_load_multiplier: 1.5,
            elastic_resize_time: Duration::from_secs(900),
            classic_resize_time: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerlessModelSettings {
    pub usd_per_mb_scanned: f64,
    pub min_mb_per_query: f64,
    pub object_storage_usd_per_mb_per_month: f64,
    pub extract_rate_mb_per_s: f64,
    pub load_rate_mb_per_s: f64,
}

impl Default for ServerlessModelSettings {
    fn default() -> Self {
        Self {
            usd_per_mb_scanned: 5.0 / 1_000_000.0,
            min_mb_per_query: 10.0,
            object_storage_usd_per_mb_per_month: 0.000023,
            extract_rate_mb_per_s: 10.0,
            load_rate_mb_per_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub enabled: bool,

    #[serde(
        rename = "check_period_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub check_period: Duration,

    /// Length of one observed metrics epoch.
    #[serde(
        rename = "epoch_length_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub epoch_length: Duration,

    /// Extra delay before metrics reflect a newly accepted blueprint.
    #[serde(
        rename = "observe_bp_delay_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    pub observe_bp_delay: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<ElapsedTimeSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oltp_row_cpu: Option<MetricThresholdSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse_cpu: Option<MetricThresholdSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_latency_ceiling: Option<LatencyCeilingSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_latency_ceiling: Option<LatencyCeilingSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_change: Option<RecentChangeSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_costs: Option<VariableCostsSettings>,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_period: Duration::from_secs(60),
            epoch_length: Duration::from_secs(300),
            observe_bp_delay: Duration::from_secs(600),
            elapsed_time: Some(ElapsedTimeSettings { multiplier: 24 }),
            oltp_row_cpu: Some(MetricThresholdSettings {
                lo: 15.0,
                hi: 85.0,
                sustained_epochs: 3,
                lookahead_epochs: None,
            }),
            warehouse_cpu: Some(MetricThresholdSettings {
                lo: 15.0,
                hi: 85.0,
                sustained_epochs: 3,
                lookahead_epochs: None,
            }),
            query_latency_ceiling: Some(LatencyCeilingSettings {
                ceiling_s: 30.0,
                sustained_epochs: 3,
                lookahead_epochs: None,
            }),
            txn_latency_ceiling: Some(LatencyCeilingSettings {
                ceiling_s: 0.030,
                sustained_epochs: 3,
                lookahead_epochs: None,
            }),
            recent_change: Some(RecentChangeSettings { delay_epochs: 5 }),
            variable_costs: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElapsedTimeSettings {
    /// Fires after this many planning windows.
    pub multiplier: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholdSettings {
    pub lo: f64,
    pub hi: f64,
    pub sustained_epochs: usize,

    /// When set, judges forecasted epochs instead of observed ones.
    #[serde(default)]
    pub lookahead_epochs: Option<usize>,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyCeilingSettings {
    pub ceiling_s: f64,
    pub sustained_epochs: usize,

    #[serde(default)]
    pub lookahead_epochs: Option<usize>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentChangeSettings {
    pub delay_epochs: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCostsSettings {
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    pub max_retries: u32,

    #[serde(
        rename = "min_retry_interval_millis",
        serialize_with = "crate::serde::serialize_duration_millis",
        deserialize_with = "crate::serde::deserialize_duration_millis"
    )]
    pub min_retry_interval: Duration,

    #[serde(
        rename = "max_retry_interval_millis",
        serialize_with = "crate::serde::serialize_duration_millis",
        deserialize_with = "crate::serde::deserialize_duration_millis"
    )]
    pub max_retry_interval: Duration,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_retry_interval: Duration::from_millis(500),
            max_retry_interval: Duration::from_secs(30),
        }
    }
}
