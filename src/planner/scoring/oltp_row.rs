use super::ScoringContext;
use crate::blueprint::provisioning::num_cpus;
use crate::blueprint::Provisioning;
use crate::elements::Engine;
use crate::error::BlueprintError;
use crate::planner::metrics::Metrics;
use crate::planner::workload::Workload;
use crate::settings::{OltpRowModelSettings, TxnLatencyModel};

/// vCPUs of the instance the latency coefficients were fit on.
const BASE_VCPUS: f64 = 4.0;

/// Minimum analytical load kept when the candidate still runs queries on the engine.
const ANALYTICS_LOAD_FLOOR: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub struct OltpRowPrediction {
    pub latencies: Vec<f64>,
    pub txn_lat_s_p50: f64,
    pub txn_lat_s_p90: f64,

    /// Analytical load on each machine serving analytical queries.
    pub analytical_load_per_machine: f64,

    /// CPU denorm the writer carries under the next provisioning.
    pub txn_cpu_denorm: f64,

    pub query_factor: Option<f64>,
    pub peak_cpu_denorm: f64,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Load {
    load: f64,
    cpu_denorm: f64,
}

impl Load {
    const ZERO: Self = Self { load: 0.0, cpu_denorm: 0.0 };

    fn scaled(self, factor: f64) -> Self {
        Self { load: self.load * factor, cpu_denorm: self.cpu_denorm * factor }
    }
}

/// Transactional CPU denorm for a transaction rate: linear up to half the vCPUs, steeper past that point.
fn transactional_cpu_denorm(settings: &OltpRowModelSettings, vcpus: f64, txn_per_s: f64) -> f64 {
    let limit = vcpus / 2.0;
    let denorm = settings.cpu_per_txn * txn_per_s;
    if denorm <= limit {
        denorm
    } else {
        settings.cpu_per_txn_overload * (txn_per_s - limit / settings.cpu_per_txn) + limit
    }
}

/// Predicts analytical latencies of the queries assigned to the OLTP engine, transactional latency on the writer,
/// and the per-machine load behind them, when moving from `curr` to `next`.
pub fn predict(
    base_latencies: &[f64], arrival_counts: &[f64], curr: &Provisioning, next: &Provisioning, ctx: &ScoringContext,
) -> Result<OltpRowPrediction, BlueprintError> {
    let settings = &ctx.settings().oltp_row;
    let metrics = ctx.metrics();
    let curr_cpus = f64::from(num_cpus(Engine::OltpRow, curr)?);
    let next_cpus = f64::from(num_cpus(Engine::OltpRow, next)?);
    let curr_replicas = f64::from(curr.num_replicas());
    let next_replicas = f64::from(next.num_replicas());
    let has_queries = !base_latencies.is_empty();
    let ran_analytics = !ctx.current_query_locations(Engine::OltpRow).is_empty();

    let writer = Load {
        load: metrics.oltp_row_writer_load_minute_avg,
        cpu_denorm: metrics.oltp_row_writer_cpu_avg / 100.0 * curr_cpus,
    };

    let txn = if 0.0 < curr_replicas || !ran_analytics {
        writer
    } else {
        let d = transactional_cpu_denorm(settings, curr_cpus, metrics.txn_completions_per_s);
        Load { load: d, cpu_denorm: d }
    };

    let analytics = if 0.0 < curr_replicas {
        Load {
            load: metrics.oltp_row_reader_load_minute_avg * curr_replicas,
            cpu_denorm: metrics.oltp_row_reader_cpu_avg / 100.0 * curr_cpus * curr_replicas,
        }
    } else if !ran_analytics {
        Load::ZERO
    } else {
        let floor = if has_queries { ANALYTICS_LOAD_FLOOR } else { 0.0 };
        Load {
            load: (writer.load - txn.load).max(floor),
            cpu_denorm: (writer.cpu_denorm - txn.cpu_denorm).max(floor),
        }
    };

    let query_factor = ctx.query_factor(Engine::OltpRow, base_latencies, arrival_counts);
    let analytics = match query_factor {
        Some(qf) => analytics.scaled(qf.max(1.0)),
        None => {
            let primed = ctx.settings().initialize_load_fraction * curr_cpus * f64::from(curr.num_nodes());
            Load { load: primed, cpu_denorm: primed }
        },
    };

    let (per_machine, txn_affected_cpu) = if 0.0 < next_replicas {
        (analytics.load / next_replicas, txn.cpu_denorm)
    } else {
        (analytics.load + txn.load, analytics.cpu_denorm + txn.cpu_denorm)
    };

    let latencies = scale_latencies(base_latencies, per_machine, next_cpus, &settings.latency_coefs);

    let curr_util = (writer.cpu_denorm / curr_cpus).min(1.0);
    let next_util = (txn_affected_cpu / next_cpus).min(1.0);
    let (txn_lat_s_p50, txn_lat_s_p90) = predict_txn_latency(
        &settings.txn_latency,
        metrics.txn_lat_s_p50,
        metrics.txn_lat_s_p90,
        curr_util,
        next_util,
    );

    Ok(OltpRowPrediction {
        latencies,
        txn_lat_s_p50,
        txn_lat_s_p90,
        analytical_load_per_machine: per_machine,
        txn_cpu_denorm: txn_affected_cpu,
        query_factor,
        peak_cpu_denorm: next_cpus * settings.prov_to_peak_cpu_denorm,
    })
}

/// `latency × coefs · [load × rf, load, rf, 1]²` with `rf = 4 / vCPUs`.
fn scale_latencies(base_latencies: &[f64], load: f64, vcpus: f64, coefs: &[f64; 4]) -> Vec<f64> {
    if load == 0.0 && vcpus == BASE_VCPUS {
        return base_latencies.to_vec();
    }

    let rf = BASE_VCPUS / vcpus;
    let basis = [load * rf, load, rf, 1.0];
    let factor: f64 = coefs.iter().zip(basis).map(|(c, b)| c * b * b).sum();
    base_latencies.iter().map(|lat| lat * factor).collect()
}

fn predict_txn_latency(
    model: &TxnLatencyModel, observed_p50: f64, observed_p90: f64, curr_util: f64, next_util: f64,
) -> (f64, f64) {
    let scale = (model.k - curr_util) / (model.k - next_util).max(1e-6);
    let predict = |observed: f64, b: f64| {
        if observed == 0.0 || !observed.is_finite() {
            f64::NAN
        } else {
            (observed - b).max(0.0) * scale + b
        }
    };

    (predict(observed_p50, model.b_p50), predict(observed_p90, model.b_p90))
}

/// I/O cost of the queries over the workload's period. Reads are served from the replicas when the current
/// provisioning has any, otherwise from the writer.
pub fn scan_cost(
    workload: &Workload, query_indices: &[usize], metrics: &Metrics, has_replicas: bool, settings: &OltpRowModelSettings,
) -> f64 {
    if settings.io_optimized {
        return 0.0;
    }

    let hit_pct = if has_replicas {
        metrics.oltp_row_reader_buffer_hit_pct_avg
    } else {
        metrics.oltp_row_writer_buffer_hit_pct_avg
    };
    let miss_rate = (1.0 - hit_pct / 100.0).clamp(0.0, 1.0);

    let pages: f64 = query_indices
        .iter()
        .map(|idx| workload.predicted_oltp_row_pages(*idx) * workload.arrival_count(*idx))
        .sum();

    pages * miss_rate * settings.usd_per_million_ios / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transactional_cpu_inflects_at_half_the_vcpus() {
        let settings = OltpRowModelSettings::default();
        assert_relative_eq!(transactional_cpu_denorm(&settings, 4.0, 500.0), 1.0);
        assert_relative_eq!(transactional_cpu_denorm(&settings, 4.0, 1000.0), 2.0);
        assert_relative_eq!(transactional_cpu_denorm(&settings, 4.0, 1500.0), 0.004 * 500.0 + 2.0);
    }

    #[test]
    fn test_scale_latencies() {
        let coefs = [0.01, 0.0, 0.8, 0.2];
        assert_eq!(scale_latencies(&[1.0, 2.0], 0.0, 4.0, &coefs), vec![1.0, 2.0]);

        // twice the vCPUs, idle
        let actual = scale_latencies(&[1.0], 0.0, 8.0, &coefs);
        assert_relative_eq!(actual[0], 0.8 * 0.25 + 0.2);

        let actual = scale_latencies(&[2.0], 4.0, 4.0, &coefs);
        assert_relative_eq!(actual[0], 2.0 * (0.01 * 16.0 + 0.8 + 0.2));
    }

    #[test]
    fn test_txn_latency_model() {
        let model = TxnLatencyModel { k: 1.05, b_p50: 0.001, b_p90: 0.002 };
        let (p50, p90) = predict_txn_latency(&model, 0.011, 0.0, 0.5, 0.5);
        assert_relative_eq!(p50, 0.011);
        assert!(p90.is_nan());

        let (p50, _) = predict_txn_latency(&model, 0.011, f64::INFINITY, 1.0, 0.0);
        assert_relative_eq!(p50, 0.01 * (0.05 / 1.05) + 0.001);

        let (_, p90) = predict_txn_latency(&model, 0.001, 0.012, 0.0, 1.0);
        assert_relative_eq!(p90, 0.01 * 21.0 + 0.002, epsilon = 1e-9);
    }
}
