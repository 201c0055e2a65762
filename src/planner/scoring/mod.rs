use std::collections::BTreeMap;

use crate::blueprint::{Blueprint, Provisioning};
use crate::elements::{Engine, EngineSet};
use crate::error::PlanError;
use crate::planner::metrics::Metrics;
use crate::planner::router::Router;
use crate::planner::workload::Workload;
use crate::settings::PlannerSettings;

pub mod oltp_row;
pub mod provisioning;
mod score;
pub mod serverless;
pub mod table_placement;
pub mod warehouse;

pub use provisioning::{is_elastic_resize, provisioning_cost, provisioning_transition_time_s};
pub use score::{percentile, Score, ScoreDebugValues};
pub use table_placement::{placement_storage_cost, storage_cost, table_movement, TableMovement};

/// Everything a replan scores candidates against. Built once per replan from the current blueprint, the observed
/// and forecasted workloads and the latest metrics.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    schema_name: String,
    current_blueprint: Blueprint,
    current_workload: Workload,
    next_workload: Workload,
    metrics: Metrics,
    settings: PlannerSettings,
    current_query_locations: [Vec<usize>; 3],
    norm_factors: BTreeMap<Engine, f64>,
    warehouse_cpu_skew: f64,
}

/// The parts of a candidate blueprint the scorers look at.
#[derive(Debug, Clone, Copy)]
pub struct CandidateLayout<'a> {
    /// Indices of the next workload's analytical queries per engine, in [`Engine::index`] order.
    pub query_locations: &'a [Vec<usize>; 3],
    pub table_locations: &'a BTreeMap<String, EngineSet>,
    pub oltp_row_provisioning: &'a Provisioning,
    pub warehouse_provisioning: &'a Provisioning,
}

impl ScoringContext {
    #[tracing::instrument(level = "debug", skip(current_blueprint, current_workload, next_workload, metrics, settings))]
    pub fn new(
        schema_name: &str, current_blueprint: Blueprint, current_workload: Workload, next_workload: Workload,
        metrics: Metrics, settings: PlannerSettings,
    ) -> Self {
        let current_query_locations = Router::for_blueprint(&current_blueprint).route_workload(&current_workload);

        let norm_factors = Engine::ALL
            .iter()
            .filter_map(|engine| {
                let total: f64 = current_query_locations[engine.index()]
                    .iter()
                    .map(|idx| current_workload.predicted_latency(*idx, *engine) * current_workload.arrival_count(*idx))
                    .sum();
                (0.0 < total).then_some((*engine, total))
            })
            .collect();

        let warehouse_cpu_skew = warehouse::cpu_skew_adjustment(&metrics.warehouse_cpu_list);
        tracing::debug!(?norm_factors, %warehouse_cpu_skew, "scoring context prepared");

        Self {
            schema_name: schema_name.to_string(),
            current_blueprint,
            current_workload,
            next_workload,
            metrics,
            settings,
            current_query_locations,
            norm_factors,
            warehouse_cpu_skew,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn current_blueprint(&self) -> &Blueprint {
        &self.current_blueprint
    }

    pub fn current_workload(&self) -> &Workload {
        &self.current_workload
    }

    pub fn next_workload(&self) -> &Workload {
        &self.next_workload
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Indices into the current workload of the analytical queries the current blueprint routes to `engine`.
    pub fn current_query_locations(&self, engine: Engine) -> &[usize] {
        &self.current_query_locations[engine.index()]
    }

    pub fn norm_factor(&self, engine: Engine) -> Option<f64> {
        self.norm_factors.get(&engine).copied()
    }

    pub fn warehouse_cpu_skew(&self) -> f64 {
        self.warehouse_cpu_skew
    }

    /// Size in MB of a table in the next workload.
    pub fn table_size_mb(&self, table_name: &str) -> f64 {
        self.next_workload
            .table_size_mb(table_name, self.settings.default_bytes_per_row)
    }

    /// How much more (or less) analytical work `engine` would do relative to what it does now. `None` when the engine
    /// runs no analytics now but would under the candidate; one when the candidate routes nothing to it.
    pub fn query_factor(&self, engine: Engine, base_latencies: &[f64], arrival_counts: &[f64]) -> Option<f64> {
        if base_latencies.is_empty() {
            return Some(1.0);
        }

        let total: f64 = base_latencies.iter().zip(arrival_counts).map(|(l, a)| l * a).sum();
        self.norm_factor(engine).map(|norm| total / norm)
    }

    /// Scan cost per hour of the next workload's queries under the given routing.
    pub fn hourly_scan_cost(&self, query_locations: &[Vec<usize>; 3]) -> f64 {
        hourly_scan_cost(
            &self.next_workload,
            query_locations,
            &self.metrics,
            0 < self.current_blueprint.oltp_row_provisioning().num_replicas(),
            &self.settings,
        )
    }

    /// Hourly storage cost of a placement over the next workload's tables.
    pub fn storage_cost(&self, table_locations: &BTreeMap<String, EngineSet>) -> f64 {
        table_locations
            .iter()
            .map(|(table, locations)| placement_storage_cost(*locations, self.table_size_mb(table), &self.settings))
            .sum()
    }

    /// Scores a candidate. Movement cost and time are accumulated by the candidate while tables are placed, so they
    /// are passed in.
    pub fn score(&self, layout: &CandidateLayout<'_>, movement: TableMovement) -> Result<Score, PlanError> {
        let curr_oltp = self.current_blueprint.oltp_row_provisioning();
        let curr_warehouse = self.current_blueprint.warehouse_provisioning();

        let (oltp_base, oltp_arrivals) = self.base_latencies(layout.query_locations, Engine::OltpRow);
        let oltp = oltp_row::predict(&oltp_base, &oltp_arrivals, curr_oltp, layout.oltp_row_provisioning, self)?;

        let (wh_base, wh_arrivals) = self.base_latencies(layout.query_locations, Engine::Warehouse);
        let wh = warehouse::predict(&wh_base, &wh_arrivals, curr_warehouse, layout.warehouse_provisioning, self)?;

        let (serverless_latencies, _) = self.base_latencies(layout.query_locations, Engine::Serverless);

        let mut analytical_latencies = BTreeMap::new();
        for (engine, latencies) in [
            (Engine::OltpRow, oltp.latencies),
            (Engine::Warehouse, wh.latencies),
            (Engine::Serverless, serverless_latencies),
        ] {
            if !latencies.is_empty() {
                analytical_latencies.insert(engine, latencies);
            }
        }

        let provisioning_cost = provisioning_cost(Engine::OltpRow, layout.oltp_row_provisioning)?
            + provisioning_cost(Engine::Warehouse, layout.warehouse_provisioning)?;

        let provisioning_trans_time_s =
            provisioning_transition_time_s(Engine::OltpRow, curr_oltp, layout.oltp_row_provisioning, &self.settings)
                + provisioning_transition_time_s(
                    Engine::Warehouse,
                    curr_warehouse,
                    layout.warehouse_provisioning,
                    &self.settings,
                );

        Ok(Score {
            provisioning_cost,
            storage_cost: self.storage_cost(layout.table_locations),
            scan_cost: self.hourly_scan_cost(layout.query_locations),
            table_movement_trans_cost: movement.cost,
            table_movement_trans_time_s: movement.time_s,
            provisioning_trans_time_s,
            analytical_latencies,
            txn_lat_s_p50: oltp.txn_lat_s_p50,
            txn_lat_s_p90: oltp.txn_lat_s_p90,
            debug: ScoreDebugValues {
                oltp_row_analytical_load: oltp.analytical_load_per_machine,
                oltp_row_txn_cpu_denorm: oltp.txn_cpu_denorm,
                oltp_row_query_factor: oltp.query_factor,
                oltp_row_peak_cpu_denorm: oltp.peak_cpu_denorm,
                warehouse_query_factor: wh.query_factor,
                warehouse_max_node_cpu_util: wh.max_node_cpu_util,
            },
        })
    }

    /// Scores the current blueprint kept as is against the next workload.
    pub fn score_current_blueprint(&self) -> Result<Score, PlanError> {
        let bp = &self.current_blueprint;
        let query_locations = Router::for_blueprint(bp).route_workload(&self.next_workload);
        let layout = CandidateLayout {
            query_locations: &query_locations,
            table_locations: bp.table_locations(),
            oltp_row_provisioning: bp.oltp_row_provisioning(),
            warehouse_provisioning: bp.warehouse_provisioning(),
        };
        self.score(&layout, TableMovement::NONE)
    }

    /// Predicted base latencies and arrival counts of the non-priming queries routed to `engine`.
    fn base_latencies(&self, query_locations: &[Vec<usize>; 3], engine: Engine) -> (Vec<f64>, Vec<f64>) {
        query_locations[engine.index()]
            .iter()
            .filter(|idx| !self.next_workload.analytical_queries()[**idx].is_priming)
            .map(|idx| {
                (
                    self.next_workload.predicted_latency(*idx, engine),
                    self.next_workload.arrival_count(*idx),
                )
            })
            .unzip()
    }
}

/// Hourly scan cost of a workload's analytical queries under a routing.
pub fn hourly_scan_cost(
    workload: &Workload, query_locations: &[Vec<usize>; 3], metrics: &Metrics, oltp_row_has_replicas: bool,
    settings: &PlannerSettings,
) -> f64 {
    let per_period = serverless::scan_cost(workload, &query_locations[Engine::Serverless.index()], &settings.serverless)
        + oltp_row::scan_cost(
            workload,
            &query_locations[Engine::OltpRow.index()],
            metrics,
            oltp_row_has_replicas,
            &settings.oltp_row,
        );

    let period_secs = workload.period().as_secs_f64();
    if period_secs <= 0.0 {
        per_period
    } else {
        per_period * 3600.0 / period_secs
    }
}
