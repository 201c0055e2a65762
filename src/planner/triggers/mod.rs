use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::metrics::MetricsProvider;
use super::providers::{DataAccessProvider, WorkloadProvider};
use crate::blueprint::Blueprint;
use crate::elements::Timestamp;
use crate::error::PlanError;
use crate::planner::metrics::MetricSeries;
use crate::planner::scoring::Score;
use crate::settings::Settings;

mod elapsed_time;
mod latency_ceiling;
mod metric_threshold;
mod recent_change;
mod variable_costs;

pub use elapsed_time::ElapsedTimeTrigger;
pub use latency_ceiling::LatencyCeilingTrigger;
pub use metric_threshold::MetricThresholdTrigger;
pub use recent_change::RecentChangeTrigger;
pub use variable_costs::VariableCostsTrigger;

/// A condition that asks the planner to replan. Every method takes the instant it is evaluated at.
#[async_trait]
pub trait Trigger: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn base(&self) -> &TriggerBase;
    fn base_mut(&mut self) -> &mut TriggerBase;

    async fn should_replan(&mut self, now: Timestamp) -> Result<bool, PlanError>;

    /// Called with the blueprint that became active, and the score it was chosen with if any.
    fn update_blueprint(&mut self, blueprint: &Blueprint, score: Option<&Score>, now: Timestamp) {
        self.base_mut().update_blueprint(blueprint, score, now);
    }

    /// Called after any replan ran; `fired_by` names the trigger responsible, `None` for a manual replan.
    fn on_replan(&mut self, fired_by: Option<&str>, now: Timestamp) {
        tracing::debug!(trigger=%self.name(), ?fired_by, "resetting trigger cutoff after replan");
        self.base_mut().reset_cutoff(now);
    }
}

/// State every trigger shares: the blueprint it last saw and the cutoff instant its observations start from.
#[derive(Debug, Clone)]
pub struct TriggerBase {
    epoch_length: Duration,
    observe_bp_delay: Duration,
    cutoff: Timestamp,
    current_blueprint: Option<Blueprint>,
    current_score: Option<Score>,
}

impl TriggerBase {
    pub fn new(epoch_length: Duration, observe_bp_delay: Duration, now: Timestamp) -> Self {
        Self {
            epoch_length,
            observe_bp_delay,
            cutoff: now,
            current_blueprint: None,
            current_score: None,
        }
    }

    pub const fn epoch_length(&self) -> Duration {
        self.epoch_length
    }

    pub const fn cutoff(&self) -> Timestamp {
        self.cutoff
    }

    pub fn current_blueprint(&self) -> Option<&Blueprint> {
        self.current_blueprint.as_ref()
    }

    pub fn current_score(&self) -> Option<&Score> {
        self.current_score.as_ref()
    }

    /// One epoch plus the delay before metrics reflect a new blueprint.
    pub fn total_delay(&self) -> Duration {
        self.epoch_length + self.observe_bp_delay
    }

    /// Observations made before the cutoff plus the total delay still describe the previous blueprint.
    pub fn passed_delays_since_cutoff(&self, now: Timestamp) -> bool {
        self.cutoff + self.total_delay() < now
    }

    pub fn reset_cutoff(&mut self, now: Timestamp) {
        self.cutoff = now;
    }

    pub fn update_blueprint(&mut self, blueprint: &Blueprint, score: Option<&Score>, now: Timestamp) {
        self.current_blueprint = Some(blueprint.clone());
        self.current_score = score.cloned();
        self.reset_cutoff(now);
    }
}

/// Whether the last `sustained` values exist and all satisfy `predicate`.
pub(crate) fn sustained_for(values: &[f64], sustained: usize, predicate: impl Fn(f64) -> bool) -> bool {
    let sustained = sustained.max(1);
    sustained <= values.len() && values[values.len() - sustained..].iter().all(|v| predicate(*v))
}

/// Builds the triggers enabled in the settings.
pub fn make_triggers(
    settings: &Settings, metrics: Arc<dyn MetricsProvider>, workloads: Arc<dyn WorkloadProvider>,
    data_access: Arc<dyn DataAccessProvider>, now: Timestamp,
) -> Vec<Box<dyn Trigger>> {
    let config = &settings.triggers;
    if !config.enabled {
        return Vec::new();
    }

    let base = TriggerBase::new(config.epoch_length, config.observe_bp_delay, now);
    let mut triggers: Vec<Box<dyn Trigger>> = Vec::new();

    if let Some(elapsed) = config.elapsed_time {
        let period = settings.planner.planning_window * elapsed.multiplier;
        triggers.push(Box::new(ElapsedTimeTrigger::new(base.clone(), period)));
    }

    if let Some(cpu) = config.oltp_row_cpu {
        triggers.push(Box::new(MetricThresholdTrigger::new(
            "oltp_row_cpu",
            base.clone(),
            metrics.clone(),
            MetricSeries::OltpRowWriterCpuAvg,
            cpu,
        )));
    }

    if let Some(cpu) = config.warehouse_cpu {
        triggers.push(Box::new(MetricThresholdTrigger::new(
            "warehouse_cpu",
            base.clone(),
            metrics.clone(),
            MetricSeries::WarehouseCpuAvg,
            cpu,
        )));
    }

    if let Some(ceiling) = config.query_latency_ceiling {
        triggers.push(Box::new(LatencyCeilingTrigger::new(
            "query_latency_ceiling",
            base.clone(),
            metrics.clone(),
            MetricSeries::QueryLatencyP90,
            ceiling,
        )));
    }

    if let Some(ceiling) = config.txn_latency_ceiling {
        triggers.push(Box::new(LatencyCeilingTrigger::new(
            "txn_latency_ceiling",
            base.clone(),
            metrics.clone(),
            MetricSeries::TxnLatencyP90,
            ceiling,
        )));
    }

    if let Some(recent) = config.recent_change {
        triggers.push(Box::new(RecentChangeTrigger::new(base.clone(), recent.delay_epochs)));
    }

    if let Some(costs) = config.variable_costs {
        triggers.push(Box::new(VariableCostsTrigger::new(
            base,
            costs.threshold,
            settings.planner.clone(),
            metrics,
            workloads,
            data_access,
        )));
    }

    tracing::info!(
        triggers=?triggers.iter().map(|t| t.name()).collect::<Vec<_>>(),
        "configured replan triggers"
    );
    triggers
}
