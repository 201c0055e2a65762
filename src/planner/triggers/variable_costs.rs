use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Trigger, TriggerBase};
use crate::elements::Timestamp;
use crate::error::PlanError;
use crate::planner::metrics::MetricsProvider;
use crate::planner::providers::{DataAccessProvider, WorkloadProvider};
use crate::planner::router::Router;
use crate::planner::scoring::hourly_scan_cost;
use crate::settings::PlannerSettings;

/// Hourly costs at or below this are treated as zero.
const NEGLIGIBLE_COST: f64 = 1e-5;

/// Fires when the scan cost of the current blueprint under the latest workload drifts from the scan cost it was
/// chosen with by more than a ratio, in either direction.
#[derive(Debug, Clone)]
pub struct VariableCostsTrigger {
    base: TriggerBase,
    threshold: f64,
    planner: PlannerSettings,
    metrics: Arc<dyn MetricsProvider>,
    workloads: Arc<dyn WorkloadProvider>,
    data_access: Arc<dyn DataAccessProvider>,
}

impl VariableCostsTrigger {
    pub fn new(
        base: TriggerBase, threshold: f64, planner: PlannerSettings, metrics: Arc<dyn MetricsProvider>,
        workloads: Arc<dyn WorkloadProvider>, data_access: Arc<dyn DataAccessProvider>,
    ) -> Self {
        Self { base, threshold, planner, metrics, workloads, data_access }
    }

    /// Hourly scan cost of the most recently observed workload routed under the current blueprint.
    pub async fn estimate_current_scan_cost(&self, now: Timestamp) -> Result<f64, PlanError> {
        let Some(blueprint) = self.base.current_blueprint() else {
            return Ok(0.0);
        };

        let (mut workload, _) = self.workloads.get_workloads(now, 1, Duration::from_secs(3600)).await?;
        if workload.analytical_queries().is_empty() {
            return Ok(0.0);
        }
        self.data_access.apply_access_statistics(&mut workload).await?;

        let locations = Router::for_blueprint(blueprint).route_workload(&workload);
        let (metrics, _) = self.metrics.get_metrics().await?;
        let has_replicas = 0 < blueprint.oltp_row_provisioning().num_replicas();
        Ok(hourly_scan_cost(&workload, &locations, &metrics, has_replicas, &self.planner))
    }
}

#[async_trait]
impl Trigger for VariableCostsTrigger {
    fn name(&self) -> &'static str {
        "variable_costs"
    }

    fn base(&self) -> &TriggerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TriggerBase {
        &mut self.base
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn should_replan(&mut self, now: Timestamp) -> Result<bool, PlanError> {
        let Some(estimated) = self.base.current_score().map(|s| s.scan_cost) else {
            tracing::debug!("variable costs trigger has no reference score");
            return Ok(false);
        };

        if !self.base.passed_delays_since_cutoff(now) {
            tracing::debug!("skipping variable costs trigger because the delay cutoff has not passed");
            return Ok(false);
        }

        let current = self.estimate_current_scan_cost(now).await?;
        if current <= NEGLIGIBLE_COST {
            tracing::debug!(%current, "current hourly scan cost is negligible");
            return Ok(false);
        }

        let ratio = if estimated <= NEGLIGIBLE_COST {
            f64::INFINITY
        } else {
            (current / estimated).max(estimated / current)
        };

        if self.threshold < ratio {
            tracing::info!(
                %estimated, %current, %ratio, threshold=%self.threshold,
                "triggering replan because variable costs changed"
            );
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{Blueprint, Provisioning, RoutingPolicy, Table};
    use crate::elements::{Engine, EngineSet};
    use crate::planner::metrics::{FixedMetricsProvider, Metrics};
    use crate::planner::providers::{FixedWorkloadProvider, PrecomputedDataAccess};
    use crate::planner::scoring::Score;
    use crate::planner::workload::{Query, Workload};
    use approx::assert_relative_eq;
    use claim::*;
    use tokio_test::block_on;

    fn trigger(scanned_mb: f64) -> VariableCostsTrigger {
        let query = "SELECT * FROM events";
        let workload = Workload::new(
            Duration::from_secs(3600),
            vec![Query::new(query, 10.0)],
            vec![],
            Default::default(),
        );
        let mut access = PrecomputedDataAccess::default();
        access.insert(query, scanned_mb * 1_000_000.0, 0.0);

        let base = TriggerBase::new(Duration::from_secs(300), Duration::from_secs(600), Timestamp::from_secs(0));
        VariableCostsTrigger::new(
            base,
            1.2,
            PlannerSettings::default(),
            Arc::new(FixedMetricsProvider::new(Metrics::default(), Timestamp::from_secs(0))),
            Arc::new(FixedWorkloadProvider::steady(workload)),
            Arc::new(access),
        )
    }

    fn blueprint() -> Blueprint {
        Blueprint::new(
            "test",
            vec![Table::new("events", vec![])],
            maplit::btreemap! { "events".to_string() => EngineSet::single(Engine::Serverless) },
            Provisioning::new("db.r6g.large", 1),
            Provisioning::new("dc2.large", 0),
            RoutingPolicy::default(),
        )
    }

    #[test]
    fn test_fires_on_scan_cost_drift() {
        let later = Timestamp::from_secs(5_000);
        block_on(async {
            let mut without_reference = trigger(100.0);
            assert!(!assert_ok!(without_reference.should_replan(later).await));

            let mut steady = trigger(100.0);
            steady.update_blueprint(&blueprint(), None, Timestamp::from_secs(0));
            let current = assert_ok!(steady.estimate_current_scan_cost(later).await);
            assert!(0.0 < current);

            let chosen_with = Score { scan_cost: current * 1.1, ..Score::default() };
            steady.update_blueprint(&blueprint(), Some(&chosen_with), Timestamp::from_secs(0));
            assert!(!assert_ok!(steady.should_replan(later).await));

            let mut drifted = trigger(1_000.0);
            drifted.update_blueprint(&blueprint(), Some(&chosen_with), Timestamp::from_secs(0));
            let drifted_cost = assert_ok!(drifted.estimate_current_scan_cost(later).await);
            assert_relative_eq!(drifted_cost, current * 10.0, max_relative = 1e-9);
            assert!(assert_ok!(drifted.should_replan(later).await));
        });
    }
}
