use std::sync::Arc;

use async_trait::async_trait;

use super::{sustained_for, Trigger, TriggerBase};
use crate::elements::Timestamp;
use crate::error::PlanError;
use crate::planner::metrics::{MetricSeries, MetricsProvider};
use crate::settings::MetricThresholdSettings;

/// Fires when a utilization series stays outside `[lo, hi]` for a run of consecutive epochs, observed or
/// forecasted.
#[derive(Debug, Clone)]
pub struct MetricThresholdTrigger {
    name: &'static str,
    base: TriggerBase,
    metrics: Arc<dyn MetricsProvider>,
    series: MetricSeries,
    settings: MetricThresholdSettings,
}

impl MetricThresholdTrigger {
    pub fn new(
        name: &'static str, base: TriggerBase, metrics: Arc<dyn MetricsProvider>, series: MetricSeries,
        settings: MetricThresholdSettings,
    ) -> Self {
        Self { name, base, metrics, series, settings }
    }

    fn is_out_of_range(&self, value: f64) -> bool {
        value < self.settings.lo || self.settings.hi < value
    }
}

#[async_trait]
impl Trigger for MetricThresholdTrigger {
    fn name(&self) -> &'static str {
        self.name
    }

    fn base(&self) -> &TriggerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TriggerBase {
        &mut self.base
    }

    #[tracing::instrument(level = "debug", skip(self), fields(trigger=%self.name))]
    async fn should_replan(&mut self, now: Timestamp) -> Result<bool, PlanError> {
        if !self.base.passed_delays_since_cutoff(now) {
            tracing::debug!("skipping trigger because the delay cutoff has not passed");
            return Ok(false);
        }

        let sustained = self.settings.sustained_epochs;
        let observed = self.metrics.read_k_most_recent(sustained, self.series).await?;
        if sustained_for(&observed, sustained, |v| self.is_out_of_range(v)) {
            tracing::info!(
                series=%self.series, latest=?observed.last(), lo=%self.settings.lo, hi=%self.settings.hi,
                "triggering replan because utilization is out of range"
            );
            return Ok(true);
        }

        let Some(lookahead) = self.settings.lookahead_epochs else {
            return Ok(false);
        };

        let forecast = self.metrics.read_k_upcoming(lookahead, self.series).await?;
        if sustained_for(&forecast, sustained, |v| self.is_out_of_range(v)) {
            tracing::info!(
                series=%self.series, latest=?forecast.last(), lo=%self.settings.lo, hi=%self.settings.hi,
                "triggering replan because utilization is forecasted out of range"
            );
            return Ok(true);
        }

        Ok(false)
    }
}
