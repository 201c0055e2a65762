use std::sync::Arc;

use async_trait::async_trait;

use super::{sustained_for, Trigger, TriggerBase};
use crate::elements::Timestamp;
use crate::error::PlanError;
use crate::planner::metrics::{MetricSeries, MetricsProvider};
use crate::settings::LatencyCeilingSettings;

/// Fires when a p90 latency series stays above its ceiling for a run of consecutive epochs, observed or
/// forecasted.
#[derive(Debug, Clone)]
pub struct LatencyCeilingTrigger {
    name: &'static str,
    base: TriggerBase,
    metrics: Arc<dyn MetricsProvider>,
    series: MetricSeries,
    settings: LatencyCeilingSettings,
}

impl LatencyCeilingTrigger {
    pub fn new(
        name: &'static str, base: TriggerBase, metrics: Arc<dyn MetricsProvider>, series: MetricSeries,
        settings: LatencyCeilingSettings,
    ) -> Self {
        Self { name, base, metrics, series, settings }
    }
}

#[async_trait]
impl Trigger for LatencyCeilingTrigger {
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

        let ceiling = self.settings.ceiling_s;
        let sustained = self.settings.sustained_epochs;
        let observed = self.metrics.read_k_most_recent(sustained, self.series).await?;
        if sustained_for(&observed, sustained, |v| ceiling < v) {
            tracing::info!(
                series=%self.series, latest=?observed.last(), %ceiling,
                "triggering replan because latency is above its ceiling"
            );
            return Ok(true);
        }

        let Some(lookahead) = self.settings.lookahead_epochs else {
            return Ok(false);
        };

        let forecast = self.metrics.read_k_upcoming(lookahead, self.series).await?;
        if sustained_for(&forecast, sustained, |v| ceiling < v) {
            tracing::info!(
                series=%self.series, latest=?forecast.last(), %ceiling,
                "triggering replan because latency is forecasted above its ceiling"
            );
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::metrics::{FixedMetricsProvider, Metrics};
    use claim::*;
    use std::time::Duration;
    use tokio_test::block_on;

    #[test]
    fn test_txn_latency_above_ceiling() {
        let later = Timestamp::from_secs(2_000);
        let base = TriggerBase::new(Duration::from_secs(300), Duration::from_secs(600), Timestamp::from_secs(0));
        let provider = FixedMetricsProvider::new(Metrics::default(), later)
            .with_history(MetricSeries::TxnLatencyP90, vec![0.010, 0.040, 0.035]);
        let mut trigger = LatencyCeilingTrigger::new(
            "txn_latency_ceiling",
            base,
            Arc::new(provider),
            MetricSeries::TxnLatencyP90,
            LatencyCeilingSettings { ceiling_s: 0.030, sustained_epochs: 2, lookahead_epochs: None },
        );

        block_on(async {
            assert!(assert_ok!(trigger.should_replan(later).await));

            trigger.on_replan(Some("txn_latency_ceiling"), later);
            assert!(!assert_ok!(trigger.should_replan(later + Duration::from_secs(60)).await));
        });
    }
}
