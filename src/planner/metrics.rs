use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::elements::Timestamp;
use crate::error::PlanError;

/// Observed system metrics a replan is scored against. CPU values are percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// Per-node CPU utilization of the warehouse cluster.
    pub warehouse_cpu_list: Vec<f64>,
    pub warehouse_cpu_avg: f64,
    pub oltp_row_writer_cpu_avg: f64,
    pub oltp_row_reader_cpu_avg: f64,
    pub oltp_row_writer_buffer_hit_pct_avg: f64,
    pub oltp_row_reader_buffer_hit_pct_avg: f64,
    pub oltp_row_writer_load_minute_avg: f64,
    pub oltp_row_reader_load_minute_avg: f64,
    pub txn_completions_per_s: f64,
    pub txn_lat_s_p50: f64,
    pub txn_lat_s_p90: f64,
    pub query_lat_s_p50: f64,
    pub query_lat_s_p90: f64,
}

impl Metrics {
    pub fn from_json_slice(data: &[u8]) -> Result<Self, PlanError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Names of the per-epoch metric series triggers inspect.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MetricSeries {
    OltpRowWriterCpuAvg,
    OltpRowReaderCpuAvg,
    WarehouseCpuAvg,
    QueryLatencyP90,
    TxnLatencyP90,
}

#[async_trait]
pub trait MetricsProvider: Debug + Sync + Send {
    /// Most recent metrics and the instant they were observed.
    async fn get_metrics(&self) -> Result<(Metrics, Timestamp), PlanError>;

    /// Up to `k` most recent epochs of a series, oldest first.
    async fn read_k_most_recent(&self, k: usize, series: MetricSeries) -> Result<Vec<f64>, PlanError>;

    /// Up to `k` forecasted epochs of a series, nearest first.
    async fn read_k_upcoming(&self, k: usize, series: MetricSeries) -> Result<Vec<f64>, PlanError>;
}

/// In-memory provider over fixed observations.
#[derive(Debug, Clone, Default)]
pub struct FixedMetricsProvider {
    metrics: Metrics,
    timestamp: Timestamp,
    history: HashMap<MetricSeries, Vec<f64>>,
    forecast: HashMap<MetricSeries, Vec<f64>>,
}

impl FixedMetricsProvider {
    pub fn new(metrics: Metrics, timestamp: Timestamp) -> Self {
        Self { metrics, timestamp, ..Self::default() }
    }

    #[must_use]
    pub fn with_history(mut self, series: MetricSeries, values: Vec<f64>) -> Self {
        self.history.insert(series, values);
        self
    }

    #[must_use]
    pub fn with_forecast(mut self, series: MetricSeries, values: Vec<f64>) -> Self {
        self.forecast.insert(series, values);
        self
    }

    pub fn set_metrics(&mut self, metrics: Metrics, timestamp: Timestamp) {
        self.metrics = metrics;
        self.timestamp = timestamp;
    }
}

#[async_trait]
impl MetricsProvider for FixedMetricsProvider {
    async fn get_metrics(&self) -> Result<(Metrics, Timestamp), PlanError> {
        Ok((self.metrics.clone(), self.timestamp))
    }

    async fn read_k_most_recent(&self, k: usize, series: MetricSeries) -> Result<Vec<f64>, PlanError> {
        let values = self.history.get(&series).map(|v| v.as_slice()).unwrap_or(&[]);
        let skip = values.len().saturating_sub(k);
        Ok(values[skip..].to_vec())
    }

    async fn read_k_upcoming(&self, k: usize, series: MetricSeries) -> Result<Vec<f64>, PlanError> {
        let values = self.forecast.get(&series).map(|v| v.as_slice()).unwrap_or(&[]);
        Ok(values.iter().take(k).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim::*;
    use pretty_assertions::assert_eq;
    use tokio_test::block_on;

    #[test]
    fn test_fixed_provider_windows() {
        block_on(async {
            let provider = FixedMetricsProvider::new(Metrics::default(), Timestamp::from_secs(10))
                .with_history(MetricSeries::WarehouseCpuAvg, vec![10.0, 20.0, 30.0, 40.0])
                .with_forecast(MetricSeries::WarehouseCpuAvg, vec![50.0, 60.0]);

            let recent = assert_ok!(provider.read_k_most_recent(2, MetricSeries::WarehouseCpuAvg).await);
            assert_eq!(recent, vec![30.0, 40.0]);
            let upcoming = assert_ok!(provider.read_k_upcoming(5, MetricSeries::WarehouseCpuAvg).await);
            assert_eq!(upcoming, vec![50.0, 60.0]);
            assert!(assert_ok!(provider.read_k_most_recent(3, MetricSeries::TxnLatencyP90).await).is_empty());

            let (_, at) = assert_ok!(provider.get_metrics().await);
            assert_eq!(at, Timestamp::from_secs(10));
        });
    }

    #[test]
    fn test_metrics_json_defaults() -> anyhow::Result<()> {
        let m = Metrics::from_json_slice(br#"{"warehouse_cpu_list": [40.0, 60.0], "txn_lat_s_p90": 0.02}"#)?;
        assert_eq!(m.warehouse_cpu_list, vec![40.0, 60.0]);
        assert_eq!(m.txn_lat_s_p90, 0.02);
        assert_eq!(m.oltp_row_writer_cpu_avg, 0.0);
        Ok(())
    }
}
