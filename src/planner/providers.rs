use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::workload::{Query, Workload};
use crate::blueprint::normalize_query_text;
use crate::elements::Timestamp;
use crate::error::PlanError;

#[async_trait]
pub trait WorkloadProvider: Debug + Sync + Send {
    /// The workload observed over the last `window_multiplier` planning windows and the workload forecasted for
    /// the next period, both expressed over `desired_period`.
    async fn get_workloads(
        &self, as_of: Timestamp, window_multiplier: u32, desired_period: Duration,
    ) -> Result<(Workload, Workload), PlanError>;
}

/// Serves the same observed and forecasted workloads on every call.
#[derive(Debug, Clone)]
pub struct FixedWorkloadProvider {
    current: Workload,
    next: Workload,
}

impl FixedWorkloadProvider {
    pub fn new(current: Workload, next: Workload) -> Self {
        Self { current, next }
    }

    /// Forecasts the observed workload unchanged.
    pub fn steady(workload: Workload) -> Self {
        Self { current: workload.clone(), next: workload }
    }
}

#[async_trait]
impl WorkloadProvider for FixedWorkloadProvider {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_workloads(
        &self, _as_of: Timestamp, _window_multiplier: u32, desired_period: Duration,
    ) -> Result<(Workload, Workload), PlanError> {
        Ok((self.current.rescaled_to(desired_period), self.next.rescaled_to(desired_period)))
    }
}

/// Attaches per-engine latency predictions to a workload's analytical queries.
#[async_trait]
pub trait AnalyticsLatencyScorer: Debug + Sync + Send {
    async fn apply_predicted_latencies(&self, workload: &mut Workload) -> Result<(), PlanError>;
}

/// Attaches predicted serverless bytes scanned and OLTP pages accessed to a workload's analytical queries.
#[async_trait]
pub trait DataAccessProvider: Debug + Sync + Send {
    async fn apply_access_statistics(&self, workload: &mut Workload) -> Result<(), PlanError>;
}

/// Latency predictions looked up by normalized query text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrecomputedLatencies(HashMap<String, [f64; 3]>);

impl PrecomputedLatencies {
    pub fn insert(&mut self, query_text: &str, latencies: [f64; 3]) {
        self.0.insert(normalize_query_text(query_text), latencies);
    }
}

impl FromIterator<(String, [f64; 3])> for PrecomputedLatencies {
    fn from_iter<T: IntoIterator<Item = (String, [f64; 3])>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(q, l)| (normalize_query_text(&q), l)).collect())
    }
}

#[async_trait]
impl AnalyticsLatencyScorer for PrecomputedLatencies {
    async fn apply_predicted_latencies(&self, workload: &mut Workload) -> Result<(), PlanError> {
        let predictions = workload
            .analytical_queries()
            .iter()
            .map(|q| {
                if q.is_priming {
                    return Ok([0.0; 3]);
                }

                self.0
                    .get(&normalize_query_text(&q.raw_query))
                    .copied()
                    .ok_or_else(|| PlanError::WorkloadUnavailable(format!("no latency prediction for: {}", q.raw_query)))
            })
            .collect::<Result<Vec<_>, PlanError>>()?;

        workload.set_predicted_latencies(predictions)
    }
}

/// Data access statistics looked up by normalized query text; unknown queries access nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrecomputedDataAccess {
    pub serverless_bytes: HashMap<String, f64>,
    pub oltp_row_pages: HashMap<String, f64>,
}

impl PrecomputedDataAccess {
    pub fn insert(&mut self, query_text: &str, serverless_bytes: f64, oltp_row_pages: f64) {
        let key = normalize_query_text(query_text);
        self.serverless_bytes.insert(key.clone(), serverless_bytes);
        self.oltp_row_pages.insert(key, oltp_row_pages);
    }
}

#[async_trait]
impl DataAccessProvider for PrecomputedDataAccess {
    async fn apply_access_statistics(&self, workload: &mut Workload) -> Result<(), PlanError> {
        let keys: Vec<String> = workload
            .analytical_queries()
            .iter()
            .map(|q| normalize_query_text(&q.raw_query))
            .collect();

        let bytes = keys.iter().map(|k| self.serverless_bytes.get(k).copied().unwrap_or(0.0)).collect();
        let pages = keys.iter().map(|k| self.oltp_row_pages.get(k).copied().unwrap_or(0.0)).collect();
        workload.set_predicted_data_access(bytes, pages)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOp {
    SequentialScan,
    IndexScan,
}

/// Estimated access of one table by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessInfo {
    pub table: String,
    pub cardinality: f64,
    pub selectivity: f64,
    pub width: f64,
    pub op: AccessOp,
}

/// Per-table cardinality and selectivity estimates, typically backed by an engine's optimizer statistics.
#[async_trait]
pub trait Estimator: Debug + Sync + Send {
    async fn get_access_info(&self, query: &Query) -> Result<Vec<AccessInfo>, PlanError>;
}

const OLTP_ROW_PAGE_SIZE_BYTES: f64 = 8192.0;

/// Derives data access statistics from an [`Estimator`]: sequential scans touch every row and index scans only the
/// selected rows, while the serverless engine always reads the referenced columns in full.
#[derive(Debug)]
pub struct EstimatedDataAccess<E: Estimator> {
    estimator: E,
}

impl<E: Estimator> EstimatedDataAccess<E> {
    pub fn new(estimator: E) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl<E: Estimator> DataAccessProvider for EstimatedDataAccess<E> {
    #[tracing::instrument(level = "debug", skip(self, workload))]
    async fn apply_access_statistics(&self, workload: &mut Workload) -> Result<(), PlanError> {
        let mut serverless_bytes = Vec::with_capacity(workload.analytical_queries().len());
        let mut oltp_row_pages = Vec::with_capacity(workload.analytical_queries().len());

        for query in workload.analytical_queries() {
            let infos = if query.is_priming {
                Vec::new()
            } else {
                self.estimator.get_access_info(query).await?
            };

            let bytes: f64 = infos.iter().map(|i| i.cardinality * i.width).sum();
            let pages: f64 = infos
                .iter()
                .map(|i| {
                    let rows = match i.op {
                        AccessOp::SequentialScan => i.cardinality,
                        AccessOp::IndexScan => i.cardinality * i.selectivity,
                    };
                    (rows * i.width / OLTP_ROW_PAGE_SIZE_BYTES).ceil()
                })
                .sum();

            serverless_bytes.push(bytes);
            oltp_row_pages.push(pages);
        }

        workload.set_predicted_data_access(serverless_bytes, oltp_row_pages)
    }
}
