use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::elements::{Engine, EngineSet};
use crate::error::PlanError;

/// Engine features a query may depend on.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueryCapability {
    Geospatial,
    VectorSimilarity,
}

impl QueryCapability {
    pub fn supported_by(&self) -> EngineSet {
        match self {
            Self::Geospatial => EngineSet::of([Engine::OltpRow, Engine::Serverless]),
            Self::VectorSimilarity => EngineSet::single(Engine::OltpRow),
        }
    }
}

static TABLE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:from|join|into|update)\s+"?([a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)"?"#)
        .expect("failed to compile table reference regex")
});

static DATA_MODIFICATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:insert|update|delete|merge|upsert)\b").expect("failed to compile DML regex")
});

static GEOSPATIAL_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bst_[a-z]+\s*\(").expect("failed to compile geospatial regex"));

/// Tables referenced in `FROM`, `JOIN`, `INTO` and `UPDATE` clauses. Names of CTEs and subquery aliases are
/// included; callers ignore names they do not know.
pub fn extract_table_names(raw_query: &str) -> Vec<String> {
    let names: BTreeSet<String> = TABLE_REFERENCE
        .captures_iter(raw_query)
        .filter_map(|c| c.get(1))
        .map(|m| {
            let name = m.as_str();
            let unqualified = name.rsplit('.').next().unwrap_or(name);
            unqualified.to_lowercase()
        })
        .filter(|name| !matches!(name.as_str(), "select" | "lateral" | "unnest"))
        .collect();

    names.into_iter().collect()
}

pub fn detect_capabilities(raw_query: &str) -> Vec<QueryCapability> {
    let mut capabilities = Vec::new();
    if GEOSPATIAL_FUNCTION.is_match(raw_query) {
        capabilities.push(QueryCapability::Geospatial);
    }
    if raw_query.contains("<->") || raw_query.contains("<=>") || raw_query.contains("<#>") {
        capabilities.push(QueryCapability::VectorSimilarity);
    }
    capabilities
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub raw_query: String,

    /// Arrivals over the workload's period.
    pub arrival_count: f64,

    #[serde(default)]
    pub tables: Vec<String>,

    #[serde(default)]
    pub is_data_modification: bool,

    #[serde(default)]
    pub capabilities: Vec<QueryCapability>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_priming: bool,
}

impl Query {
    /// Scans the text for referenced tables, data modification and required capabilities.
    pub fn new(raw_query: impl Into<String>, arrival_count: f64) -> Self {
        let raw_query = raw_query.into();
        Self {
            tables: extract_table_names(&raw_query),
            is_data_modification: DATA_MODIFICATION.is_match(&raw_query),
            capabilities: detect_capabilities(&raw_query),
            raw_query,
            arrival_count,
            is_priming: false,
        }
    }

    pub fn with_tables(raw_query: impl Into<String>, arrival_count: f64, tables: Vec<String>) -> Self {
        Self { tables, ..Self::new(raw_query, arrival_count) }
    }

    /// Zero-arrival query over every table; routing it forces all tables onto a single engine.
    pub fn priming(tables: Vec<String>) -> Self {
        Self {
            raw_query: format!("-- priming query over {} tables", tables.len()),
            arrival_count: 0.0,
            tables,
            is_data_modification: false,
            capabilities: Vec::new(),
            is_priming: true,
        }
    }

    /// Engines able to execute this query given its required capabilities.
    pub fn supported_engines(&self) -> EngineSet {
        self.capabilities
            .iter()
            .fold(EngineSet::ALL, |acc, c| acc.intersection(c.supported_by()))
    }

    fn fill_in_scan(&mut self) {
        if self.tables.is_empty() {
            self.tables = extract_table_names(&self.raw_query);
        }
        if !self.is_data_modification {
            self.is_data_modification = DATA_MODIFICATION.is_match(&self.raw_query);
        }
        if self.capabilities.is_empty() {
            self.capabilities = detect_capabilities(&self.raw_query);
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    pub num_rows: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_per_row: Option<f64>,
}

/// A period of analytical and transactional queries plus per-table sizes. Planner-derived predictions stay
/// index-aligned with `analytical_queries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(
        rename = "period_secs",
        serialize_with = "crate::serde::serialize_duration_secs",
        deserialize_with = "crate::serde::deserialize_duration_secs"
    )]
    period: Duration,

    #[serde(default)]
    analytical_queries: Vec<Query>,

    #[serde(default)]
    transactional_queries: Vec<Query>,

    #[serde(default)]
    table_stats: BTreeMap<String, TableStats>,

    /// Per query: predicted latency in seconds on each engine, in [`Engine::index`] order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    predicted_latencies: Option<Vec<[f64; 3]>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    predicted_serverless_bytes: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    predicted_oltp_row_pages: Option<Vec<f64>>,
}

impl Workload {
    pub fn new(
        period: Duration, analytical_queries: Vec<Query>, transactional_queries: Vec<Query>,
        table_stats: BTreeMap<String, TableStats>,
    ) -> Self {
        Self {
            period,
            analytical_queries,
            transactional_queries,
            table_stats,
            predicted_latencies: None,
            predicted_serverless_bytes: None,
            predicted_oltp_row_pages: None,
        }
    }

    /// Reads a workload from JSON, filling in any table references and flags the file left out.
    pub fn from_json_slice(data: &[u8]) -> Result<Self, PlanError> {
        let mut workload: Self = serde_json::from_slice(data)?;
        workload
            .analytical_queries
            .iter_mut()
            .chain(workload.transactional_queries.iter_mut())
            .for_each(Query::fill_in_scan);
        workload.validate_alignment()?;
        Ok(workload)
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Same workload over a different period, with arrivals scaled proportionally.
    #[must_use]
    pub fn rescaled_to(&self, period: Duration) -> Self {
        let factor = if self.period.is_zero() {
            1.0
        } else {
            period.as_secs_f64() / self.period.as_secs_f64()
        };

        let mut result = self.clone();
        result.period = period;
        result
            .analytical_queries
            .iter_mut()
            .chain(result.transactional_queries.iter_mut())
            .for_each(|q| q.arrival_count *= factor);
        result
    }

    pub fn analytical_queries(&self) -> &[Query] {
        &self.analytical_queries
    }

    pub fn transactional_queries(&self) -> &[Query] {
        &self.transactional_queries
    }

    pub fn table_stats(&self) -> &BTreeMap<String, TableStats> {
        &self.table_stats
    }

    /// Zero for tables without statistics.
    pub fn table_num_rows(&self, table_name: &str) -> u64 {
        self.table_stats.get(table_name).map(|s| s.num_rows).unwrap_or(0)
    }

    /// Size in MB (10^6 bytes).
    pub fn table_size_mb(&self, table_name: &str, default_bytes_per_row: f64) -> f64 {
        self.table_stats
            .get(table_name)
            .map(|s| s.num_rows as f64 * s.bytes_per_row.unwrap_or(default_bytes_per_row) / 1_000_000.0)
            .unwrap_or(0.0)
    }

    pub fn arrival_count(&self, query_idx: usize) -> f64 {
        self.analytical_queries.get(query_idx).map(|q| q.arrival_count).unwrap_or(0.0)
    }

    pub fn arrival_counts(&self, query_indices: &[usize]) -> Vec<f64> {
        query_indices.iter().map(|idx| self.arrival_count(*idx)).collect()
    }

    pub fn has_predictions(&self) -> bool {
        self.predicted_latencies.is_some()
    }

    pub fn set_predicted_latencies(&mut self, predictions: Vec<[f64; 3]>) -> Result<(), PlanError> {
        self.check_alignment("analytical latencies", predictions.len())?;
        self.predicted_latencies = Some(predictions);
        Ok(())
    }

    pub fn set_predicted_data_access(
        &mut self, serverless_bytes: Vec<f64>, oltp_row_pages: Vec<f64>,
    ) -> Result<(), PlanError> {
        self.check_alignment("serverless bytes scanned", serverless_bytes.len())?;
        self.check_alignment("oltp_row pages accessed", oltp_row_pages.len())?;
        self.predicted_serverless_bytes = Some(serverless_bytes);
        self.predicted_oltp_row_pages = Some(oltp_row_pages);
        Ok(())
    }

    /// Zero when no prediction has been attached.
    pub fn predicted_latency(&self, query_idx: usize, engine: Engine) -> f64 {
        self.predicted_latencies
            .as_ref()
            .and_then(|p| p.get(query_idx))
            .map(|row| row[engine.index()])
            .unwrap_or(0.0)
    }

    pub fn predicted_serverless_bytes(&self, query_idx: usize) -> f64 {
        self.predicted_serverless_bytes
            .as_ref()
            .and_then(|p| p.get(query_idx).copied())
            .unwrap_or(0.0)
    }

    pub fn predicted_oltp_row_pages(&self, query_idx: usize) -> f64 {
        self.predicted_oltp_row_pages
            .as_ref()
            .and_then(|p| p.get(query_idx).copied())
            .unwrap_or(0.0)
    }

    /// Appends a zero-arrival query over every table. Derived arrays grow in lock-step with zeros.
    pub fn add_priming_analytical_query(&mut self, tables: Vec<String>) -> usize {
        self.analytical_queries.push(Query::priming(tables));
        if let Some(p) = self.predicted_latencies.as_mut() {
            p.push([0.0; 3]);
        }
        if let Some(p) = self.predicted_serverless_bytes.as_mut() {
            p.push(0.0);
        }
        if let Some(p) = self.predicted_oltp_row_pages.as_mut() {
            p.push(0.0);
        }
        self.analytical_queries.len() - 1
    }

    /// Per query, the largest ratio between any two engines' predicted latencies. Priming queries rank first.
    pub fn compute_latency_gains(&self) -> Vec<f64> {
        self.analytical_queries
            .iter()
            .enumerate()
            .map(|(idx, query)| {
                if query.is_priming {
                    return f64::INFINITY;
                }

                let latencies: Vec<f64> = Engine::ALL
                    .iter()
                    .filter(|e| query.supported_engines().contains(**e))
                    .map(|e| self.predicted_latency(idx, *e))
                    .filter(|lat| lat.is_finite() && 0.0 < *lat)
                    .collect();

                let max = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let min = latencies.iter().copied().fold(f64::INFINITY, f64::min);
                if latencies.is_empty() {
                    0.0
                } else {
                    max / min
                }
            })
            .collect()
    }

    /// Query indices ordered by descending gain, then by descending arrival count.
    pub fn queries_by_gain(&self) -> Vec<usize> {
        let gains = self.compute_latency_gains();
        let mut indices: Vec<usize> = (0..self.analytical_queries.len()).collect();
        indices.sort_by(|a, b| {
            gains[*b]
                .total_cmp(&gains[*a])
                .then_with(|| self.arrival_count(*b).total_cmp(&self.arrival_count(*a)))
        });
        indices
    }

    fn check_alignment(&self, what: &str, actual: usize) -> Result<(), PlanError> {
        if actual == self.analytical_queries.len() {
            Ok(())
        } else {
            Err(PlanError::MisalignedPredictions {
                what: what.to_string(),
                expected: self.analytical_queries.len(),
                actual,
            })
        }
    }

    fn validate_alignment(&self) -> Result<(), PlanError> {
        if let Some(p) = &self.predicted_latencies {
            self.check_alignment("analytical latencies", p.len())?;
        }
        if let Some(p) = &self.predicted_serverless_bytes {
            self.check_alignment("serverless bytes scanned", p.len())?;
        }
        if let Some(p) = &self.predicted_oltp_row_pages {
            self.check_alignment("oltp_row pages accessed", p.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use claim::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_scan() {
        let q = Query::new(
            "SELECT o.id FROM public.orders o JOIN Customers c ON o.cid = c.id WHERE ST_Within(c.loc, $1)",
            12.0,
        );
        assert_eq!(q.tables, vec!["customers".to_string(), "orders".to_string()]);
        assert!(!q.is_data_modification);
        assert_eq!(q.capabilities, vec![QueryCapability::Geospatial]);
        assert_eq!(q.supported_engines(), EngineSet::of([Engine::OltpRow, Engine::Serverless]));

        let dml = Query::new("  update orders SET total = 0 WHERE id = 4", 1.0);
        assert!(dml.is_data_modification);
        assert_eq!(dml.tables, vec!["orders".to_string()]);

        let insert = Query::new("INSERT INTO line_items SELECT * FROM staging", 1.0);
        assert_eq!(insert.tables, vec!["line_items".to_string(), "staging".to_string()]);

        let knn = Query::new("SELECT id FROM items ORDER BY embedding <-> $1 LIMIT 5", 1.0);
        assert_eq!(knn.supported_engines(), EngineSet::single(Engine::OltpRow));
    }

    fn workload() -> Workload {
        Workload::new(
            Duration::from_secs(3600),
            vec![
                Query::new("SELECT * FROM orders", 10.0),
                Query::new("SELECT * FROM customers", 20.0),
                Query::new("SELECT * FROM orders JOIN customers ON true", 5.0),
            ],
            vec![Query::new("UPDATE orders SET total = 1", 1000.0)],
            maplit::btreemap! {
                "orders".to_string() => TableStats { num_rows: 2_000_000, bytes_per_row: Some(50.0) },
                "customers".to_string() => TableStats { num_rows: 10_000, bytes_per_row: None },
            },
        )
    }

    #[test]
    fn test_predictions_stay_aligned() {
        let mut w = workload();
        let err = assert_err!(w.set_predicted_latencies(vec![[1.0, 1.0, 1.0]]));
        assert!(matches!(err, PlanError::MisalignedPredictions { expected: 3, actual: 1, .. }));

        assert_ok!(w.set_predicted_latencies(vec![[1.0, 2.0, 3.0], [4.0, 4.0, 4.0], [2.0, 10.0, 1.0]]));
        assert_ok!(w.set_predicted_data_access(vec![1e6, 2e6, 3e6], vec![10.0, 20.0, 30.0]));

        let priming_idx = w.add_priming_analytical_query(vec!["orders".to_string(), "customers".to_string()]);
        assert_eq!(priming_idx, 3);
        assert_eq!(w.analytical_queries().len(), 4);
        assert_relative_eq!(w.predicted_latency(priming_idx, Engine::Warehouse), 0.0);
        assert_relative_eq!(w.predicted_serverless_bytes(priming_idx), 0.0);
        assert_relative_eq!(w.predicted_oltp_row_pages(priming_idx), 0.0);
        assert_relative_eq!(w.arrival_count(priming_idx), 0.0);
    }

    #[test]
    fn test_queries_by_gain() {
        let mut w = workload();
        assert_ok!(w.set_predicted_latencies(vec![[1.0, 2.0, 3.0], [4.0, 4.0, 4.0], [2.0, 10.0, 1.0]]));
        let gains = w.compute_latency_gains();
        assert_relative_eq!(gains[0], 3.0);
        assert_relative_eq!(gains[1], 1.0);
        assert_relative_eq!(gains[2], 10.0);
        assert_eq!(w.queries_by_gain(), vec![2, 0, 1]);

        w.add_priming_analytical_query(vec!["orders".to_string()]);
        assert_eq!(w.queries_by_gain(), vec![3, 2, 0, 1]);
    }

    #[test]
    fn test_table_sizes_and_rescale() {
        let w = workload();
        assert_relative_eq!(w.table_size_mb("orders", 100.0), 100.0);
        assert_relative_eq!(w.table_size_mb("customers", 100.0), 1.0);
        assert_relative_eq!(w.table_size_mb("missing", 100.0), 0.0);
        assert_eq!(w.table_num_rows("orders"), 2_000_000);

        let half = w.rescaled_to(Duration::from_secs(1800));
        assert_relative_eq!(half.arrival_count(1), 10.0);
        assert_relative_eq!(half.transactional_queries()[0].arrival_count, 500.0);
    }

    #[test]
    fn test_workload_from_json_fills_scan() -> anyhow::Result<()> {
        let json = r#"{
            "period_secs": 3600,
            "analytical_queries": [{"raw_query": "SELECT count(*) FROM orders", "arrival_count": 3.0}],
            "transactional_queries": [{"raw_query": "DELETE FROM carts WHERE id = 1", "arrival_count": 30.0}],
            "table_stats": {"orders": {"num_rows": 100}},
            "predicted_latencies": [[0.5, 0.25, 2.0]]
        }"#;
        let w = Workload::from_json_slice(json.as_bytes())?;
        assert_eq!(w.analytical_queries()[0].tables, vec!["orders".to_string()]);
        assert!(w.transactional_queries()[0].is_data_modification);
        assert_relative_eq!(w.predicted_latency(0, Engine::Warehouse), 0.25);

        let misaligned = r#"{"period_secs": 60, "analytical_queries": [], "predicted_latencies": [[1.0, 1.0, 1.0]]}"#;
        assert_err!(Workload::from_json_slice(misaligned.as_bytes()));
        Ok(())
    }
}
