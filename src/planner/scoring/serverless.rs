use crate::planner::workload::Workload;
use crate::settings::ServerlessModelSettings;

/// Scan cost of the queries over the workload's period. Every query is billed at least the minimum scan.
pub fn scan_cost(workload: &Workload, query_indices: &[usize], settings: &ServerlessModelSettings) -> f64 {
    query_indices
        .iter()
        .map(|idx| {
            let mb = workload.predicted_serverless_bytes(*idx) / 1_000_000.0;
            mb.max(settings.min_mb_per_query) * settings.usd_per_mb_scanned * workload.arrival_count(*idx)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::workload::Query;
    use approx::assert_relative_eq;
    use claim::*;
    use std::time::Duration;

    #[test]
    fn test_scan_cost_bills_minimum() {
        let mut workload = Workload::new(
            Duration::from_secs(3600),
            vec![Query::new("SELECT * FROM a", 10.0), Query::new("SELECT * FROM b", 2.0)],
            vec![],
            Default::default(),
        );
        assert_ok!(workload.set_predicted_data_access(vec![1e6, 50e6], vec![0.0, 0.0]));

        let settings = ServerlessModelSettings::default();
        assert_relative_eq!(scan_cost(&workload, &[0], &settings), 10.0 * 10.0 * 5e-6);
        assert_relative_eq!(scan_cost(&workload, &[0, 1], &settings), (100.0 + 100.0) * 5e-6);
        assert_relative_eq!(scan_cost(&workload, &[], &settings), 0.0);
    }
}
