#![allow(dead_code)]

use std::time::Duration;

use blueprint_planner::blueprint::{RoutingPolicy, Table};
use blueprint_planner::planner::workload::TableStats;
use blueprint_planner::planner::{Metrics, PrecomputedLatencies, Query, Workload};
use blueprint_planner::{Blueprint, Engine, EngineSet, Provisioning};

pub fn init_tracing() {
    lazy_static::initialize(&blueprint_planner::tracing::TEST_TRACING);
}

pub const SCHEMA: &str = "shop";

/// Everything on a single OLTP writer; the warehouse is off.
pub fn oltp_only_blueprint() -> Blueprint {
    Blueprint::new(
        SCHEMA,
        vec![Table::new("orders", vec![]), Table::new("events", vec![])],
        maplit::btreemap! {
            "orders".to_string() => EngineSet::single(Engine::OltpRow),
            "events".to_string() => EngineSet::single(Engine::OltpRow),
        },
        Provisioning::new("db.r6g.xlarge", 1),
        Provisioning::new("dc2.large", 0),
        RoutingPolicy::default(),
    )
}

pub const SCAN_EVENTS: &str = "SELECT count(*) FROM events";

/// A heavy scan that is far too slow on the OLTP engine.
pub fn scan_heavy_workload() -> Workload {
    Workload::new(
        Duration::from_secs(3600),
        vec![Query::new(SCAN_EVENTS, 60.0)],
        vec![Query::new("UPDATE orders SET status = 'shipped' WHERE id = 7", 5_000.0)],
        maplit::btreemap! {
            "orders".to_string() => TableStats { num_rows: 1_000_000, bytes_per_row: Some(120.0) },
            "events".to_string() => TableStats { num_rows: 20_000_000, bytes_per_row: Some(60.0) },
        },
    )
}

pub fn scan_latencies() -> PrecomputedLatencies {
    let mut latencies = PrecomputedLatencies::default();
    latencies.insert(SCAN_EVENTS, [600.0, 2.0, 3.0]);
    latencies
}

pub fn steady_metrics() -> Metrics {
    Metrics {
        oltp_row_writer_cpu_avg: 30.0,
        oltp_row_writer_load_minute_avg: 1.2,
        oltp_row_writer_buffer_hit_pct_avg: 99.0,
        txn_completions_per_s: 200.0,
        txn_lat_s_p50: 0.004,
        txn_lat_s_p90: 0.012,
        ..Metrics::default()
    }
}
