use std::time::Duration;

use blueprint_planner::blueprint::{RoutingPolicy, Table};
use blueprint_planner::planner::beam::add_priming_query;
use blueprint_planner::planner::workload::TableStats;
use blueprint_planner::planner::{BeamSearchOptimizer, Metrics, Query, ScoringContext, Workload};
use blueprint_planner::settings::PlannerSettings;
use blueprint_planner::{Blueprint, Engine, EngineSet, Provisioning};
use criterion::{black_box, criterion_group, BenchmarkId, Criterion};

const NR_TABLES: usize = 6;

fn current_blueprint() -> Blueprint {
    let names: Vec<String> = (0..NR_TABLES).map(|i| format!("t{i}")).collect();
    Blueprint::new(
        "bench",
        names.iter().map(|n| Table::new(n.as_str(), vec![])).collect(),
        names
            .iter()
            .map(|n| (n.clone(), EngineSet::single(Engine::OltpRow)))
            .collect(),
        Provisioning::new("db.r6g.xlarge", 1),
        Provisioning::new("dc2.large", 2),
        RoutingPolicy::default(),
    )
}

fn workload(nr_queries: usize) -> Workload {
    let queries = (0..nr_queries)
        .map(|i| {
            let (a, b) = (i % NR_TABLES, (i * 7 + 3) % NR_TABLES);
            Query::new(format!("SELECT count(*) FROM t{a} JOIN t{b} ON t{a}.id = t{b}.id WHERE v > {i}"), 10.0)
        })
        .collect();

    let table_stats = (0..NR_TABLES)
        .map(|i| {
            let stats = TableStats { num_rows: 100_000 * (i as u64 + 1), bytes_per_row: Some(80.0) };
            (format!("t{i}"), stats)
        })
        .collect();

    let mut workload = Workload::new(
        Duration::from_secs(3600),
        queries,
        vec![Query::new("UPDATE t0 SET v = v + 1 WHERE id = 3", 1_000.0)],
        table_stats,
    );

    let latencies = (0..nr_queries)
        .map(|i| {
            let scale = 1.0 + (i % 5) as f64;
            [2.0 * scale, 0.5 * scale, 1.0 * scale]
        })
        .collect();
    workload
        .set_predicted_latencies(latencies)
        .expect("predictions aligned with queries");
    workload
}

fn context(nr_queries: usize) -> ScoringContext {
    let blueprint = current_blueprint();
    let current = workload(nr_queries);
    let mut next = current.clone();
    add_priming_query(&mut next, &blueprint);

    let metrics = Metrics {
        oltp_row_writer_cpu_avg: 40.0,
        oltp_row_writer_load_minute_avg: 1.5,
        warehouse_cpu_avg: 35.0,
        warehouse_cpu_list: vec![30.0, 40.0],
        txn_completions_per_s: 150.0,
        txn_lat_s_p50: 0.003,
        txn_lat_s_p90: 0.010,
        ..Metrics::default()
    };

    let settings = PlannerSettings { beam_size: 25, ..PlannerSettings::default() };
    ScoringContext::new("bench", blueprint, current, next, metrics, settings)
}

fn benchmark_beam_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("beam_search");
    for nr_queries in [10, 40] {
        let ctx = context(nr_queries);
        group.bench_with_input(BenchmarkId::from_parameter(nr_queries), &ctx, |b, ctx| {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            b.to_async(rt).iter(move || async move {
                let optimizer = BeamSearchOptimizer::new(ctx);
                black_box(optimizer.optimize().await.expect("beam search failed"));
            })
        });
    }
    group.finish();
}

criterion_group! {
    name = beam_search;
    config = Criterion::default().sample_size(10);
    targets = benchmark_beam_search
}
