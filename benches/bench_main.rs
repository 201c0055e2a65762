use criterion::criterion_main;

mod benchmarks;

criterion_main! {
    benchmarks::beam_search::beam_search,
}
