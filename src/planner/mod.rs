pub mod beam;
pub mod compare;
pub mod enumeration;
pub mod metrics;
pub mod planning;
pub mod providers;
pub mod router;
pub mod scoring;
pub mod triggers;
pub mod workload;

pub use beam::{BeamSearchOptimizer, BlueprintCandidate};
pub use compare::BlueprintComparator;
pub use metrics::{FixedMetricsProvider, MetricSeries, Metrics, MetricsProvider};
pub use planning::{BlueprintListener, BlueprintPlanner, PlannerEvent, TransitionStarter};
pub use providers::{
    AnalyticsLatencyScorer, DataAccessProvider, FixedWorkloadProvider, PrecomputedDataAccess, PrecomputedLatencies,
    WorkloadProvider,
};
pub use router::Router;
pub use scoring::{Score, ScoringContext};
pub use triggers::Trigger;
pub use workload::{Query, Workload};
