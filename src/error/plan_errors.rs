use either::{Either, Left, Right};
use thiserror::Error;

use super::{BlueprintError, ManagerError, MetricLabel};
use crate::SharedString;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("predicted {what} covers {actual} queries but the workload has {expected}")]
    MisalignedPredictions {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("no single engine holds every table referenced by query: {0}")]
    NoSingleLocation(String),

    #[error("no engine supports the capabilities required by query: {0}")]
    UnsupportedQuery(String),

    #[error("metrics unavailable for planning: {0}")]
    MetricsUnavailable(String),

    #[error("workload unavailable for planning: {0}")]
    WorkloadUnavailable(String),

    #[error("{0}")]
    Blueprint(#[from] BlueprintError),

    #[error("{0}")]
    Manager(#[from] ManagerError),

    #[error("{0}")]
    Listener(#[from] anyhow::Error),

    #[error("IO failure during planning: {0}")]
    IO(#[from] std::io::Error),

    #[error("failed to read planning input JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MetricLabel for PlanError {
    fn slug(&self) -> SharedString {
        "plan".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            _e @ Self::MisalignedPredictions { .. } => Left("misaligned_predictions".into()),
            Self::NoSingleLocation(_) => Left("no_single_location".into()),
            Self::UnsupportedQuery(_) => Left("unsupported_query".into()),
            Self::MetricsUnavailable(_) => Left("metrics_unavailable".into()),
            Self::WorkloadUnavailable(_) => Left("workload_unavailable".into()),
            Self::Blueprint(e) => Right(Box::new(e)),
            Self::Manager(e) => Right(Box::new(e)),
            Self::Listener(_) => Left("listener".into()),
            Self::IO(_) => Left("io".into()),
            Self::Serde(_) => Left("serde".into()),
        }
    }
}
