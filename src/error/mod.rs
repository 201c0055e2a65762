use std::fmt::Debug;

use either::{Either, Left, Right};
use thiserror::Error;

use crate::SharedString;

mod blueprint_errors;
mod manager_errors;
mod plan_errors;
mod settings_errors;
mod transition_errors;

pub use blueprint_errors::BlueprintError;
pub use manager_errors::ManagerError;
pub use plan_errors::PlanError;
pub use settings_errors::SettingsError;
pub use transition_errors::TransitionError;

pub trait MetricLabel {
    fn label(&self) -> SharedString {
        match self.next() {
            Either::Right(n) => format!("{}::{}", self.slug(), n.label()).into(),
            Either::Left(ls) => format!("{}::{}", self.slug(), ls).into(),
        }
    }

    fn slug(&self) -> SharedString;
    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>>;
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("{0}")]
    Blueprint(#[from] BlueprintError),

    #[error("{0}")]
    Manager(#[from] ManagerError),

    #[error("{0}")]
    Plan(#[from] PlanError),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Settings(#[from] SettingsError),

    #[error("{0}")]
    Metrics(#[from] prometheus::Error),
}

impl MetricLabel for PlannerError {
    fn slug(&self) -> SharedString {
        "planner".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::Blueprint(e) => Right(Box::new(e)),
            Self::Manager(e) => Right(Box::new(e)),
            Self::Plan(e) => Right(Box::new(e)),
            Self::Transition(e) => Right(Box::new(e)),
            Self::Settings(e) => Right(Box::new(e)),
            Self::Metrics(_) => Left("prometheus".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::TransitionState;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_metric_labels() {
        let err: PlannerError = ManagerError::TransitionInProgress(TransitionState::CleaningUp).into();
        assert_eq!(err.label(), "planner::manager::transition_in_progress");

        let err: PlannerError = PlanError::from(BlueprintError::DuplicateTable("orders".to_string())).into();
        assert_eq!(err.label(), "planner::plan::blueprint::duplicate_table");

        let err: PlannerError = TransitionError::RetriesExhausted {
            operation: "create_oltp_replica".to_string(),
            attempts: 4,
            source: Box::new(TransitionError::Transient {
                operation: "create_oltp_replica".to_string(),
                reason: "throttled".to_string(),
            }),
        }
        .into();
        assert_eq!(err.label(), "planner::transition::retries_exhausted");
    }
}
