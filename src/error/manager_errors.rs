use either::{Either, Left, Right};
use thiserror::Error;

use super::{BlueprintError, MetricLabel};
use crate::blueprint::TransitionState;
use crate::SharedString;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no blueprint versioning or legacy blueprint found for schema {0}")]
    MissingBlueprint(String),

    #[error("blueprint version {version} not found for schema {schema}")]
    MissingVersion { schema: String, version: u64 },

    #[error("illegal blueprint transition from {from} to {to}")]
    IllegalTransition { from: TransitionState, to: TransitionState },

    #[error("cannot start a transition while in the {0} state")]
    TransitionInProgress(TransitionState),

    #[error("failed to migrate legacy blueprint for schema {schema}: {reason}")]
    Migration { schema: String, reason: String },

    #[error("blueprint manager state has not been loaded")]
    NotLoaded,

    #[error("unknown blueprint repository type requested: {0}")]
    UnknownRepositoryType(String),

    #[error("{0}")]
    Blueprint(#[from] BlueprintError),

    #[error("IO failure in blueprint repository: {0}")]
    IO(#[from] std::io::Error),

    #[error("failed to read blueprint asset JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MetricLabel for ManagerError {
    fn slug(&self) -> SharedString {
        "manager".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::MissingBlueprint(_) => Left("missing_blueprint".into()),
            _e @ Self::MissingVersion { .. } => Left("missing_version".into()),
            _e @ Self::IllegalTransition { .. } => Left("illegal_transition".into()),
            Self::TransitionInProgress(_) => Left("transition_in_progress".into()),
            _e @ Self::Migration { .. } => Left("migration".into()),
            Self::NotLoaded => Left("not_loaded".into()),
            Self::UnknownRepositoryType(_) => Left("settings".into()),
            Self::Blueprint(e) => Right(Box::new(e)),
            Self::IO(_) => Left("io".into()),
            Self::Serde(_) => Left("serde".into()),
        }
    }
}
