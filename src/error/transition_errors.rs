use either::{Either, Left, Right};
use thiserror::Error;

use super::{ManagerError, MetricLabel};
use crate::blueprint::TransitionState;
use crate::SharedString;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("provisioning call {operation} failed transiently: {reason}")]
    Transient { operation: String, reason: String },

    #[error("provisioning call {operation} failed: {reason}")]
    Control { operation: String, reason: String },

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<TransitionError>,
    },

    #[error("transition phase requires the {expected} state but blueprint manager is in {actual}")]
    UnexpectedState {
        expected: TransitionState,
        actual: TransitionState,
    },

    #[error("{0}")]
    Manager(#[from] ManagerError),
}

impl TransitionError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl MetricLabel for TransitionError {
    fn slug(&self) -> SharedString {
        "transition".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            _e @ Self::Transient { .. } => Left("transient".into()),
            _e @ Self::Control { .. } => Left("control".into()),
            _e @ Self::RetriesExhausted { .. } => Left("retries_exhausted".into()),
            _e @ Self::UnexpectedState { .. } => Left("unexpected_state".into()),
            Self::Manager(e) => Right(Box::new(e)),
        }
    }
}
