use either::{Either, Left};
use thiserror::Error;

use super::MetricLabel;
use crate::SharedString;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0}")]
    Configuration(#[from] config::ConfigError),

    #[error("do not recognize {0} environment")]
    Environment(String),

    #[error("IO failure while loading settings: {0}")]
    IO(#[from] std::io::Error),
}

impl MetricLabel for SettingsError {
    fn slug(&self) -> SharedString {
        "settings".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::Configuration(_) => Left("configuration".into()),
            Self::Environment(_) => Left("environment".into()),
            Self::IO(_) => Left("io".into()),
        }
    }
}
