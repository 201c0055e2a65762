use either::{Either, Left};
use thiserror::Error;

use super::MetricLabel;
use crate::elements::Engine;
use crate::SharedString;

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("table {0} is declared more than once")]
    DuplicateTable(String),

    #[error("table {table} depends on unknown table {dependency}")]
    UnknownDependency { table: String, dependency: String },

    #[error("cyclic table dependency detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("base table {0} must declare its columns and a primary key")]
    UnderspecifiedBaseTable(String),

    #[error("unknown {engine} instance type: {instance_type}")]
    UnknownInstanceType { engine: Engine, instance_type: String },

    #[error("{engine} does not support {num_nodes} nodes of {instance_type}")]
    InvalidNodeCount {
        engine: Engine,
        instance_type: String,
        num_nodes: u32,
    },

    #[error("failed to (de)serialize blueprint JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("failed to parse user blueprint YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO failure reading blueprint: {0}")]
    IO(#[from] std::io::Error),
}

impl MetricLabel for BlueprintError {
    fn slug(&self) -> SharedString {
        "blueprint".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::DuplicateTable(_) => Left("duplicate_table".into()),
            _e @ Self::UnknownDependency { .. } => Left("unknown_dependency".into()),
            Self::DependencyCycle(_) => Left("dependency_cycle".into()),
            Self::UnderspecifiedBaseTable(_) => Left("underspecified_base_table".into()),
            _e @ Self::UnknownInstanceType { .. } => Left("unknown_instance_type".into()),
            _e @ Self::InvalidNodeCount { .. } => Left("invalid_node_count".into()),
            Self::Serde(_) => Left("serde".into()),
            Self::Yaml(_) => Left("yaml".into()),
            Self::IO(_) => Left("io".into()),
        }
    }
}
