#[cfg(test)]
#[macro_use]
extern crate static_assertions;

pub mod blueprint;
pub mod elements;
pub mod error;
pub mod metrics;
pub mod planner;
pub mod serde;
pub mod settings;
pub mod tracing;
pub mod transition;

use std::borrow::Cow;

pub use blueprint::{Blueprint, Provisioning};
pub use elements::{Engine, EngineSet, Timestamp};

pub type PlannerResult<T> = Result<T, error::PlannerError>;

pub type SharedString = Cow<'static, str>;
