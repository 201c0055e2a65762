pub use engine::{Engine, EngineSet};
pub use timestamp::Timestamp;

mod engine;
mod timestamp;
