use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::error::{MetricLabel, PlannerError};

pub static ACTIVE_BLUEPRINT_VERSION: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "blueprint_planner_active_blueprint_version",
        "Version of the blueprint currently recorded as active",
    )
    .expect("failed creating blueprint_planner_active_blueprint_version metric")
});

pub static REPLAN_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("blueprint_planner_replans", "Number of replans run, by outcome"),
        &["outcome"],
    )
    .expect("failed creating blueprint_planner_replans metric")
});

pub static CANDIDATES_EVALUATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "blueprint_planner_candidates_evaluated",
        "Number of candidate blueprints scored by the beam search",
    )
    .expect("failed creating blueprint_planner_candidates_evaluated metric")
});

pub static BEAM_RESCUES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "blueprint_planner_beam_rescues",
        "Number of local provisioning searches run for candidates about to leave the beam",
    )
    .expect("failed creating blueprint_planner_beam_rescues metric")
});

pub static TRIGGER_FIRINGS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("blueprint_planner_trigger_firings", "Number of times a trigger requested a replan"),
        &["trigger"],
    )
    .expect("failed creating blueprint_planner_trigger_firings metric")
});

pub static TRANSITION_STEPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "blueprint_planner_transition_steps",
            "Number of provisioning mutations issued during blueprint transitions",
        ),
        &["engine", "action"],
    )
    .expect("failed creating blueprint_planner_transition_steps metric")
});

pub static PLANNER_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("blueprint_planner_errors", "Number of errors raised while planning or transitioning"),
        &["error_type"],
    )
    .expect("failed creating blueprint_planner_errors metric")
});

#[inline]
pub fn track_errors(error: &PlannerError) {
    PLANNER_ERRORS.with_label_values(&[error.label().as_ref()]).inc()
}

#[tracing::instrument(level = "info")]
pub fn register_planner_metrics(registry: &Registry) -> Result<(), PlannerError> {
    registry.register(Box::new(ACTIVE_BLUEPRINT_VERSION.clone()))?;
    registry.register(Box::new(REPLAN_OUTCOMES.clone()))?;
    registry.register(Box::new(CANDIDATES_EVALUATED.clone()))?;
    registry.register(Box::new(BEAM_RESCUES.clone()))?;
    registry.register(Box::new(TRIGGER_FIRINGS.clone()))?;
    registry.register(Box::new(TRANSITION_STEPS.clone()))?;
    registry.register(Box::new(PLANNER_ERRORS.clone()))?;
    Ok(())
}
