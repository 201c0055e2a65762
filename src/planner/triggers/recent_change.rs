use async_trait::async_trait;

use super::{Trigger, TriggerBase};
use crate::blueprint::{Blueprint, BlueprintDiff};
use crate::elements::Timestamp;
use crate::error::PlanError;
use crate::planner::scoring::Score;

/// Fires a few epochs after a provisioning change so the planner can re-evaluate with metrics observed under the
/// new provisioning.
#[derive(Debug, Clone)]
pub struct RecentChangeTrigger {
    base: TriggerBase,
    delay_epochs: u32,
    is_first_change: bool,
    last_provisioning_change: Option<Timestamp>,
}

impl RecentChangeTrigger {
    pub fn new(base: TriggerBase, delay_epochs: u32) -> Self {
        Self {
            base,
            delay_epochs,
            is_first_change: true,
            last_provisioning_change: None,
        }
    }

    pub const fn last_provisioning_change(&self) -> Option<Timestamp> {
        self.last_provisioning_change
    }
}

#[async_trait]
impl Trigger for RecentChangeTrigger {
    fn name(&self) -> &'static str {
        "recent_change"
    }

    fn base(&self) -> &TriggerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TriggerBase {
        &mut self.base
    }

    async fn should_replan(&mut self, now: Timestamp) -> Result<bool, PlanError> {
        let Some(last_change) = self.last_provisioning_change else {
            return Ok(false);
        };

        if !self.base.passed_delays_since_cutoff(now) {
            tracing::debug!("skipping recent change trigger because the delay cutoff has not passed");
            return Ok(false);
        }

        let delay_window = self.base.epoch_length() * self.delay_epochs;
        if last_change + delay_window + self.base.total_delay() < now {
            tracing::info!(%last_change, "triggering replan because of a recent provisioning change");
            self.last_provisioning_change = None;
            return Ok(true);
        }

        Ok(false)
    }

    fn update_blueprint(&mut self, blueprint: &Blueprint, score: Option<&Score>, now: Timestamp) {
        let previous = self.base.current_blueprint().cloned();
        self.base.update_blueprint(blueprint, score, now);

        let previous = match previous {
            Some(p) if !self.is_first_change => p,
            _ => {
                self.is_first_change = false;
                return;
            },
        };

        let changed = BlueprintDiff::of(&previous, blueprint).map_or(false, |diff| diff.has_provisioning_change());
        if changed {
            tracing::info!(%now, "recent change trigger will fire after the delay window");
            self.last_provisioning_change = Some(now);
        } else {
            self.last_provisioning_change = None;
        }
    }

    fn on_replan(&mut self, fired_by: Option<&str>, now: Timestamp) {
        tracing::debug!(?fired_by, "clearing recent change trigger state after replan");
        self.last_provisioning_change = None;
        self.base.reset_cutoff(now);
    }
}
