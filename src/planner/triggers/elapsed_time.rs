use std::time::Duration;

use async_trait::async_trait;

use super::{Trigger, TriggerBase};
use crate::elements::Timestamp;
use crate::error::PlanError;

/// Fires once a fixed period has passed since the last replan.
#[derive(Debug, Clone)]
pub struct ElapsedTimeTrigger {
    base: TriggerBase,
    period: Duration,
}

impl ElapsedTimeTrigger {
    pub fn new(base: TriggerBase, period: Duration) -> Self {
        Self { base, period }
    }
}

#[async_trait]
impl Trigger for ElapsedTimeTrigger {
    fn name(&self) -> &'static str {
        "elapsed_time"
    }

    fn base(&self) -> &TriggerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TriggerBase {
        &mut self.base
    }

    async fn should_replan(&mut self, now: Timestamp) -> Result<bool, PlanError> {
        let elapsed = now.duration_since(self.base.cutoff());
        if self.period < elapsed {
            tracing::info!(?elapsed, period=?self.period, "triggering replan because the replan period elapsed");
            self.base.reset_cutoff(now);
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim::*;
    use tokio_test::block_on;

    #[test]
    fn test_fires_after_period() {
        let start = Timestamp::from_secs(0);
        let base = TriggerBase::new(Duration::from_secs(300), Duration::from_secs(600), start);
        let mut trigger = ElapsedTimeTrigger::new(base, Duration::from_secs(3600));

        block_on(async {
            assert!(!assert_ok!(trigger.should_replan(start + Duration::from_secs(3600)).await));
            assert!(assert_ok!(trigger.should_replan(start + Duration::from_secs(3601)).await));

            // the cutoff moved with the firing
            assert!(!assert_ok!(trigger.should_replan(start + Duration::from_secs(3602)).await));

            trigger.on_replan(Some("recent_change"), start + Duration::from_secs(5_000));
            assert!(!assert_ok!(trigger.should_replan(start + Duration::from_secs(8_000)).await));
            assert!(assert_ok!(trigger.should_replan(start + Duration::from_secs(8_601)).await));
        });
    }
}
