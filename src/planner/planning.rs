use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use super::beam::{add_priming_query, BeamSearchOptimizer};
use super::compare::BlueprintComparator;
use super::metrics::MetricsProvider;
use super::providers::{AnalyticsLatencyScorer, DataAccessProvider, WorkloadProvider};
use super::scoring::{Score, ScoringContext};
use super::triggers::{make_triggers, Trigger};
use crate::blueprint::{Blueprint, BlueprintDiff, BlueprintManager, BlueprintVersioning, TransitionState};
use crate::elements::Timestamp;
use crate::error::{PlanError, PlannerError};
use crate::metrics::{track_errors, REPLAN_OUTCOMES, TRIGGER_FIRINGS};
use crate::settings::Settings;

const MONITOR_CAPACITY: usize = 64;

/// Notified once a replan selects a blueprint strictly better than the active one.
#[async_trait]
pub trait BlueprintListener: Debug + Send + Sync {
    async fn on_new_blueprint(&self, blueprint: &Blueprint, score: &Score) -> Result<(), PlanError>;
}

/// Listener that starts a transition to every blueprint the planner accepts.
#[derive(Debug, Clone)]
pub struct TransitionStarter {
    manager: Arc<Mutex<BlueprintManager>>,
}

impl TransitionStarter {
    pub fn new(manager: Arc<Mutex<BlueprintManager>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl BlueprintListener for TransitionStarter {
    async fn on_new_blueprint(&self, blueprint: &Blueprint, score: &Score) -> Result<(), PlanError> {
        let mut manager = self.manager.lock().await;
        let next_version = manager.start_transition(blueprint.clone(), Some(score.clone())).await?;
        tracing::info!(%next_version, "started transition to the new blueprint");
        Ok(())
    }
}

/// Published on the planner monitor channel as each replan progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerEvent {
    ReplanStarted { fired_by: Option<String> },
    TransitionInProgress(TransitionState),
    NoCandidate,
    NotBetterThanCurrent { candidate: Score, current: Score },
    Accepted { blueprint: Blueprint, score: Score },
}

impl PlannerEvent {
    fn outcome(&self) -> Option<&'static str> {
        match self {
            Self::ReplanStarted { .. } => None,
            Self::TransitionInProgress(_) => Some("transition_in_progress"),
            Self::NoCandidate => Some("no_candidate"),
            Self::NotBetterThanCurrent { .. } => Some("not_better"),
            Self::Accepted { .. } => Some("accepted"),
        }
    }
}

/// Runs replans against one schema's blueprint manager: checks triggers, searches for a better blueprint and hands
/// accepted blueprints to its listeners. One replan runs at a time.
#[derive(Debug)]
pub struct BlueprintPlanner {
    settings: Settings,
    manager: Arc<Mutex<BlueprintManager>>,
    metrics: Arc<dyn MetricsProvider>,
    workloads: Arc<dyn WorkloadProvider>,
    latency_scorer: Arc<dyn AnalyticsLatencyScorer>,
    data_access: Arc<dyn DataAccessProvider>,
    triggers: Vec<Box<dyn Trigger>>,
    listeners: Vec<Arc<dyn BlueprintListener>>,
    monitor: broadcast::Sender<PlannerEvent>,
    observed_version: Option<u64>,
}

impl BlueprintPlanner {
    pub fn new(
        settings: Settings, manager: Arc<Mutex<BlueprintManager>>, metrics: Arc<dyn MetricsProvider>,
        workloads: Arc<dyn WorkloadProvider>, latency_scorer: Arc<dyn AnalyticsLatencyScorer>,
        data_access: Arc<dyn DataAccessProvider>,
    ) -> Self {
        let triggers = make_triggers(
            &settings,
            metrics.clone(),
            workloads.clone(),
            data_access.clone(),
            Timestamp::now(),
        );
        let (monitor, _) = broadcast::channel(MONITOR_CAPACITY);

        Self {
            settings,
            manager,
            metrics,
            workloads,
            latency_scorer,
            data_access,
            triggers,
            listeners: Vec::new(),
            monitor,
            observed_version: None,
        }
    }

    #[must_use]
    pub fn with_triggers(mut self, triggers: Vec<Box<dyn Trigger>>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn register_listener(&mut self, listener: Arc<dyn BlueprintListener>) {
        self.listeners.push(listener);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlannerEvent> {
        self.monitor.subscribe()
    }

    pub fn triggers(&self) -> &[Box<dyn Trigger>] {
        &self.triggers
    }

    /// Checks triggers every check period and replans when one fires. Failures are logged and counted; the loop
    /// keeps running.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run_forever(&mut self) {
        let check_period = self.settings.triggers.check_period;
        loop {
            tokio::time::sleep(check_period).await;
            let now = Timestamp::now();

            if let Err(err) = self.check_and_replan(now).await {
                tracing::error!(error=?err, "blueprint planner iteration failed");
                track_errors(&err);
            }
        }
    }

    /// One loop iteration: refreshes the triggers' view of the active blueprint, then replans if a trigger fires.
    pub async fn check_and_replan(&mut self, now: Timestamp) -> Result<Option<(Blueprint, Score)>, PlannerError> {
        self.observe_active_blueprint(now).await?;
        match self.check_triggers(now).await? {
            Some(fired_by) => self.run_replan(Some(fired_by), now).await,
            None => Ok(None),
        }
    }

    /// Name of the first trigger asking for a replan.
    pub async fn check_triggers(&mut self, now: Timestamp) -> Result<Option<&'static str>, PlanError> {
        for trigger in self.triggers.iter_mut() {
            if trigger.should_replan(now).await? {
                let name = trigger.name();
                TRIGGER_FIRINGS.with_label_values(&[name]).inc();
                return Ok(Some(name));
            }
        }

        Ok(None)
    }

    /// Hands the active blueprint to the triggers whenever its version changed since the last check.
    pub async fn observe_active_blueprint(&mut self, now: Timestamp) -> Result<(), PlannerError> {
        let manager = self.manager.lock().await;
        let version = active_version(&manager.get_versioning()?);
        if self.observed_version == Some(version) {
            return Ok(());
        }

        let (blueprint, score) = manager.get_blueprint_and_score()?;
        tracing::info!(%version, "triggers observing new active blueprint");
        for trigger in self.triggers.iter_mut() {
            trigger.update_blueprint(blueprint, score, now);
        }
        self.observed_version = Some(version);
        Ok(())
    }

    /// Searches for a blueprint for the forecasted workload and notifies listeners when it is strictly better than
    /// the active one. Returns the accepted blueprint, if any.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run_replan(
        &mut self, fired_by: Option<&str>, now: Timestamp,
    ) -> Result<Option<(Blueprint, Score)>, PlannerError> {
        self.publish(PlannerEvent::ReplanStarted { fired_by: fired_by.map(|n| n.to_string()) });
        let result = self.replan(now).await;

        for trigger in self.triggers.iter_mut() {
            trigger.on_replan(fired_by, now);
        }

        let event = result?;
        let accepted = match &event {
            PlannerEvent::Accepted { blueprint, score } => Some((blueprint.clone(), score.clone())),
            _ => None,
        };
        self.publish(event);
        Ok(accepted)
    }

    async fn replan(&self, now: Timestamp) -> Result<PlannerEvent, PlannerError> {
        let (schema_name, current_blueprint) = {
            let manager = self.manager.lock().await;
            let state = manager.get_transition_state()?;
            if !state.is_stable() {
                tracing::info!(%state, "skipping replan while a transition is in progress");
                return Ok(PlannerEvent::TransitionInProgress(state));
            }
            (manager.schema_name().to_string(), manager.get_current_blueprint()?.clone())
        };

        let ctx = self.scoring_context(&schema_name, current_blueprint, now).await?;
        let optimizer = BeamSearchOptimizer::new(&ctx);
        let Some((blueprint, score)) = optimizer.optimize().await? else {
            tracing::info!("planner did not find any valid candidate blueprints");
            return Ok(PlannerEvent::NoCandidate);
        };

        let current_score = ctx.score_current_blueprint()?;
        let comparator = BlueprintComparator::new(self.settings.planner.comparator.clone());
        if !comparator.is_better(&score, &current_score) {
            tracing::info!(candidate=%score, current=%current_score, "best candidate is not better than the current blueprint");
            return Ok(PlannerEvent::NotBetterThanCurrent { candidate: score, current: current_score });
        }

        match BlueprintDiff::of(ctx.current_blueprint(), &blueprint) {
            Some(diff) => tracing::info!(%diff, %score, "selected new blueprint"),
            None => tracing::info!(%score, "selected blueprint with unchanged placement and provisioning"),
        }

        for listener in self.listeners.iter() {
            listener.on_new_blueprint(&blueprint, &score).await?;
        }

        Ok(PlannerEvent::Accepted { blueprint, score })
    }

    async fn scoring_context(
        &self, schema_name: &str, current_blueprint: Blueprint, now: Timestamp,
    ) -> Result<ScoringContext, PlanError> {
        let planner = &self.settings.planner;
        let (metrics, observed_at) = self.metrics.get_metrics().await?;
        tracing::debug!(%observed_at, "using metrics observed for replan");

        let (mut current, mut next) = self
            .workloads
            .get_workloads(now, planner.workload_window_multiplier, planner.planning_window)
            .await?;

        if planner.ensure_tables_together_on_one_engine {
            add_priming_query(&mut next, &current_blueprint);
        }

        for workload in [&mut current, &mut next] {
            self.latency_scorer.apply_predicted_latencies(workload).await?;
            self.data_access.apply_access_statistics(workload).await?;
        }

        Ok(ScoringContext::new(
            schema_name,
            current_blueprint,
            current,
            next,
            metrics,
            planner.clone(),
        ))
    }

    fn publish(&self, event: PlannerEvent) {
        if let Some(outcome) = event.outcome() {
            REPLAN_OUTCOMES.with_label_values(&[outcome]).inc();
        }

        if self.monitor.send(event).is_err() {
            tracing::trace!("no planner monitor subscribers");
        }
    }
}

/// Version of the blueprint in effect: the next version once its physical changes are applied.
fn active_version(versioning: &BlueprintVersioning) -> u64 {
    match versioning.transition_state {
        TransitionState::TransitionedPreCleanUp | TransitionState::CleaningUp => {
            versioning.next_version.unwrap_or(versioning.version)
        },
        TransitionState::Stable | TransitionState::Transitioning => versioning.version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::repository::MemoryAssetRepository;
    use crate::blueprint::{Provisioning, RoutingPolicy, Table};
    use crate::elements::{Engine, EngineSet};
    use crate::planner::metrics::{FixedMetricsProvider, Metrics};
    use crate::planner::providers::{FixedWorkloadProvider, PrecomputedDataAccess, PrecomputedLatencies};
    use crate::planner::triggers::{ElapsedTimeTrigger, TriggerBase};
    use crate::planner::workload::{Query, TableStats, Workload};
    use claim::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    assert_impl_all!(BlueprintPlanner: Send);
    assert_impl_all!(PlannerEvent: Send, Sync, Clone);

    fn blueprint() -> Blueprint {
        Blueprint::new(
            "shop",
            vec![Table::new("orders", vec![])],
            maplit::btreemap! { "orders".to_string() => EngineSet::single(Engine::OltpRow) },
            Provisioning::new("db.r6g.xlarge", 1),
            Provisioning::new("dc2.large", 0),
            RoutingPolicy::default(),
        )
    }

    async fn planner(workload: Workload) -> (BlueprintPlanner, Arc<Mutex<BlueprintManager>>) {
        let assets = MemoryAssetRepository::default();
        assert_ok!(BlueprintManager::initialize_schema(&assets, &blueprint()).await);
        let mut manager = BlueprintManager::new("shop", Box::new(assets));
        assert_ok!(manager.load().await);
        let manager = Arc::new(Mutex::new(manager));

        let planner = BlueprintPlanner::new(
            Settings::default(),
            manager.clone(),
            Arc::new(FixedMetricsProvider::new(Metrics::default(), Timestamp::from_secs(0))),
            Arc::new(FixedWorkloadProvider::steady(workload)),
            Arc::new(PrecomputedLatencies::default()),
            Arc::new(PrecomputedDataAccess::default()),
        );
        (planner, manager)
    }

    fn empty_workload() -> Workload {
        Workload::new(
            Duration::from_secs(3600),
            vec![],
            vec![Query::new("UPDATE orders SET status = 1 WHERE id = 2", 100.0)],
            maplit::btreemap! { "orders".to_string() => TableStats { num_rows: 10_000, bytes_per_row: None } },
        )
    }

    #[test]
    fn test_active_version() {
        let mut v = BlueprintVersioning::stable(3);
        assert_eq!(active_version(&v), 3);
        v.transition_state = TransitionState::Transitioning;
        v.next_version = Some(4);
        assert_eq!(active_version(&v), 3);
        v.transition_state = TransitionState::CleaningUp;
        assert_eq!(active_version(&v), 4);
    }

    #[tokio::test]
    async fn test_replan_without_analytical_queries() {
        lazy_static::initialize(&crate::tracing::TEST_TRACING);
        let main_span = tracing::info_span!("test_replan_without_analytical_queries");
        let _main_span_guard = main_span.enter();

        let (mut planner, _manager) = planner(empty_workload()).await;
        let mut events = planner.subscribe();

        let actual = assert_ok!(planner.run_replan(None, Timestamp::from_secs(10)).await);
        assert_none!(actual);
        assert_eq!(assert_ok!(events.recv().await), PlannerEvent::ReplanStarted { fired_by: None });
        assert_eq!(assert_ok!(events.recv().await), PlannerEvent::NoCandidate);
    }

    #[tokio::test]
    async fn test_monitor_buffers_events_of_several_replans() {
        let (mut planner, _manager) = planner(empty_workload()).await;
        let mut events = planner.subscribe();

        for secs in 0..10 {
            assert_none!(assert_ok!(planner.run_replan(None, Timestamp::from_secs(secs)).await));
        }

        for _ in 0..10 {
            assert_eq!(assert_ok!(events.recv().await), PlannerEvent::ReplanStarted { fired_by: None });
            assert_eq!(assert_ok!(events.recv().await), PlannerEvent::NoCandidate);
        }
        assert_err!(events.try_recv());
    }

    #[tokio::test]
    async fn test_replan_skipped_during_transition() {
        let (mut planner, manager) = planner(empty_workload()).await;
        assert_ok!(manager.lock().await.start_transition(blueprint(), None).await);
        let mut events = planner.subscribe();

        let actual = assert_ok!(planner.run_replan(Some("elapsed_time"), Timestamp::from_secs(10)).await);
        assert_none!(actual);
        assert_eq!(
            assert_ok!(events.recv().await),
            PlannerEvent::ReplanStarted { fired_by: Some("elapsed_time".to_string()) }
        );
        assert_eq!(
            assert_ok!(events.recv().await),
            PlannerEvent::TransitionInProgress(TransitionState::Transitioning)
        );
    }

    #[tokio::test]
    async fn test_triggers_observe_active_blueprint_and_fire() {
        let (planner, _manager) = planner(empty_workload()).await;
        let start = Timestamp::from_secs(0);
        let base = TriggerBase::new(Duration::from_secs(300), Duration::from_secs(600), start);
        let mut planner = planner.with_triggers(vec![Box::new(ElapsedTimeTrigger::new(base, Duration::from_secs(60)))]);

        assert_none!(assert_ok!(planner.check_and_replan(start + Duration::from_secs(30)).await));
        assert_eq!(planner.triggers()[0].base().current_blueprint(), Some(&blueprint()));
        assert_eq!(planner.triggers()[0].base().cutoff(), start + Duration::from_secs(30));

        let fired = assert_ok!(planner.check_triggers(start + Duration::from_secs(100)).await);
        assert_eq!(fired, Some("elapsed_time"));
    }
}
