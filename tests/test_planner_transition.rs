mod support;

use std::sync::Arc;

use blueprint_planner::blueprint::repository::MemoryAssetRepository;
use blueprint_planner::blueprint::{BlueprintManager, BlueprintVersioning, TransitionState};
use blueprint_planner::planner::{
    BlueprintPlanner, FixedMetricsProvider, FixedWorkloadProvider, PlannerEvent, PrecomputedDataAccess,
    TransitionStarter,
};
use blueprint_planner::settings::Settings;
use blueprint_planner::transition::{ProvisioningControl, SimulatedProvisioning, TransitionOrchestrator};
use blueprint_planner::{Engine, Timestamp};
use approx::assert_relative_eq;
use claim::*;
use pretty_assertions::assert_eq;
use tokio::sync::Mutex;

async fn make_manager(assets: MemoryAssetRepository) -> Arc<Mutex<BlueprintManager>> {
    assert_ok!(BlueprintManager::initialize_schema(&assets, &support::oltp_only_blueprint()).await);
    let mut manager = BlueprintManager::new(support::SCHEMA, Box::new(assets));
    assert_ok!(manager.load().await);
    Arc::new(Mutex::new(manager))
}

fn make_planner(manager: Arc<Mutex<BlueprintManager>>) -> BlueprintPlanner {
    let mut settings = Settings::default();
    settings.planner.beam_size = 10;

    let mut planner = BlueprintPlanner::new(
        settings,
        manager.clone(),
        Arc::new(FixedMetricsProvider::new(support::steady_metrics(), Timestamp::from_secs(0))),
        Arc::new(FixedWorkloadProvider::steady(support::scan_heavy_workload())),
        Arc::new(support::scan_latencies()),
        Arc::new(PrecomputedDataAccess::default()),
    );
    planner.register_listener(Arc::new(TransitionStarter::new(manager)));
    planner
}

#[tokio::test]
async fn test_accepted_blueprint_transitions_live_deployment() {
    support::init_tracing();
    let main_span = tracing::info_span!("test_accepted_blueprint_transitions_live_deployment");
    let _main_span_guard = main_span.enter();

    let assets = MemoryAssetRepository::default();
    let manager = make_manager(assets.clone()).await;
    let mut planner = make_planner(manager.clone());
    let mut events = planner.subscribe();

    let (blueprint, score) = assert_some!(assert_ok!(planner.run_replan(None, Timestamp::from_secs(60)).await));
    assert_eq!(assert_ok!(events.recv().await), PlannerEvent::ReplanStarted { fired_by: None });
    assert_eq!(
        assert_ok!(events.recv().await),
        PlannerEvent::Accepted { blueprint: blueprint.clone(), score: score.clone() }
    );

    // the slow scan no longer runs on the writer
    assert!(score.analytical_latency_p99() < 10.0, "{score}");
    assert!(blueprint.table_locations()["orders"].contains(Engine::OltpRow));

    {
        let manager = manager.lock().await;
        assert_eq!(assert_ok!(manager.get_transition_state()), TransitionState::Transitioning);
        assert_eq!(assert_some!(manager.get_next_blueprint()), &blueprint);
    }

    // a second replan waits for the transition to finish
    assert_none!(assert_ok!(planner.run_replan(Some("elapsed_time"), Timestamp::from_secs(120)).await));

    let current = support::oltp_only_blueprint();
    let control = SimulatedProvisioning::new(current.oltp_row_provisioning(), current.warehouse_provisioning());
    let orchestrator =
        TransitionOrchestrator::new(manager.clone(), Arc::new(control.clone()), &Settings::default().transition);

    assert_ok!(orchestrator.run_prepare_then_transition().await);
    assert_eq!(
        assert_ok!(manager.lock().await.get_active_blueprint()),
        &blueprint,
        "physically applied blueprint is active before clean up"
    );
    assert_ok!(orchestrator.run_clean_up_after_transition().await);

    let oltp_row = assert_ok!(control.describe_oltp_row().await);
    assert_eq!(assert_some!(oltp_row.provisioning()), *blueprint.oltp_row_provisioning());
    let warehouse = assert_ok!(control.describe_warehouse().await);
    assert_eq!(warehouse.provisioning(), *blueprint.warehouse_provisioning());

    // a fresh manager over the same assets sees the completed transition
    let mut reloaded = BlueprintManager::new(support::SCHEMA, Box::new(assets));
    assert_ok!(reloaded.load().await);
    assert_eq!(assert_ok!(reloaded.get_versioning()), BlueprintVersioning::stable(1));
    let (active, active_score) = assert_ok!(reloaded.get_blueprint_and_score());
    assert_eq!(active, &blueprint);
    assert_relative_eq!(assert_some!(active_score).total_cost(), score.total_cost());
}

#[tokio::test]
async fn test_triggers_drive_replan() {
    support::init_tracing();
    let manager = make_manager(MemoryAssetRepository::default()).await;
    let mut planner = make_planner(manager.clone());

    // nothing fires right after the active blueprint is first observed
    assert_none!(assert_ok!(planner.check_and_replan(Timestamp::from_secs(0)).await));
    assert_eq!(assert_ok!(manager.lock().await.get_transition_state()), TransitionState::Stable);

    // the elapsed time trigger fires once 24 planning windows have passed
    let much_later = Timestamp::from_secs(25 * 3600);
    let (accepted, _) = assert_some!(assert_ok!(planner.check_and_replan(much_later).await));
    let manager = manager.lock().await;
    assert_eq!(assert_ok!(manager.get_transition_state()), TransitionState::Transitioning);
    assert_eq!(assert_some!(manager.get_next_blueprint()), &accepted);
}
