mod support;

use blueprint_planner::blueprint::repository::FileAssetRepository;
use blueprint_planner::blueprint::{
    make_asset_repository, BlueprintManager, BlueprintVersioning, RepositorySettings, RepositoryType,
    TransitionState, UserProvidedBlueprint,
};
use blueprint_planner::error::ManagerError;
use blueprint_planner::{Blueprint, EngineSet, Provisioning};
use claim::*;
use pretty_assertions::assert_eq;
use trim_margin::MarginTrimmable;

fn user_blueprint_yaml() -> String {
    r##"
    |schema_name: shop
    |tables:
    |  - table_name: orders
    |    columns:
    |      - name: id
    |        data_type: BIGINT
    |        primary_key: true
    |      - name: status
    |        data_type: TEXT
    |  - table_name: order_counts
    |    dependencies: [orders]
    |    transform: SELECT status, count(*) FROM orders GROUP BY status
    |provisioning:
    |  oltp_row:
    |    instance_type: db.r6g.xlarge
    |    num_nodes: 2
    |"##
    .trim_margin_with("|")
    .unwrap()
}

#[tokio::test]
async fn test_bootstrap_and_transition_persist_across_managers() -> anyhow::Result<()> {
    support::init_tracing();
    let main_span = tracing::info_span!("test_bootstrap_and_transition_persist_across_managers");
    let _main_span_guard = main_span.enter();

    let dir = tempfile::tempdir()?;
    let settings = RepositorySettings {
        storage: RepositoryType::File,
        storage_path: Some(dir.path().to_string_lossy().to_string()),
    };

    let initial = UserProvidedBlueprint::from_yaml_str(&user_blueprint_yaml())?.into_blueprint()?;
    assert_eq!(initial.table_locations_of("order_counts"), EngineSet::ALL);
    assert_eq!(initial.warehouse_provisioning(), &Provisioning::new("dc2.large", 2));

    let assets = make_asset_repository(&settings)?;
    BlueprintManager::initialize_schema(assets.as_ref(), &initial).await?;
    assert!(dir.path().join("shop/blueprints/versioning").exists());

    let mut manager = BlueprintManager::new("shop", make_asset_repository(&settings)?);
    manager.load().await?;
    assert_eq!(manager.get_versioning()?, BlueprintVersioning::stable(0));

    let next = Blueprint::new(
        initial.schema_name(),
        initial.tables().to_vec(),
        initial.table_locations().clone(),
        Provisioning::new("db.r6g.xlarge", 3),
        initial.warehouse_provisioning().clone(),
        initial.routing_policy().clone(),
    );
    assert_eq!(manager.start_transition(next.clone(), None).await?, 1);
    manager.update_transition_state(TransitionState::TransitionedPreCleanUp).await?;

    // another process resumes from what is on disk
    let mut resumed = BlueprintManager::new("shop", Box::new(FileAssetRepository::new(dir.path())));
    resumed.load().await?;
    assert_eq!(resumed.get_transition_state()?, TransitionState::TransitionedPreCleanUp);
    assert_eq!(resumed.get_active_blueprint()?, &next);
    assert_eq!(resumed.get_current_blueprint()?, &initial);

    let err = assert_err!(resumed.update_transition_state(TransitionState::Stable).await);
    assert!(matches!(err, ManagerError::IllegalTransition { .. }));
    resumed.update_transition_state(TransitionState::CleaningUp).await?;
    resumed.update_transition_state(TransitionState::Stable).await?;
    assert_eq!(resumed.get_versioning()?, BlueprintVersioning::stable(1));

    resumed.delete_schema().await?;
    assert!(!dir.path().join("shop/blueprints/versioning").exists());
    let mut missing = BlueprintManager::new("shop", Box::new(FileAssetRepository::new(dir.path())));
    assert!(matches!(assert_err!(missing.load().await), ManagerError::Migration { .. }));
    Ok(())
}
