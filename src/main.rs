use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use blueprint_planner::blueprint::{
    deserialize_blueprint, make_asset_repository, Blueprint, BlueprintDiff, BlueprintManager, UserProvidedBlueprint,
};
use blueprint_planner::metrics::register_planner_metrics;
use blueprint_planner::planner::{
    BlueprintPlanner, FixedMetricsProvider, FixedWorkloadProvider, Metrics, PrecomputedDataAccess,
    PrecomputedLatencies, TransitionStarter, Workload,
};
use blueprint_planner::settings::{get_settings, CliOptions, Command, Settings};
use blueprint_planner::tracing::{get_subscriber, init_subscriber};
use blueprint_planner::transition::{SimulatedProvisioning, TransitionOrchestrator};
use blueprint_planner::Timestamp;
use clap::Parser;
use tokio::sync::Mutex;
use tracing_futures::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("blueprint_planner", "info");
    init_subscriber(subscriber);

    let options = CliOptions::parse();
    run(options).instrument(tracing::info_span!("main")).await
}

async fn run(options: CliOptions) -> anyhow::Result<()> {
    let settings = get_settings(&options)?;
    register_planner_metrics(prometheus::default_registry())?;
    tracing::info!(?options, ?settings, "loaded settings");

    match &options.command {
        Command::Bootstrap { blueprint } => bootstrap(&options.schema_name, &settings, blueprint).await,
        Command::Show => show(&options.schema_name, &settings).await,
        Command::Force { blueprint } => force(&options.schema_name, &settings, blueprint).await,
        Command::Plan { workload, metrics, latencies, data_access, accept } => {
            let inputs = PlanInputs::load(workload, metrics, latencies, data_access.as_deref())?;
            plan(&options.schema_name, settings, inputs, *accept).await
        },
        Command::Delete => delete(&options.schema_name, &settings).await,
    }
}

fn load_user_blueprint(schema_name: &str, path: &Path) -> anyhow::Result<Blueprint> {
    let user = UserProvidedBlueprint::load_from_yaml_file(path)
        .with_context(|| format!("failed to read user blueprint from {}", path.display()))?;
    if user.schema_name != schema_name {
        anyhow::bail!("blueprint is for schema {} but {schema_name} was requested", user.schema_name);
    }
    Ok(user.into_blueprint()?)
}

async fn load_manager(schema_name: &str, settings: &Settings) -> anyhow::Result<BlueprintManager> {
    let assets = make_asset_repository(&settings.repository)?;
    let mut manager = BlueprintManager::new(schema_name, assets);
    manager.load().await?;
    Ok(manager)
}

#[tracing::instrument(level = "info", skip(settings))]
async fn bootstrap(schema_name: &str, settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let blueprint = load_user_blueprint(schema_name, path)?;
    let assets = make_asset_repository(&settings.repository)?;
    BlueprintManager::initialize_schema(assets.as_ref(), &blueprint).await?;
    println!("{}", serde_json::to_string_pretty(&blueprint)?);
    Ok(())
}

async fn show(schema_name: &str, settings: &Settings) -> anyhow::Result<()> {
    let manager = load_manager(schema_name, settings).await?;
    let (blueprint, score) = manager.get_blueprint_and_score()?;
    println!("versioning: {}", manager.get_versioning()?);
    if let Some(score) = score {
        println!("score: {score}");
    }
    println!("{}", serde_json::to_string_pretty(blueprint)?);

    if let Some(next) = manager.get_next_blueprint() {
        println!("transition in progress ({}):", manager.get_transition_state()?);
        match BlueprintDiff::of(blueprint, next) {
            Some(diff) => print!("{diff}"),
            None => println!("no physical changes"),
        }
    }
    Ok(())
}

#[tracing::instrument(level = "warn", skip(settings))]
async fn force(schema_name: &str, settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let data = std::fs::read(path).with_context(|| format!("failed to read blueprint from {}", path.display()))?;
    let blueprint = deserialize_blueprint(&data)?;
    if blueprint.schema_name() != schema_name {
        anyhow::bail!("blueprint is for schema {} but {schema_name} was requested", blueprint.schema_name());
    }

    let mut manager = load_manager(schema_name, settings).await?;
    let version = manager.force_new_blueprint(blueprint, None).await?;
    println!("forced blueprint version {version}");
    Ok(())
}

#[tracing::instrument(level = "warn", skip(settings))]
async fn delete(schema_name: &str, settings: &Settings) -> anyhow::Result<()> {
    let mut manager = load_manager(schema_name, settings).await?;
    manager.delete_schema().await?;
    println!("deleted blueprint assets of {schema_name}");
    Ok(())
}

struct PlanInputs {
    workload: Workload,
    metrics: Metrics,
    latencies: PrecomputedLatencies,
    data_access: PrecomputedDataAccess,
}

impl PlanInputs {
    fn load(workload: &Path, metrics: &Path, latencies: &Path, data_access: Option<&Path>) -> anyhow::Result<Self> {
        let read = |path: &Path| std::fs::read(path).with_context(|| format!("failed to read {}", path.display()));

        let workload = Workload::from_json_slice(&read(workload)?)?;
        let metrics = Metrics::from_json_slice(&read(metrics)?)?;
        let latencies: HashMap<String, [f64; 3]> = serde_json::from_slice(&read(latencies)?)?;

        let data_access = match data_access {
            Some(path) => {
                let raw: PrecomputedDataAccess = serde_json::from_slice(&read(path)?)?;
                let mut normalized = PrecomputedDataAccess::default();
                for (query, bytes) in raw.serverless_bytes.iter() {
                    let pages = raw.oltp_row_pages.get(query).copied().unwrap_or(0.0);
                    normalized.insert(query, *bytes, pages);
                }
                normalized
            },
            None => PrecomputedDataAccess::default(),
        };

        Ok(Self {
            workload,
            metrics,
            latencies: latencies.into_iter().collect(),
            data_access,
        })
    }
}

#[tracing::instrument(level = "info", skip(settings, inputs))]
async fn plan(schema_name: &str, settings: Settings, inputs: PlanInputs, accept: bool) -> anyhow::Result<()> {
    let transition_settings = settings.transition.clone();
    let manager = Arc::new(Mutex::new(load_manager(schema_name, &settings).await?));
    let now = Timestamp::now();

    let mut planner = BlueprintPlanner::new(
        settings,
        manager.clone(),
        Arc::new(FixedMetricsProvider::new(inputs.metrics, now)),
        Arc::new(FixedWorkloadProvider::steady(inputs.workload)),
        Arc::new(inputs.latencies),
        Arc::new(inputs.data_access),
    );
    if accept {
        planner.register_listener(Arc::new(TransitionStarter::new(manager.clone())));
    }

    let Some((blueprint, score)) = planner.run_replan(None, now).await? else {
        println!("kept the current blueprint");
        return Ok(());
    };

    println!("score: {score}");
    println!("{}", serde_json::to_string_pretty(&blueprint)?);
    if !accept {
        return Ok(());
    }

    let control = {
        let manager = manager.lock().await;
        let current = manager.get_current_blueprint()?;
        SimulatedProvisioning::new(current.oltp_row_provisioning(), current.warehouse_provisioning())
    };

    let orchestrator = TransitionOrchestrator::new(manager.clone(), Arc::new(control.clone()), &transition_settings);
    orchestrator.run_prepare_then_transition().await?;
    orchestrator.run_clean_up_after_transition().await?;

    for action in control.actions().await {
        println!("applied: {action}");
    }
    println!("versioning: {}", manager.lock().await.get_versioning()?);
    Ok(())
}
