use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use retry_policies::policies::ExponentialBackoff;
use tokio::sync::Mutex;

use super::control::{OltpRowCluster, OltpRowInstance, ProvisioningControl, ResizeKind, WarehouseCluster};
use super::retry::{make_retry_policy, with_retries};
use crate::blueprint::{Blueprint, BlueprintManager, Provisioning, ProvisioningDiff, TransitionState};
use crate::elements::Engine;
use crate::error::{ManagerError, TransitionError};
use crate::metrics::TRANSITION_STEPS;
use crate::planner::scoring::is_elastic_resize;
use crate::settings::TransitionSettings;

/// Called with the identifier of the new OLTP primary after every failover.
pub type PrimaryChangedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Applies the physical changes between the current and next blueprint of a manager in transition. Each phase can
/// be re-run after a failure: every step first describes the physical state and skips work already done.
pub struct TransitionOrchestrator {
    manager: Arc<Mutex<BlueprintManager>>,
    control: Arc<dyn ProvisioningControl>,
    retry_policy: ExponentialBackoff,
    on_primary_changed: Option<PrimaryChangedCallback>,
}

impl fmt::Debug for TransitionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionOrchestrator")
            .field("control", &self.control)
            .field("retry_policy", &self.retry_policy)
            .field("on_primary_changed", &self.on_primary_changed.is_some())
            .finish()
    }
}

struct TransitionBlueprints {
    state: TransitionState,
    current: Blueprint,
    next: Blueprint,
}

impl TransitionBlueprints {
    fn diff(&self, engine: Engine) -> Option<ProvisioningDiff> {
        match (self.current.provisioning(engine), self.next.provisioning(engine)) {
            (Some(c), Some(n)) => ProvisioningDiff::of(c, n),
            _ => None,
        }
    }
}

impl TransitionOrchestrator {
    pub fn new(
        manager: Arc<Mutex<BlueprintManager>>, control: Arc<dyn ProvisioningControl>, settings: &TransitionSettings,
    ) -> Self {
        Self {
            manager,
            control,
            retry_policy: make_retry_policy(settings),
            on_primary_changed: None,
        }
    }

    #[must_use]
    pub fn with_primary_changed_callback(mut self, callback: PrimaryChangedCallback) -> Self {
        self.on_primary_changed = Some(callback);
        self
    }

    /// Brings both engines up to their next provisioning, scaling down to zero excepted, then marks the transition
    /// `TransitionedPreCleanUp`. Re-running it once applied re-verifies without mutating anything.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run_prepare_then_transition(&self) -> Result<(), TransitionError> {
        let blueprints = self.transition_blueprints(&[
            TransitionState::Transitioning,
            TransitionState::TransitionedPreCleanUp,
        ])
        .await?;

        let oltp_row_diff = blueprints.diff(Engine::OltpRow);
        let warehouse_diff = blueprints.diff(Engine::Warehouse);
        if oltp_row_diff.is_none() && warehouse_diff.is_none() {
            tracing::info!("no provisioning changes to prepare");
        } else {
            futures::future::try_join(
                self.prepare_oltp_row(blueprints.next.oltp_row_provisioning(), oltp_row_diff.is_some()),
                self.prepare_warehouse(blueprints.next.warehouse_provisioning(), warehouse_diff.is_some()),
            )
            .await?;
        }

        if blueprints.state == TransitionState::Transitioning {
            let mut manager = self.manager.lock().await;
            manager.update_transition_state(TransitionState::TransitionedPreCleanUp).await?;
        }
        Ok(())
    }

    /// Removes surplus replicas and pauses engines scaled to zero, then completes the transition.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run_clean_up_after_transition(&self) -> Result<(), TransitionError> {
        let blueprints = self.transition_blueprints(&[
            TransitionState::TransitionedPreCleanUp,
            TransitionState::CleaningUp,
        ])
        .await?;

        if blueprints.state == TransitionState::TransitionedPreCleanUp {
            let mut manager = self.manager.lock().await;
            manager.update_transition_state(TransitionState::CleaningUp).await?;
        }

        let oltp_row_diff = blueprints.diff(Engine::OltpRow);
        let warehouse_diff = blueprints.diff(Engine::Warehouse);
        if oltp_row_diff.is_none() && warehouse_diff.is_none() {
            tracing::info!("no provisioning changes to clean up");
        } else {
            futures::future::try_join(
                self.clean_up_oltp_row(blueprints.next.oltp_row_provisioning(), oltp_row_diff.is_some()),
                self.clean_up_warehouse(blueprints.next.warehouse_provisioning(), warehouse_diff.is_some()),
            )
            .await?;
        }

        let mut manager = self.manager.lock().await;
        manager.update_transition_state(TransitionState::Stable).await?;
        Ok(())
    }

    async fn transition_blueprints(&self, allowed: &[TransitionState]) -> Result<TransitionBlueprints, TransitionError> {
        let manager = self.manager.lock().await;
        let state = manager.get_transition_state()?;
        if !allowed.contains(&state) {
            return Err(TransitionError::UnexpectedState { expected: allowed[0], actual: state });
        }

        let current = manager.get_current_blueprint()?.clone();
        let next = manager.get_next_blueprint().cloned().ok_or(ManagerError::NotLoaded)?;
        Ok(TransitionBlueprints { state, current, next })
    }

    async fn prepare_oltp_row(&self, next: &Provisioning, changed: bool) -> Result<(), TransitionError> {
        if !changed {
            return Ok(());
        }

        if next.is_off() {
            tracing::debug!("deferring oltp_row scale down to zero until clean up");
            return Ok(());
        }

        let mut cluster = self.describe_oltp_row().await?;
        if cluster.paused {
            self.step(Engine::OltpRow, "resume", || self.control.resume_oltp_row()).await?;
            cluster = self.describe_oltp_row().await?;
        }

        let target_type = next.instance_type();
        let primary = cluster.primary().cloned().ok_or_else(|| TransitionError::Control {
            operation: "describe_oltp_row".to_string(),
            reason: "cluster has no primary".to_string(),
        })?;

        if primary.instance_type != target_type {
            let reusable = cluster
                .replicas()
                .find(|r| r.instance_type == target_type)
                .map(|r| r.instance_id.clone());

            let new_primary_id = match reusable {
                Some(instance_id) => instance_id,
                None => self.create_oltp_row_instance(target_type).await?,
            };

            self.step(Engine::OltpRow, "failover", || self.control.failover_oltp_row(&new_primary_id))
                .await?;
            self.notify_primary_changed(&new_primary_id);

            self.step(Engine::OltpRow, "delete", || {
                self.control.delete_oltp_row_instance(&primary.instance_id)
            })
            .await?;
            cluster = self.describe_oltp_row().await?;
        }

        let target_replicas = next.num_replicas() as usize;
        let replicas: Vec<OltpRowInstance> = cluster.replicas().cloned().collect();
        for replica in replicas.iter().take(target_replicas) {
            if replica.instance_type != target_type {
                self.step(Engine::OltpRow, "modify", || {
                    self.control.modify_oltp_row_instance(&replica.instance_id, target_type)
                })
                .await?;
            }
        }

        for _ in replicas.len()..target_replicas {
            self.create_oltp_row_instance(target_type).await?;
        }

        Ok(())
    }

    async fn prepare_warehouse(&self, next: &Provisioning, changed: bool) -> Result<(), TransitionError> {
        if !changed {
            return Ok(());
        }

        if next.is_off() {
            tracing::debug!("deferring warehouse pause until clean up");
            return Ok(());
        }

        let cluster = self.describe_warehouse().await?;
        if cluster.paused {
            self.step(Engine::Warehouse, "resume", || self.control.resume_warehouse()).await?;
        }

        let physical = Provisioning::new(cluster.instance_type.as_str(), cluster.num_nodes);
        if physical != *next {
            let kind = if is_elastic_resize(&physical, next) {
                ResizeKind::Elastic
            } else {
                ResizeKind::Classic
            };

            tracing::info!(from=%physical, to=%next, %kind, "resizing warehouse");
            self.step(Engine::Warehouse, kind.into(), || {
                self.control.resize_warehouse(next.instance_type(), next.num_nodes(), kind)
            })
            .await?;
        }

        Ok(())
    }

    async fn clean_up_oltp_row(&self, next: &Provisioning, changed: bool) -> Result<(), TransitionError> {
        if !changed {
            return Ok(());
        }

        let cluster = self.describe_oltp_row().await?;
        let target_replicas = next.num_replicas() as usize;
        let surplus: Vec<String> = cluster
            .replicas()
            .skip(target_replicas)
            .map(|r| r.instance_id.clone())
            .collect();

        for instance_id in surplus.iter() {
            self.step(Engine::OltpRow, "delete", || self.control.delete_oltp_row_instance(instance_id))
                .await?;
        }

        if next.is_off() && !cluster.paused {
            self.step(Engine::OltpRow, "pause", || self.control.pause_oltp_row()).await?;
        }

        Ok(())
    }

    async fn clean_up_warehouse(&self, next: &Provisioning, changed: bool) -> Result<(), TransitionError> {
        if !changed || !next.is_off() {
            return Ok(());
        }

        let cluster = self.describe_warehouse().await?;
        if !cluster.paused {
            self.step(Engine::Warehouse, "pause", || self.control.pause_warehouse()).await?;
        }

        Ok(())
    }

    /// Creates one instance. A retry first re-describes the cluster, and an instance of the type that was not there
    /// before the first attempt is taken as the product of a create whose response was lost.
    async fn create_oltp_row_instance(&self, instance_type: &str) -> Result<String, TransitionError> {
        let known: HashSet<String> = self
            .describe_oltp_row()
            .await?
            .instances
            .into_iter()
            .map(|i| i.instance_id)
            .collect();

        let known = &known;
        let mut attempted = false;
        self.step(Engine::OltpRow, "create", || {
            let is_retry = attempted;
            attempted = true;
            async move {
                if is_retry {
                    let cluster = self.control.describe_oltp_row().await?;
                    let created = cluster
                        .instances
                        .iter()
                        .find(|i| i.instance_type == instance_type && !known.contains(&i.instance_id));
                    if let Some(instance) = created {
                        tracing::warn!(instance_id=%instance.instance_id, "found instance from earlier create attempt");
                        return Ok(instance.instance_id.clone());
                    }
                }

                self.control.create_oltp_row_instance(instance_type).await
            }
        })
        .await
    }

    async fn describe_oltp_row(&self) -> Result<OltpRowCluster, TransitionError> {
        with_retries("describe_oltp_row", &self.retry_policy, || self.control.describe_oltp_row()).await
    }

    async fn describe_warehouse(&self) -> Result<WarehouseCluster, TransitionError> {
        with_retries("describe_warehouse", &self.retry_policy, || self.control.describe_warehouse()).await
    }

    /// One retried mutation, counted per engine and action.
    async fn step<T, F, Fut>(&self, engine: Engine, action: &'static str, op: F) -> Result<T, TransitionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransitionError>>,
    {
        let operation = format!("{}_{}", engine.label(), action);
        let value = with_retries(&operation, &self.retry_policy, op).await?;
        TRANSITION_STEPS.with_label_values(&[engine.label(), action]).inc();
        tracing::debug!(%operation, "completed transition step");
        Ok(value)
    }

    fn notify_primary_changed(&self, new_primary_id: &str) {
        tracing::info!(%new_primary_id, "oltp_row primary changed");
        if let Some(callback) = self.on_primary_changed.as_ref() {
            callback(new_primary_id);
        }
    }
}
