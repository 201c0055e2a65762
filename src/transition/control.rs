use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use tokio::sync::Mutex;

use crate::blueprint::Provisioning;
use crate::error::TransitionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OltpRowInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub is_primary: bool,
}

/// Physical state of the OLTP cluster: its writer and read replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OltpRowCluster {
    pub instances: Vec<OltpRowInstance>,
    pub paused: bool,
}

impl OltpRowCluster {
    pub fn primary(&self) -> Option<&OltpRowInstance> {
        self.instances.iter().find(|i| i.is_primary)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &OltpRowInstance> + '_ {
        self.instances.iter().filter(|i| !i.is_primary)
    }

    /// The provisioning this physical state amounts to; a paused cluster has zero nodes.
    pub fn provisioning(&self) -> Option<Provisioning> {
        let primary = self.primary()?;
        let nodes = if self.paused { 0 } else { self.instances.len() as u32 };
        Some(Provisioning::new(primary.instance_type.as_str(), nodes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseCluster {
    pub instance_type: String,
    pub num_nodes: u32,
    pub paused: bool,
}

impl WarehouseCluster {
    pub fn provisioning(&self) -> Provisioning {
        let nodes = if self.paused { 0 } else { self.num_nodes };
        Provisioning::new(self.instance_type.as_str(), nodes)
    }
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResizeKind {
    Elastic,
    Classic,
}

/// Cloud-side operations the transition orchestrator drives. Implementations wait until each mutation has taken
/// effect before returning.
#[async_trait]
pub trait ProvisioningControl: Debug + Send + Sync {
    async fn describe_oltp_row(&self) -> Result<OltpRowCluster, TransitionError>;

    /// Adds a read replica of the given type and returns its identifier.
    async fn create_oltp_row_instance(&self, instance_type: &str) -> Result<String, TransitionError>;
    async fn delete_oltp_row_instance(&self, instance_id: &str) -> Result<(), TransitionError>;
    async fn modify_oltp_row_instance(&self, instance_id: &str, instance_type: &str) -> Result<(), TransitionError>;
    async fn failover_oltp_row(&self, new_primary_id: &str) -> Result<(), TransitionError>;
    async fn pause_oltp_row(&self) -> Result<(), TransitionError>;
    async fn resume_oltp_row(&self) -> Result<(), TransitionError>;

    async fn describe_warehouse(&self) -> Result<WarehouseCluster, TransitionError>;
    async fn resize_warehouse(
        &self, instance_type: &str, num_nodes: u32, kind: ResizeKind,
    ) -> Result<(), TransitionError>;
    async fn pause_warehouse(&self) -> Result<(), TransitionError>;
    async fn resume_warehouse(&self) -> Result<(), TransitionError>;
}

/// A mutation recorded by [`SimulatedProvisioning`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    CreateOltpRowInstance { instance_id: String, instance_type: String },
    DeleteOltpRowInstance { instance_id: String },
    ModifyOltpRowInstance { instance_id: String, instance_type: String },
    FailoverOltpRow { new_primary_id: String },
    PauseOltpRow,
    ResumeOltpRow,
    ResizeWarehouse { instance_type: String, num_nodes: u32, kind: ResizeKind },
    PauseWarehouse,
    ResumeWarehouse,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateOltpRowInstance { instance_id, instance_type } => {
                write!(f, "create oltp_row instance {instance_id} ({instance_type})")
            },
            Self::DeleteOltpRowInstance { instance_id } => write!(f, "delete oltp_row instance {instance_id}"),
            Self::ModifyOltpRowInstance { instance_id, instance_type } => {
                write!(f, "modify oltp_row instance {instance_id} to {instance_type}")
            },
            Self::FailoverOltpRow { new_primary_id } => write!(f, "fail over oltp_row to {new_primary_id}"),
            Self::PauseOltpRow => write!(f, "pause oltp_row"),
            Self::ResumeOltpRow => write!(f, "resume oltp_row"),
            Self::ResizeWarehouse { instance_type, num_nodes, kind } => {
                write!(f, "{kind} resize warehouse to {instance_type}({num_nodes})")
            },
            Self::PauseWarehouse => write!(f, "pause warehouse"),
            Self::ResumeWarehouse => write!(f, "resume warehouse"),
        }
    }
}

#[derive(Debug)]
struct SimulatedState {
    oltp_row: OltpRowCluster,
    warehouse: WarehouseCluster,
    next_instance_nr: usize,
    actions: Vec<ControlAction>,
    transient_failures: u32,
    lost_responses: u32,
}

impl SimulatedState {
    fn check_available(&mut self, operation: &str) -> Result<(), TransitionError> {
        if 0 < self.transient_failures {
            self.transient_failures -= 1;
            return Err(TransitionError::Transient {
                operation: operation.to_string(),
                reason: "simulated connectivity loss".to_string(),
            });
        }
        Ok(())
    }

    fn instance_mut(&mut self, instance_id: &str) -> Result<&mut OltpRowInstance, TransitionError> {
        self.oltp_row
            .instances
            .iter_mut()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| TransitionError::Control {
                operation: "oltp_row_instance".to_string(),
                reason: format!("unknown instance: {instance_id}"),
            })
    }

    fn new_instance_id(&mut self) -> String {
        let id = format!("oltp-row-{}", self.next_instance_nr);
        self.next_instance_nr += 1;
        id
    }
}

/// In-memory provisioning that applies and records every mutation. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedProvisioning {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedProvisioning {
    /// Starts from the physical state matching the given provisionings. A zero-node engine starts paused with one
    /// node of its type.
    pub fn new(oltp_row: &Provisioning, warehouse: &Provisioning) -> Self {
        let nr_instances = oltp_row.num_nodes().max(1) as usize;
        let instances = (0..nr_instances)
            .map(|nr| OltpRowInstance {
                instance_id: format!("oltp-row-{nr}"),
                instance_type: oltp_row.instance_type().to_string(),
                is_primary: nr == 0,
            })
            .collect();

        let state = SimulatedState {
            oltp_row: OltpRowCluster { instances, paused: oltp_row.is_off() },
            warehouse: WarehouseCluster {
                instance_type: warehouse.instance_type().to_string(),
                num_nodes: warehouse.num_nodes().max(1),
                paused: warehouse.is_off(),
            },
            next_instance_nr: nr_instances,
            actions: Vec::new(),
            transient_failures: 0,
            lost_responses: 0,
        };

        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// The next `count` calls fail with a transient error.
    pub async fn inject_transient_failures(&self, count: u32) {
        self.state.lock().await.transient_failures = count;
    }

    /// The next `count` instance creations take effect but report a transient failure.
    pub async fn inject_lost_responses(&self, count: u32) {
        self.state.lock().await.lost_responses = count;
    }

    pub async fn actions(&self) -> Vec<ControlAction> {
        self.state.lock().await.actions.clone()
    }

    pub async fn clear_actions(&self) {
        self.state.lock().await.actions.clear();
    }
}

#[async_trait]
impl ProvisioningControl for SimulatedProvisioning {
    async fn describe_oltp_row(&self) -> Result<OltpRowCluster, TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("describe_oltp_row")?;
        Ok(state.oltp_row.clone())
    }

    async fn create_oltp_row_instance(&self, instance_type: &str) -> Result<String, TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("create_oltp_row_instance")?;
        let instance_id = state.new_instance_id();
        state.oltp_row.instances.push(OltpRowInstance {
            instance_id: instance_id.clone(),
            instance_type: instance_type.to_string(),
            is_primary: false,
        });
        state.actions.push(ControlAction::CreateOltpRowInstance {
            instance_id: instance_id.clone(),
            instance_type: instance_type.to_string(),
        });

        if 0 < state.lost_responses {
            state.lost_responses -= 1;
            return Err(TransitionError::Transient {
                operation: "create_oltp_row_instance".to_string(),
                reason: "simulated lost response".to_string(),
            });
        }
        Ok(instance_id)
    }

    async fn delete_oltp_row_instance(&self, instance_id: &str) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("delete_oltp_row_instance")?;
        if state.instance_mut(instance_id)?.is_primary {
            return Err(TransitionError::Control {
                operation: "delete_oltp_row_instance".to_string(),
                reason: format!("{instance_id} is the primary"),
            });
        }
        state.oltp_row.instances.retain(|i| i.instance_id != instance_id);
        state
            .actions
            .push(ControlAction::DeleteOltpRowInstance { instance_id: instance_id.to_string() });
        Ok(())
    }

    async fn modify_oltp_row_instance(&self, instance_id: &str, instance_type: &str) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("modify_oltp_row_instance")?;
        state.instance_mut(instance_id)?.instance_type = instance_type.to_string();
        state.actions.push(ControlAction::ModifyOltpRowInstance {
            instance_id: instance_id.to_string(),
            instance_type: instance_type.to_string(),
        });
        Ok(())
    }

    async fn failover_oltp_row(&self, new_primary_id: &str) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("failover_oltp_row")?;
        state.instance_mut(new_primary_id)?;
        for instance in state.oltp_row.instances.iter_mut() {
            instance.is_primary = instance.instance_id == new_primary_id;
        }
        state
            .actions
            .push(ControlAction::FailoverOltpRow { new_primary_id: new_primary_id.to_string() });
        Ok(())
    }

    async fn pause_oltp_row(&self) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("pause_oltp_row")?;
        state.oltp_row.paused = true;
        state.actions.push(ControlAction::PauseOltpRow);
        Ok(())
    }

    async fn resume_oltp_row(&self) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("resume_oltp_row")?;
        state.oltp_row.paused = false;
        state.actions.push(ControlAction::ResumeOltpRow);
        Ok(())
    }

    async fn describe_warehouse(&self) -> Result<WarehouseCluster, TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("describe_warehouse")?;
        Ok(state.warehouse.clone())
    }

    async fn resize_warehouse(
        &self, instance_type: &str, num_nodes: u32, kind: ResizeKind,
    ) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("resize_warehouse")?;
        state.warehouse.instance_type = instance_type.to_string();
        state.warehouse.num_nodes = num_nodes;
        state.actions.push(ControlAction::ResizeWarehouse {
            instance_type: instance_type.to_string(),
            num_nodes,
            kind,
        });
        Ok(())
    }

    async fn pause_warehouse(&self) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("pause_warehouse")?;
        state.warehouse.paused = true;
        state.actions.push(ControlAction::PauseWarehouse);
        Ok(())
    }

    async fn resume_warehouse(&self) -> Result<(), TransitionError> {
        let mut state = self.state.lock().await;
        state.check_available("resume_warehouse")?;
        state.warehouse.paused = false;
        state.actions.push(ControlAction::ResumeWarehouse);
        Ok(())
    }
}
