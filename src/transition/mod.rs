//! Applies a planned blueprint to the running engines in two resumable phases.

mod control;
mod orchestrator;
mod retry;

pub use control::{
    ControlAction, OltpRowCluster, OltpRowInstance, ProvisioningControl, ResizeKind, SimulatedProvisioning,
    WarehouseCluster,
};
pub use orchestrator::{PrimaryChangedCallback, TransitionOrchestrator};
pub use retry::{make_retry_policy, with_retries};
