use crate::blueprint::provisioning::instance_spec;
use crate::blueprint::Provisioning;
use crate::elements::Engine;
use crate::error::BlueprintError;
use crate::settings::PlannerSettings;

/// Instance price × nodes, in USD per hour. A powered-off engine costs nothing.
pub fn provisioning_cost(engine: Engine, provisioning: &Provisioning) -> Result<f64, BlueprintError> {
    if provisioning.is_off() {
        return Ok(0.0);
    }

    let spec = instance_spec(engine, provisioning.instance_type())?;
    Ok(spec.usd_per_hour * f64::from(provisioning.num_nodes()))
}

/// Warehouse elastic resize applies when the instance type is kept and the node count doubles or halves.
pub fn is_elastic_resize(curr: &Provisioning, next: &Provisioning) -> bool {
    let (c, n) = (curr.num_nodes(), next.num_nodes());
    curr.instance_type() == next.instance_type() && 0 < c && 0 < n && (n == c * 2 || c == n * 2)
}

/// Expected seconds to move an engine from one provisioning to another.
pub fn provisioning_transition_time_s(
    engine: Engine, curr: &Provisioning, next: &Provisioning, settings: &PlannerSettings,
) -> f64 {
    if curr == next {
        return 0.0;
    }

    match engine {
        Engine::OltpRow => {
            let power_change = curr.is_off() != next.is_off();
            if power_change || curr.instance_type() != next.instance_type() {
                settings.oltp_row.provisioning_change_time.as_secs_f64()
            } else {
                let delta = curr.num_nodes().abs_diff(next.num_nodes());
                settings.oltp_row.per_instance_change_time.as_secs_f64() * f64::from(delta)
            }
        },

        // pause and resume are as quick as an elastic resize
        Engine::Warehouse if curr.is_off() || next.is_off() || is_elastic_resize(curr, next) => {
            settings.warehouse.elastic_resize_time.as_secs_f64()
        },
        Engine::Warehouse => settings.warehouse.classic_resize_time.as_secs_f64(),

        Engine::Serverless => 0.0,
    }
}
