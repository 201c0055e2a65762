use super::ScoringContext;
use crate::blueprint::provisioning::num_cpus;
use crate::blueprint::Provisioning;
use crate::elements::Engine;
use crate::error::BlueprintError;

/// vCPUs × nodes of the cluster the latency coefficients were fit on.
const BASE_RESOURCES: f64 = 2.0 * 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct WarehousePrediction {
    pub latencies: Vec<f64>,
    pub query_factor: Option<f64>,

    /// Utilization of the hottest node in `[0, 1]`; informational only.
    pub max_node_cpu_util: f64,
}

pub fn predict(
    base_latencies: &[f64], arrival_counts: &[f64], curr: &Provisioning, next: &Provisioning, ctx: &ScoringContext,
) -> Result<WarehousePrediction, BlueprintError> {
    let coefs = &ctx.settings().warehouse.latency_coefs;
    let next_cpus = f64::from(num_cpus(Engine::Warehouse, next)?);

    let latencies = if next.is_off() {
        base_latencies.to_vec()
    } else {
        let rf = BASE_RESOURCES / (next_cpus * f64::from(next.num_nodes()));
        let factor = coefs[0] * rf + coefs[1];
        base_latencies.iter().map(|lat| lat * factor).collect()
    };

    let query_factor = ctx.query_factor(Engine::Warehouse, base_latencies, arrival_counts);
    let max_node_cpu_util = predict_max_node_cpu_util(curr, next, query_factor, ctx)?;

    Ok(WarehousePrediction { latencies, query_factor, max_node_cpu_util })
}

fn predict_max_node_cpu_util(
    curr: &Provisioning, next: &Provisioning, query_factor: Option<f64>, ctx: &ScoringContext,
) -> Result<f64, BlueprintError> {
    let settings = ctx.settings();
    let qf = match (curr.is_off(), next.is_off(), query_factor) {
        (_, true, _) => return Ok(0.0),
        (true, false, _) | (false, false, None) => return Ok(settings.initialize_load_fraction),
        (false, false, Some(qf)) => qf,
    };

    let curr_cpus = f64::from(num_cpus(Engine::Warehouse, curr)?);
    let next_cpus = f64::from(num_cpus(Engine::Warehouse, next)?);
    let curr_nodes = curr.num_nodes();
    let next_nodes = next.num_nodes();

    let metrics = ctx.metrics();
    let mut denorm: Vec<f64> = if metrics.warehouse_cpu_list.is_empty() {
        vec![metrics.warehouse_cpu_avg; curr_nodes as usize]
    } else {
        metrics.warehouse_cpu_list.clone()
    };
    denorm.iter_mut().for_each(|cpu| *cpu = *cpu / 100.0 * curr_cpus);
    denorm.sort_by(|a, b| b.total_cmp(a));

    let Some(mut max) = denorm.first().copied() else {
        return Ok(0.0);
    };

    if settings.warehouse.peak_load_threshold_pct / 100.0 < max / curr_cpus {
        max *= settings.warehouse.peak_load_multiplier;
    }

    let skew = ctx.warehouse_cpu_skew();
    let next_max = if curr_nodes < next_nodes {
        if skew < 0.5 {
            max
        } else {
            max * (f64::from(curr_nodes) / f64::from(next_nodes)).powf(skew)
        }
    } else if next_nodes < curr_nodes {
        // the least loaded nodes go away and their load spreads over the remaining ones
        let removed = (curr_nodes - next_nodes) as usize;
        let redistributed: f64 = denorm.iter().rev().take(removed).sum();
        max + redistributed / f64::from(next_nodes)
    } else {
        max
    };

    let clean_factor = if 1.0 <= qf { qf } else { qf.max(settings.min_load_removal_fraction) };
    Ok((clean_factor * next_max / next_cpus).clamp(0.0, 1.0))
}

/// `1 - sqrt(mean((cpu_i - cpu_max)²))` over the non-maximum nodes with CPU as a fraction. One for an even or
/// single-node cluster.
pub fn cpu_skew_adjustment(cpu_list_pct: &[f64]) -> f64 {
    if cpu_list_pct.len() <= 1 {
        return 1.0;
    }

    let mut fractions: Vec<f64> = cpu_list_pct.iter().map(|c| c / 100.0).collect();
    fractions.sort_by(|a, b| b.total_cmp(a));
    let max = fractions[0];
    let rest = &fractions[1..];
    let mean_sq = rest.iter().map(|c| (c - max).powi(2)).sum::<f64>() / rest.len() as f64;
    1.0 - mean_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cpu_skew_adjustment() {
        assert_relative_eq!(cpu_skew_adjustment(&[]), 1.0);
        assert_relative_eq!(cpu_skew_adjustment(&[90.0]), 1.0);
        assert_relative_eq!(cpu_skew_adjustment(&[50.0, 50.0, 50.0]), 1.0);
        assert_relative_eq!(cpu_skew_adjustment(&[10.0, 90.0]), 0.2, epsilon = 1e-12);
    }
}
