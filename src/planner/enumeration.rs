use crate::blueprint::provisioning::{instance_catalog, instance_spec, InstanceSpec};
use crate::blueprint::Provisioning;
use crate::elements::Engine;
use crate::error::BlueprintError;

/// Neighborhood radius around `base`: the resource value of one node of its instance type × its node count ×
/// `multiplier`. A powered-off base counts as one node.
pub fn scaling_to_distance(engine: Engine, base: &Provisioning, multiplier: f64) -> Result<f64, BlueprintError> {
    let spec = instance_spec(engine, base.instance_type())?;
    Ok(spec.node_resource_value() * f64::from(base.num_nodes().max(1)) * multiplier)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Stage {
    ZeroNodes,
    Catalog { type_idx: usize, num_nodes: u32 },
    ElasticResize { step: usize },
    Done,
}

/// Lazily walks the provisionings of one engine whose resource value lies within `max_distance` of a base. The
/// powered-off case is always produced first. For the warehouse, doubling or halving the base's node count is also
/// produced since it qualifies for an elastic resize.
///
/// The yielded provisioning is one instance mutated in place; callers that keep it must clone it.
#[derive(Debug, Clone)]
pub struct NearbyProvisionings {
    engine: Engine,
    base: Provisioning,
    base_value: f64,
    max_distance: f64,
    catalog: Vec<(&'static str, InstanceSpec)>,
    working: Provisioning,
    stage: Stage,
}

impl NearbyProvisionings {
    pub fn new(engine: Engine, base: &Provisioning, max_distance: f64) -> Result<Self, BlueprintError> {
        let spec = instance_spec(engine, base.instance_type())?;
        let catalog = instance_catalog(engine)
            .map(|c| c.iter().map(|(name, spec)| (*name, *spec)).collect())
            .unwrap_or_default();

        Ok(Self {
            engine,
            base: base.clone(),
            base_value: spec.node_resource_value() * f64::from(base.num_nodes()),
            max_distance,
            catalog,
            working: base.clone(),
            stage: Stage::ZeroNodes,
        })
    }

    /// Neighborhood bounded by [`scaling_to_distance`].
    pub fn around(engine: Engine, base: &Provisioning, multiplier: f64) -> Result<Self, BlueprintError> {
        let max_distance = scaling_to_distance(engine, base, multiplier)?;
        Self::new(engine, base, max_distance)
    }

    pub const fn engine(&self) -> Engine {
        self.engine
    }

    pub fn restart(&mut self) {
        self.stage = Stage::ZeroNodes;
    }

    fn is_nearby(&self, spec: &InstanceSpec, num_nodes: u32) -> bool {
        let value = spec.node_resource_value() * f64::from(num_nodes);
        (value - self.base_value).abs() <= self.max_distance
    }

    fn elastic_resize_target(&self, step: usize) -> Option<u32> {
        let nodes = self.base.num_nodes();
        match step {
            0 => nodes.checked_mul(2),
            1 if nodes % 2 == 0 => Some(nodes / 2),
            _ => None,
        }
        .filter(|n| 0 < *n)
    }

    pub fn next_candidate(&mut self) -> Option<&Provisioning> {
        loop {
            match self.stage {
                Stage::ZeroNodes => {
                    let num_nodes = self.catalog.first().map(|(_, s)| s.min_nodes).unwrap_or(1);
                    self.stage = Stage::Catalog { type_idx: 0, num_nodes };
                    let base_type = self.base.instance_type.clone();
                    self.working.set_instance_type(&base_type);
                    self.working.set_num_nodes(0);
                    return Some(&self.working);
                },

                Stage::Catalog { type_idx, num_nodes } => {
                    let Some((name, spec)) = self.catalog.get(type_idx).copied() else {
                        self.stage = if self.engine == Engine::Warehouse {
                            Stage::ElasticResize { step: 0 }
                        } else {
                            Stage::Done
                        };
                        continue;
                    };

                    if spec.max_nodes < num_nodes {
                        let next_min = self.catalog.get(type_idx + 1).map(|(_, s)| s.min_nodes).unwrap_or(1);
                        self.stage = Stage::Catalog { type_idx: type_idx + 1, num_nodes: next_min };
                        continue;
                    }

                    self.stage = Stage::Catalog { type_idx, num_nodes: num_nodes + 1 };
                    if self.is_nearby(&spec, num_nodes) {
                        self.working.set_instance_type(name);
                        self.working.set_num_nodes(num_nodes);
                        return Some(&self.working);
                    }
                },

                Stage::ElasticResize { step } => {
                    if 2 <= step {
                        self.stage = Stage::Done;
                        continue;
                    }

                    self.stage = Stage::ElasticResize { step: step + 1 };
                    let Ok(spec) = instance_spec(self.engine, self.base.instance_type()).copied() else {
                        continue;
                    };

                    match self.elastic_resize_target(step) {
                        Some(n) if spec.supports_nodes(n) && !self.is_nearby(&spec, n) => {
                            let base_type = self.base.instance_type.clone();
                            self.working.set_instance_type(&base_type);
                            self.working.set_num_nodes(n);
                            return Some(&self.working);
                        },
                        _ => continue,
                    }
                },

                Stage::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim::*;
    use pretty_assertions::assert_eq;

    fn collect(it: &mut NearbyProvisionings) -> Vec<Provisioning> {
        let mut result = Vec::new();
        while let Some(p) = it.next_candidate() {
            result.push(p.clone());
        }
        result
    }

    #[test]
    fn test_zero_node_case_always_first() {
        let base = Provisioning::new("db.r6g.xlarge", 1);
        let mut it = assert_ok!(NearbyProvisionings::new(Engine::OltpRow, &base, 0.0));
        let actual = collect(&mut it);
        assert_eq!(actual[0], Provisioning::new("db.r6g.xlarge", 0));
        assert!(actual.contains(&base));

        // other shapes with exactly the same resource value are still at distance zero
        assert!(actual.contains(&Provisioning::new("db.r6g.large", 2)));
        let base_value = assert_ok!(crate::blueprint::provisioning::resource_value(Engine::OltpRow, &base));
        for p in actual.iter().skip(1) {
            let value = assert_ok!(crate::blueprint::provisioning::resource_value(Engine::OltpRow, p));
            approx::assert_relative_eq!(value, base_value);
        }
    }

    #[test]
    fn test_neighborhood_within_distance() {
        let base = Provisioning::new("db.r6g.xlarge", 1);
        let distance = assert_ok!(scaling_to_distance(Engine::OltpRow, &base, 1.0));
        let mut it = assert_ok!(NearbyProvisionings::new(Engine::OltpRow, &base, distance));
        let actual = collect(&mut it);

        assert_eq!(actual[0].num_nodes(), 0);
        assert!(actual.contains(&Provisioning::new("db.r6g.xlarge", 2)));
        assert!(actual.contains(&Provisioning::new("db.r6g.2xlarge", 1)));
        assert!(actual.contains(&Provisioning::new("db.r6g.large", 1)));
        assert!(!actual.contains(&Provisioning::new("db.r6g.2xlarge", 2)));
        assert!(!actual.contains(&Provisioning::new("db.r6g.8xlarge", 1)));

        let base_value = assert_ok!(crate::blueprint::provisioning::resource_value(Engine::OltpRow, &base));
        for p in actual.iter().skip(1) {
            let value = assert_ok!(crate::blueprint::provisioning::resource_value(Engine::OltpRow, p));
            assert!((value - base_value).abs() <= distance + 1e-9, "{} is too far", p);
        }

        it.restart();
        assert_eq!(collect(&mut it), actual);
    }

    #[test]
    fn test_powered_off_base_uses_one_node() {
        let base = Provisioning::new("dc2.large", 0);
        let mut it = assert_ok!(NearbyProvisionings::around(Engine::Warehouse, &base, 1.0));
        let actual = collect(&mut it);
        assert_eq!(actual[0], Provisioning::new("dc2.large", 0));
        assert!(actual.contains(&Provisioning::new("dc2.large", 1)));
    }

    #[test]
    fn test_warehouse_elastic_resize_targets() {
        let base = Provisioning::new("dc2.large", 4);
        let mut it = assert_ok!(NearbyProvisionings::new(Engine::Warehouse, &base, 0.0));
        let actual = collect(&mut it);
        assert_eq!(
            actual,
            vec![
                Provisioning::new("dc2.large", 0),
                Provisioning::new("dc2.large", 4),
                Provisioning::new("dc2.large", 8),
                Provisioning::new("dc2.large", 2),
            ]
        );

        let base = Provisioning::new("ra3.4xlarge", 2);
        let mut it = assert_ok!(NearbyProvisionings::new(Engine::Warehouse, &base, 0.0));
        let actual = collect(&mut it);
        assert!(actual.contains(&Provisioning::new("ra3.4xlarge", 4)));
        assert!(!actual.contains(&Provisioning::new("ra3.4xlarge", 1)));
    }

    #[test]
    fn test_unknown_base_is_rejected() {
        assert_err!(NearbyProvisionings::new(Engine::OltpRow, &Provisioning::new("m5.large", 1), 1.0));
        assert_err!(scaling_to_distance(Engine::Serverless, &Provisioning::new("dc2.large", 1), 1.0));
    }
}
