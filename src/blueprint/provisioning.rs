use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::elements::Engine;
use crate::error::BlueprintError;

/// Instance type and node count of a stateful engine. Zero nodes means the engine is powered off. For
/// `OltpRow` the node count includes the writer, so `num_nodes - 1` read replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provisioning {
    pub instance_type: String,
    pub num_nodes: u32,
}

impl Provisioning {
    pub fn new(instance_type: impl Into<String>, num_nodes: u32) -> Self {
        Self { instance_type: instance_type.into(), num_nodes }
    }

    pub fn instance_type(&self) -> &str {
        self.instance_type.as_str()
    }

    pub const fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    pub const fn is_off(&self) -> bool {
        self.num_nodes == 0
    }

    /// Read replicas behind the writer; only meaningful for `OltpRow`.
    pub const fn num_replicas(&self) -> u32 {
        self.num_nodes.saturating_sub(1)
    }

    /// Reuses the existing allocation; the enumerator mutates one instance in place.
    pub fn set_instance_type(&mut self, instance_type: &str) {
        if self.instance_type != instance_type {
            self.instance_type.clear();
            self.instance_type.push_str(instance_type);
        }
    }

    pub fn set_num_nodes(&mut self, num_nodes: u32) {
        self.num_nodes = num_nodes;
    }
}

impl fmt::Display for Provisioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.instance_type, self.num_nodes)
    }
}

/// Fields that change between two provisionings. At least one is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_num_nodes: Option<u32>,
}

impl ProvisioningDiff {
    pub fn of(old: &Provisioning, new: &Provisioning) -> Option<Self> {
        let new_instance_type = if old.instance_type != new.instance_type {
            Some(new.instance_type.clone())
        } else {
            None
        };

        let new_num_nodes = if old.num_nodes != new.num_nodes { Some(new.num_nodes) } else { None };

        if new_instance_type.is_none() && new_num_nodes.is_none() {
            None
        } else {
            Some(Self { new_instance_type, new_num_nodes })
        }
    }
}

impl fmt::Display for ProvisioningDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.new_instance_type, self.new_num_nodes) {
            (Some(t), Some(n)) => write!(f, "-> {}({})", t, n),
            (Some(t), None) => write!(f, "-> {}", t),
            (None, Some(n)) => write!(f, "-> {} nodes", n),
            (None, None) => write!(f, "unchanged"),
        }
    }
}

/// Catalog entry for an instance type.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InstanceSpec {
    pub vcpus: u32,
    pub memory_mib: u32,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub usd_per_hour: f64,
}

impl InstanceSpec {
    const fn new(vcpus: u32, memory_mib: u32, min_nodes: u32, max_nodes: u32, usd_per_hour: f64) -> Self {
        Self { vcpus, memory_mib, min_nodes, max_nodes, usd_per_hour }
    }

    /// Resource value of one node: √(vCPU × memory MiB).
    pub fn node_resource_value(&self) -> f64 {
        (f64::from(self.vcpus) * f64::from(self.memory_mib)).sqrt()
    }

    pub const fn supports_nodes(&self, num_nodes: u32) -> bool {
        self.min_nodes <= num_nodes && num_nodes <= self.max_nodes
    }
}

static OLTP_ROW_INSTANCES: Lazy<BTreeMap<&'static str, InstanceSpec>> = Lazy::new(|| {
    maplit::btreemap! {
        "db.t4g.medium" => InstanceSpec::new(2, 4_096, 1, 6, 0.073),
        "db.r6g.large" => InstanceSpec::new(2, 16_384, 1, 6, 0.26),
        "db.r6g.xlarge" => InstanceSpec::new(4, 32_768, 1, 6, 0.519),
        "db.r6g.2xlarge" => InstanceSpec::new(8, 65_536, 1, 6, 1.038),
        "db.r6g.4xlarge" => InstanceSpec::new(16, 131_072, 1, 6, 2.076),
        "db.r6g.8xlarge" => InstanceSpec::new(32, 262_144, 1, 6, 4.152),
    }
});

static WAREHOUSE_INSTANCES: Lazy<BTreeMap<&'static str, InstanceSpec>> = Lazy::new(|| {
    maplit::btreemap! {
        "dc2.large" => InstanceSpec::new(2, 15_616, 1, 32, 0.25),
        "dc2.8xlarge" => InstanceSpec::new(32, 249_856, 2, 128, 4.80),
        "ra3.xlplus" => InstanceSpec::new(4, 32_768, 1, 32, 1.086),
        "ra3.4xlarge" => InstanceSpec::new(12, 98_304, 2, 32, 3.26),
        "ra3.16xlarge" => InstanceSpec::new(48, 393_216, 2, 128, 13.04),
    }
});

/// Instance types offered for an engine. `Serverless` has none.
pub fn instance_catalog(engine: Engine) -> Option<&'static BTreeMap<&'static str, InstanceSpec>> {
    match engine {
        Engine::OltpRow => Some(&OLTP_ROW_INSTANCES),
        Engine::Warehouse => Some(&WAREHOUSE_INSTANCES),
        Engine::Serverless => None,
    }
}

pub fn instance_spec(engine: Engine, instance_type: &str) -> Result<&'static InstanceSpec, BlueprintError> {
    instance_catalog(engine)
        .and_then(|catalog| catalog.get(instance_type))
        .ok_or_else(|| BlueprintError::UnknownInstanceType {
            engine,
            instance_type: instance_type.to_string(),
        })
}

/// vCPUs of a single node of the provisioning's instance type.
pub fn num_cpus(engine: Engine, provisioning: &Provisioning) -> Result<u32, BlueprintError> {
    instance_spec(engine, provisioning.instance_type()).map(|spec| spec.vcpus)
}

/// √(vCPU × memory MiB) × nodes; zero for a powered-off provisioning.
pub fn resource_value(engine: Engine, provisioning: &Provisioning) -> Result<f64, BlueprintError> {
    let spec = instance_spec(engine, provisioning.instance_type())?;
    Ok(spec.node_resource_value() * f64::from(provisioning.num_nodes()))
}

/// Checks the instance type is known and the node count is zero or within the type's bounds.
pub fn validate_provisioning(engine: Engine, provisioning: &Provisioning) -> Result<(), BlueprintError> {
    let spec = instance_spec(engine, provisioning.instance_type())?;
    if provisioning.is_off() || spec.supports_nodes(provisioning.num_nodes()) {
        Ok(())
    } else {
        Err(BlueprintError::InvalidNodeCount {
            engine,
            instance_type: provisioning.instance_type.clone(),
            num_nodes: provisioning.num_nodes(),
        })
    }
}
