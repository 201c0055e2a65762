use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::elements::{Engine, EngineSet};
use crate::error::BlueprintError;

mod diff;
pub mod manager;
pub mod provisioning;
pub mod repository;
mod routing;
mod table;

pub use diff::{BlueprintDiff, TableDiff};
pub use manager::{BlueprintManager, BlueprintVersioning, TransitionState};
pub use provisioning::{InstanceSpec, Provisioning, ProvisioningDiff};
pub use repository::{make_asset_repository, AssetRepository, RepositorySettings, RepositoryType};
pub use routing::{normalize_query_text, CachedLocations, RoutingPolicy, RoutingRule};
pub use table::{Column, Table, UserProvidedBlueprint, UserProvisioning};

/// Immutable physical layout of a schema: where each table lives, how the stateful engines are provisioned and how
/// queries are routed. A new plan supersedes a blueprint; it is never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    schema_name: String,
    tables: Vec<Table>,
    table_locations: BTreeMap<String, EngineSet>,
    oltp_row_provisioning: Provisioning,
    warehouse_provisioning: Provisioning,
    routing_policy: RoutingPolicy,
}

impl Blueprint {
    pub fn new(
        schema_name: impl Into<String>, tables: Vec<Table>, table_locations: BTreeMap<String, EngineSet>,
        oltp_row_provisioning: Provisioning, warehouse_provisioning: Provisioning, routing_policy: RoutingPolicy,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            tables,
            table_locations,
            oltp_row_provisioning,
            warehouse_provisioning,
            routing_policy,
        }
    }

    pub fn schema_name(&self) -> &str {
        self.schema_name.as_str()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_locations(&self) -> &BTreeMap<String, EngineSet> {
        &self.table_locations
    }

    /// Empty when the table is unknown.
    pub fn table_locations_of(&self, table_name: &str) -> EngineSet {
        self.table_locations.get(table_name).copied().unwrap_or_default()
    }

    pub fn tables_on(&self, engine: Engine) -> impl Iterator<Item = &str> + '_ {
        self.table_locations
            .iter()
            .filter(move |(_, locations)| locations.contains(engine))
            .map(|(name, _)| name.as_str())
    }

    pub fn oltp_row_provisioning(&self) -> &Provisioning {
        &self.oltp_row_provisioning
    }

    pub fn warehouse_provisioning(&self) -> &Provisioning {
        &self.warehouse_provisioning
    }

    /// `None` for `Serverless`, which has no provisioning dimension.
    pub fn provisioning(&self, engine: Engine) -> Option<&Provisioning> {
        match engine {
            Engine::OltpRow => Some(&self.oltp_row_provisioning),
            Engine::Warehouse => Some(&self.warehouse_provisioning),
            Engine::Serverless => None,
        }
    }

    pub fn routing_policy(&self) -> &RoutingPolicy {
        &self.routing_policy
    }

    /// Names of tables with no dependencies, in declaration order.
    pub fn base_table_names(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.is_base_table())
            .map(|t| t.name.as_str())
            .collect()
    }
}

impl fmt::Display for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Blueprint({})", self.schema_name)?;
        writeln!(f, "  {}: {}", Engine::OltpRow, self.oltp_row_provisioning)?;
        writeln!(f, "  {}: {}", Engine::Warehouse, self.warehouse_provisioning)?;
        for (name, locations) in &self.table_locations {
            writeln!(f, "  {} -> {}", name, locations)?;
        }
        if let Some(cached) = &self.routing_policy.cached {
            writeln!(f, "  cached routing: {:?}", cached.count_by_engine())?;
        }
        Ok(())
    }
}

pub fn serialize_blueprint(blueprint: &Blueprint) -> Result<Vec<u8>, BlueprintError> {
    Ok(serde_json::to_vec(blueprint)?)
}

pub fn deserialize_blueprint(data: &[u8]) -> Result<Blueprint, BlueprintError> {
    Ok(serde_json::from_slice(data)?)
}
