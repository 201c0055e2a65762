use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Blueprint, ProvisioningDiff};
use crate::elements::{Engine, EngineSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDiff {
    pub table_name: String,
    pub added_locations: EngineSet,
    pub removed_locations: EngineSet,
}

/// Physical differences between two blueprints: per-table placement changes and per-engine provisioning changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintDiff {
    pub table_diffs: Vec<TableDiff>,
    pub provisioning_diffs: BTreeMap<Engine, ProvisioningDiff>,
}

impl BlueprintDiff {
    pub fn of(old: &Blueprint, new: &Blueprint) -> Option<Self> {
        let table_diffs: Vec<TableDiff> = new
            .table_locations()
            .iter()
            .filter_map(|(name, next)| {
                let current = old.table_locations_of(name);
                let added_locations = next.difference(current);
                let removed_locations = current.difference(*next);
                if added_locations.is_empty() && removed_locations.is_empty() {
                    None
                } else {
                    Some(TableDiff {
                        table_name: name.clone(),
                        added_locations,
                        removed_locations,
                    })
                }
            })
            .collect();

        let provisioning_diffs: BTreeMap<Engine, ProvisioningDiff> = Engine::STATEFUL
            .iter()
            .filter_map(|engine| {
                let (o, n) = (old.provisioning(*engine)?, new.provisioning(*engine)?);
                ProvisioningDiff::of(o, n).map(|d| (*engine, d))
            })
            .collect();

        if table_diffs.is_empty() && provisioning_diffs.is_empty() {
            None
        } else {
            Some(Self { table_diffs, provisioning_diffs })
        }
    }

    pub fn provisioning_diff(&self, engine: Engine) -> Option<&ProvisioningDiff> {
        self.provisioning_diffs.get(&engine)
    }

    pub fn has_provisioning_change(&self) -> bool {
        !self.provisioning_diffs.is_empty()
    }
}

impl fmt::Display for BlueprintDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (engine, diff) in &self.provisioning_diffs {
            writeln!(f, "{}: {}", engine, diff)?;
        }
        for td in &self.table_diffs {
            writeln!(f, "{}: +{} -{}", td.table_name, td.added_locations, td.removed_locations)?;
        }
        Ok(())
    }
}
