use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Blueprint, Provisioning, RoutingPolicy};
use crate::elements::{Engine, EngineSet};
use crate::error::BlueprintError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,

    #[serde(default, rename = "primary_key")]
    pub is_primary: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_primary: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_primary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(rename = "table_name")]
    pub name: String,

    #[serde(default)]
    pub columns: Vec<Column>,

    /// Names of the source tables this table is derived from.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            dependencies: Vec::new(),
            transform: None,
        }
    }

    pub fn is_base_table(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &Column> + '_ {
        self.columns.iter().filter(|c| c.is_primary)
    }

    fn is_fully_specified(&self) -> bool {
        !self.columns.is_empty() && self.primary_key().next().is_some()
    }
}

/// Initial provisioning a user may declare at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProvisioning {
    #[serde(default = "UserProvisioning::default_oltp_row")]
    pub oltp_row: Provisioning,

    #[serde(default = "UserProvisioning::default_warehouse")]
    pub warehouse: Provisioning,
}

impl UserProvisioning {
    fn default_oltp_row() -> Provisioning {
        Provisioning::new("db.r6g.large", 1)
    }

    fn default_warehouse() -> Provisioning {
        Provisioning::new("dc2.large", 2)
    }
}

impl Default for UserProvisioning {
    fn default() -> Self {
        Self {
            oltp_row: Self::default_oltp_row(),
            warehouse: Self::default_warehouse(),
        }
    }
}

/// Logical schema a user declares when bootstrapping: tables, their columns, and the dependencies and transforms
/// between them. The planner turns it into the first physical [`Blueprint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProvidedBlueprint {
    pub schema_name: String,
    pub tables: Vec<Table>,

    #[serde(default)]
    pub provisioning: UserProvisioning,

    /// Initial placement overrides; tables not listed are placed on every engine.
    #[serde(default)]
    pub placement: BTreeMap<String, EngineSet>,

    #[serde(default)]
    pub routing: RoutingPolicy,
}

impl UserProvidedBlueprint {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, BlueprintError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load_from_yaml_file(path: impl AsRef<Path>) -> Result<Self, BlueprintError> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(serde_yaml::from_reader(std::io::BufReader::new(file))?)
    }

    /// Rejects duplicate table names, dependencies on undeclared tables, dependency cycles and base tables without
    /// columns or a primary key.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        let mut by_name: HashMap<&str, &Table> = HashMap::with_capacity(self.tables.len());
        for table in &self.tables {
            if by_name.insert(table.name.as_str(), table).is_some() {
                return Err(BlueprintError::DuplicateTable(table.name.clone()));
            }
        }

        for table in &self.tables {
            if table.is_base_table() && !table.is_fully_specified() {
                return Err(BlueprintError::UnderspecifiedBaseTable(table.name.clone()));
            }

            if let Some(dep) = table.dependencies.iter().find(|d| !by_name.contains_key(d.as_str())) {
                return Err(BlueprintError::UnknownDependency {
                    table: table.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        check_dependency_cycles(&self.tables, &by_name)
    }

    pub fn into_blueprint(self) -> Result<Blueprint, BlueprintError> {
        self.validate()?;
        super::provisioning::validate_provisioning(Engine::OltpRow, &self.provisioning.oltp_row)?;
        super::provisioning::validate_provisioning(Engine::Warehouse, &self.provisioning.warehouse)?;

        let table_locations = self
            .tables
            .iter()
            .map(|t| {
                let placement = self.placement.get(&t.name).copied().unwrap_or(EngineSet::ALL);
                (t.name.clone(), placement)
            })
            .collect();

        Ok(Blueprint::new(
            self.schema_name,
            self.tables,
            table_locations,
            self.provisioning.oltp_row,
            self.provisioning.warehouse,
            self.routing,
        ))
    }
}

/// Depth-first walk with an explicit stack of `(table, remaining dependencies)` frames.
fn check_dependency_cycles<'a>(
    tables: &'a [Table], by_name: &HashMap<&'a str, &'a Table>,
) -> Result<(), BlueprintError> {
    let mut checked: HashSet<&'a str> = HashSet::with_capacity(tables.len());

    for root in tables {
        if checked.contains(root.name.as_str()) {
            continue;
        }

        let mut on_path: HashSet<&str> = HashSet::new();
        let mut stack = vec![(root.name.as_str(), root.dependencies.iter())];
        on_path.insert(root.name.as_str());

        while let Some((current, children)) = stack.last_mut() {
            match children.next() {
                Some(dep) if checked.contains(dep.as_str()) => {},
                Some(dep) if on_path.contains(dep.as_str()) => {
                    let mut cycle: Vec<String> = stack
                        .iter()
                        .map(|(name, _)| *name)
                        .skip_while(|name| *name != dep.as_str())
                        .map(str::to_string)
                        .collect();
                    cycle.push(dep.clone());
                    return Err(BlueprintError::DependencyCycle(cycle));
                },
                Some(dep) => {
                    // dependencies were checked against `by_name` before the walk
                    if let Some(child) = by_name.get(dep.as_str()) {
                        on_path.insert(child.name.as_str());
                        stack.push((child.name.as_str(), child.dependencies.iter()));
                    }
                },
                None => {
                    let done = *current;
                    on_path.remove(done);
                    checked.insert(done);
                    stack.pop();
                },
            }
        }
    }

    Ok(())
}
