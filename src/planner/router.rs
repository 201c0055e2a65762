use std::collections::BTreeMap;

use super::workload::{Query, Workload};
use crate::blueprint::{Blueprint, RoutingPolicy, RoutingRule};
use crate::elements::{Engine, EngineSet};
use crate::error::PlanError;

/// Picks the engine a query runs on under a table placement and routing policy.
#[derive(Debug, Clone, Copy)]
pub struct Router<'a> {
    table_locations: &'a BTreeMap<String, EngineSet>,
    policy: &'a RoutingPolicy,
}

impl<'a> Router<'a> {
    pub fn new(table_locations: &'a BTreeMap<String, EngineSet>, policy: &'a RoutingPolicy) -> Self {
        Self { table_locations, policy }
    }

    pub fn for_blueprint(blueprint: &'a Blueprint) -> Self {
        Self::new(blueprint.table_locations(), blueprint.routing_policy())
    }

    /// Engines able to run the query: those supporting its capabilities and holding every referenced table.
    /// Names that are not tables (CTEs, aliases) are ignored.
    pub fn candidate_engines(&self, query: &Query) -> Result<EngineSet, PlanError> {
        let functional = query.supported_engines();
        if functional.is_empty() {
            return Err(PlanError::UnsupportedQuery(query.raw_query.clone()));
        }

        let located = query
            .tables
            .iter()
            .filter_map(|t| self.table_locations.get(t))
            .fold(functional, |acc, locations| acc.intersection(*locations));

        if located.is_empty() {
            Err(PlanError::NoSingleLocation(query.raw_query.clone()))
        } else {
            Ok(located)
        }
    }

    pub fn route(&self, query: &Query) -> Result<Engine, PlanError> {
        if query.is_data_modification {
            return Ok(Engine::OltpRow);
        }

        let valid = self.candidate_engines(query)?;
        if let Some(sole) = valid.sole() {
            return Ok(sole);
        }

        if let Some(engine) = self
            .policy
            .cached
            .as_ref()
            .and_then(|cached| cached.get(&query.raw_query))
            .filter(|engine| valid.contains(*engine))
        {
            return Ok(engine);
        }

        let chosen = match &self.policy.definite {
            RoutingRule::AlwaysRoute(engine) if valid.contains(*engine) => Some(*engine),
            RoutingRule::AlwaysRoute(_) => None,
            RoutingRule::PreferenceOrder(order) => order.iter().copied().find(|e| valid.contains(*e)),
        };

        // a rule that names none of the valid engines falls back to catalog order
        Ok(chosen.or_else(|| valid.iter().next()).unwrap_or(Engine::OltpRow))
    }

    /// Indices of the workload's analytical queries grouped by the engine each routes to, in [`Engine::index`]
    /// order. Priming queries and queries that cannot run under this placement are left out.
    pub fn route_workload(&self, workload: &Workload) -> [Vec<usize>; 3] {
        let mut locations: [Vec<usize>; 3] = Default::default();
        for (idx, query) in workload.analytical_queries().iter().enumerate() {
            if query.is_priming {
                continue;
            }

            match self.route(query) {
                Ok(engine) => locations[engine.index()].push(idx),
                Err(err) => tracing::debug!(error=?err, query=%query.raw_query, "query not routable under placement"),
            }
        }
        locations
    }
}
