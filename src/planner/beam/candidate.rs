use std::collections::BTreeMap;
use std::fmt;

use crate::blueprint::{Blueprint, CachedLocations, Provisioning, RoutingPolicy};
use crate::elements::{Engine, EngineSet};
use crate::error::PlanError;
use crate::planner::compare::BlueprintComparator;
use crate::planner::enumeration::NearbyProvisionings;
use crate::planner::router::Router;
use crate::planner::scoring::{table_movement, CandidateLayout, Score, ScoringContext, TableMovement};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Feasibility {
    Unchecked,
    Feasible,
    Infeasible,
}

/// A partial blueprint grown one query at a time by the beam search.
#[derive(Debug, Clone)]
pub struct BlueprintCandidate {
    table_locations: BTreeMap<String, EngineSet>,
    oltp_row_provisioning: Provisioning,
    warehouse_provisioning: Provisioning,
    query_locations: [Vec<usize>; 3],
    movement: TableMovement,
    score: Score,
    feasibility: Feasibility,
    explored_provisionings: bool,
}

impl fmt::Display for BlueprintCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "oltp_row={} warehouse={} queries=[{}, {}, {}]: {}",
            self.oltp_row_provisioning,
            self.warehouse_provisioning,
            self.query_locations[0].len(),
            self.query_locations[1].len(),
            self.query_locations[2].len(),
            self.score,
        )
    }
}

impl BlueprintCandidate {
    /// Starts from the current blueprint's tables and provisioning with nothing placed or routed.
    pub fn based_on(blueprint: &Blueprint) -> Self {
        Self {
            table_locations: blueprint
                .tables()
                .iter()
                .map(|t| (t.name.clone(), EngineSet::EMPTY))
                .collect(),
            oltp_row_provisioning: blueprint.oltp_row_provisioning().clone(),
            warehouse_provisioning: blueprint.warehouse_provisioning().clone(),
            query_locations: Default::default(),
            movement: TableMovement::NONE,
            score: Score::default(),
            feasibility: Feasibility::Unchecked,
            explored_provisionings: false,
        }
    }

    pub fn table_locations(&self) -> &BTreeMap<String, EngineSet> {
        &self.table_locations
    }

    pub fn oltp_row_provisioning(&self) -> &Provisioning {
        &self.oltp_row_provisioning
    }

    pub fn warehouse_provisioning(&self) -> &Provisioning {
        &self.warehouse_provisioning
    }

    pub fn query_locations(&self, engine: Engine) -> &[usize] {
        &self.query_locations[engine.index()]
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    #[cfg(test)]
    pub(crate) fn set_score(&mut self, score: Score) {
        self.score = score;
    }

    pub const fn feasibility(&self) -> Feasibility {
        self.feasibility
    }

    pub const fn explored_provisionings(&self) -> bool {
        self.explored_provisionings
    }

    fn layout(&self) -> CandidateLayout<'_> {
        CandidateLayout {
            query_locations: &self.query_locations,
            table_locations: &self.table_locations,
            oltp_row_provisioning: &self.oltp_row_provisioning,
            warehouse_provisioning: &self.warehouse_provisioning,
        }
    }

    /// Adds `engine` to a table's placement, charging movement only for a copy that neither the current blueprint
    /// nor this candidate already holds.
    fn place_table(&mut self, table_name: &str, engine: Engine, ctx: &ScoringContext) {
        let Some(locations) = self.table_locations.get_mut(table_name) else {
            return;
        };

        let previous = *locations;
        *locations = previous.with(engine);

        let current = ctx.current_blueprint().table_locations_of(table_name);
        let newly_added = locations.difference(current).difference(previous);
        if !newly_added.is_empty() {
            let size_mb = ctx.table_size_mb(table_name);
            self.movement += table_movement(current, current.union(newly_added), size_mb, ctx.settings());
        }
    }

    /// Tables written by transactions have to live on the OLTP engine.
    pub fn add_transactional_tables(&mut self, ctx: &ScoringContext) {
        let tables: Vec<String> = ctx
            .next_workload()
            .transactional_queries()
            .iter()
            .flat_map(|q| q.tables.iter().cloned())
            .collect();

        for table in tables {
            self.place_table(&table, Engine::OltpRow, ctx);
        }
    }

    /// Routes an analytical query of the next workload to `engine` and places its tables there. A priming query
    /// only places tables.
    pub fn add_query(&mut self, query_idx: usize, engine: Engine, ctx: &ScoringContext) {
        let Some(query) = ctx.next_workload().analytical_queries().get(query_idx) else {
            return;
        };

        for table in &query.tables {
            self.place_table(table, engine, ctx);
        }

        if !query.is_priming {
            self.query_locations[engine.index()].push(query_idx);
        }
        self.feasibility = Feasibility::Unchecked;
        self.explored_provisionings = false;
    }

    /// Every stateful engine that serves queries or holds tables must be powered on.
    pub fn is_structurally_feasible(&self) -> bool {
        Engine::STATEFUL.iter().all(|engine| {
            let provisioning = match engine {
                Engine::OltpRow => &self.oltp_row_provisioning,
                _ => &self.warehouse_provisioning,
            };

            let in_use = !self.query_locations[engine.index()].is_empty()
                || self.table_locations.values().any(|l| l.contains(*engine));

            !in_use || !provisioning.is_off()
        })
    }

    /// Marks the candidate feasible or not by its structure.
    pub fn check_feasibility(&mut self) -> Feasibility {
        self.feasibility = if self.is_structurally_feasible() {
            Feasibility::Feasible
        } else {
            Feasibility::Infeasible
        };
        self.feasibility
    }

    pub fn recompute(&mut self, ctx: &ScoringContext) -> Result<(), PlanError> {
        self.score = ctx.score(&self.layout(), self.movement)?;
        crate::metrics::CANDIDATES_EVALUATED.inc();
        Ok(())
    }

    /// Scores this candidate under every structurally feasible pairing of the provisionings near the current
    /// blueprint's, handing each scored variant to `visit`.
    pub fn for_each_nearby_provisioning<F>(&self, ctx: &ScoringContext, mut visit: F) -> Result<(), PlanError>
    where
        F: FnMut(&BlueprintCandidate) -> Result<(), PlanError>,
    {
        let multiplier = ctx.settings().max_provisioning_multiplier;
        let current = ctx.current_blueprint();
        let mut oltp_row = NearbyProvisionings::around(Engine::OltpRow, current.oltp_row_provisioning(), multiplier)?;
        let mut warehouse =
            NearbyProvisionings::around(Engine::Warehouse, current.warehouse_provisioning(), multiplier)?;

        let mut working = self.clone();
        working.explored_provisionings = true;
        working.feasibility = Feasibility::Feasible;

        while let Some(o) = oltp_row.next_candidate() {
            working.oltp_row_provisioning = o.clone();
            warehouse.restart();

            while let Some(w) = warehouse.next_candidate() {
                working.warehouse_provisioning = w.clone();
                if !working.is_structurally_feasible() {
                    continue;
                }

                working.recompute(ctx)?;
                visit(&working)?;
            }
        }

        Ok(())
    }

    /// Moves the candidate to its best nearby provisioning. The candidate becomes infeasible when no provisioning
    /// supports it.
    #[tracing::instrument(level = "trace", skip(self, ctx, comparator))]
    pub fn find_best_provisioning(
        &mut self, ctx: &ScoringContext, comparator: &BlueprintComparator,
    ) -> Result<(), PlanError> {
        let mut best: Option<(Provisioning, Provisioning, Score)> = None;
        self.for_each_nearby_provisioning(ctx, |scored| {
            let is_better = best
                .as_ref()
                .map_or(true, |(_, _, best_score)| comparator.is_better(scored.score(), best_score));

            if is_better {
                best = Some((
                    scored.oltp_row_provisioning.clone(),
                    scored.warehouse_provisioning.clone(),
                    scored.score.clone(),
                ));
            }
            Ok(())
        })?;

        self.explored_provisionings = true;
        match best {
            Some((o, w, score)) => {
                self.oltp_row_provisioning = o;
                self.warehouse_provisioning = w;
                self.score = score;
                self.feasibility = Feasibility::Feasible;
            },
            None => {
                self.feasibility = Feasibility::Infeasible;
            },
        }

        Ok(())
    }

    pub fn reset_routing(&mut self) {
        self.query_locations.iter_mut().for_each(Vec::clear);
    }

    /// Re-routes every analytical query with the run-time router over this candidate's placement. Fails on the
    /// first query that cannot be routed.
    pub fn reroute(&mut self, ctx: &ScoringContext, policy: &RoutingPolicy) -> Result<(), PlanError> {
        self.reset_routing();
        let router = Router::new(&self.table_locations, policy);
        for (idx, query) in ctx.next_workload().analytical_queries().iter().enumerate() {
            if query.is_priming {
                continue;
            }
            let engine = router.route(query)?;
            self.query_locations[engine.index()].push(idx);
        }
        self.feasibility = Feasibility::Unchecked;
        Ok(())
    }

    /// Tables no query or transaction placed anywhere are kept in object storage.
    pub fn place_unplaced_on_serverless(&mut self, ctx: &ScoringContext) {
        let unplaced: Vec<String> = self
            .table_locations
            .iter()
            .filter(|(_, locations)| locations.is_empty())
            .map(|(name, _)| name.clone())
            .collect();

        for table in unplaced {
            self.place_table(&table, Engine::Serverless, ctx);
        }
    }

    /// The blueprint this candidate describes. Its routing keeps the current definite rule and pins each query to
    /// the engine chosen here.
    pub fn to_blueprint(&self, ctx: &ScoringContext) -> Blueprint {
        let current = ctx.current_blueprint();
        let queries = ctx.next_workload().analytical_queries();
        let cached: CachedLocations = Engine::ALL
            .iter()
            .flat_map(|engine| {
                self.query_locations[engine.index()]
                    .iter()
                    .filter_map(|idx| queries.get(*idx))
                    .map(|q| (q.raw_query.clone(), *engine))
            })
            .collect();

        let routing = RoutingPolicy::new(current.routing_policy().definite.clone()).with_cached(cached);

        Blueprint::new(
            current.schema_name(),
            current.tables().to_vec(),
            self.table_locations.clone(),
            self.oltp_row_provisioning.clone(),
            self.warehouse_provisioning.clone(),
            routing,
        )
    }
}
