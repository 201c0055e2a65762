use crate::blueprint::{Blueprint, RoutingPolicy};
use crate::error::PlanError;
use crate::metrics::BEAM_RESCUES;
use crate::planner::compare::BlueprintComparator;
use crate::planner::scoring::{Score, ScoringContext};
use crate::planner::workload::Workload;

mod bounded;
mod candidate;

pub use bounded::BoundedBeam;
pub use candidate::{BlueprintCandidate, Feasibility};

/// Appends a zero-arrival query over every table of the blueprint, so the search starts from placements that keep
/// all tables together on one engine.
pub fn add_priming_query(workload: &mut Workload, blueprint: &Blueprint) -> Option<usize> {
    if blueprint.tables().is_empty() {
        return None;
    }

    let tables = blueprint.tables().iter().map(|t| t.name.clone()).collect();
    Some(workload.add_priming_analytical_query(tables))
}

/// Searches blueprints for the next workload by assigning analytical queries to engines in descending order of
/// latency gain, keeping the best `beam_size` partial assignments after each query.
#[derive(Debug)]
pub struct BeamSearchOptimizer<'c> {
    ctx: &'c ScoringContext,
    comparator: BlueprintComparator,
}

impl<'c> BeamSearchOptimizer<'c> {
    pub fn new(ctx: &'c ScoringContext) -> Self {
        let comparator = BlueprintComparator::new(ctx.settings().comparator.clone());
        Self { ctx, comparator }
    }

    pub fn comparator(&self) -> &BlueprintComparator {
        &self.comparator
    }

    /// The best blueprint found, or `None` when no safe replan is available.
    #[tracing::instrument(level = "info", skip(self), fields(schema_name = %self.ctx.schema_name()))]
    pub async fn optimize(&self) -> Result<Option<(Blueprint, Score)>, PlanError> {
        let top = self.top_candidates().await?;
        let best = top.into_iter().next().map(|c| {
            tracing::info!(candidate=%c, "best candidate blueprint selected");
            (c.to_blueprint(self.ctx), c.score().clone())
        });
        Ok(best)
    }

    /// Feasible final candidates, best first.
    pub async fn top_candidates(&self) -> Result<Vec<BlueprintCandidate>, PlanError> {
        let workload = self.ctx.next_workload();
        let nr_analytical = workload.analytical_queries().iter().filter(|q| !q.is_priming).count();
        if nr_analytical == 0 {
            tracing::info!("no analytical queries in the next workload - nothing to plan");
            return Ok(Vec::new());
        }

        let order = workload.queries_by_gain();
        let Some((first, rest)) = order.split_first() else {
            return Ok(Vec::new());
        };

        let mut beam = self.initialize(*first)?;
        let yield_every = self.ctx.settings().yield_every_n_queries;
        for (n, query_idx) in rest.iter().enumerate() {
            if beam.is_empty() {
                break;
            }

            if 0 < yield_every && n % yield_every == 0 {
                tokio::task::yield_now().await;
            }

            beam = self.expand(&beam, *query_idx)?;
            tracing::trace!(query_idx, beam_size=%beam.len(), "expanded beam");
        }

        if beam.is_empty() {
            tracing::info!("no feasible assignment of analytical queries found");
            return Ok(Vec::new());
        }

        let survivors = self.reroute(beam)?;
        self.sweep_provisionings(survivors)
    }

    fn initialize(&self, query_idx: usize) -> Result<BoundedBeam, PlanError> {
        let mut beam = BoundedBeam::new(self.ctx.settings().beam_size);
        let engines = self.supported_engines(query_idx);

        for engine in engines.iter() {
            let mut candidate = BlueprintCandidate::based_on(self.ctx.current_blueprint());
            candidate.add_transactional_tables(self.ctx);
            candidate.add_query(query_idx, engine, self.ctx);
            if self.settle(&mut candidate)? {
                beam.push(candidate, &self.comparator);
            } else {
                tracing::debug!(%engine, "no feasible initial candidate on engine");
            }
        }

        Ok(beam)
    }

    fn expand(&self, beam: &BoundedBeam, query_idx: usize) -> Result<BoundedBeam, PlanError> {
        let mut next_beam = BoundedBeam::new(self.ctx.settings().beam_size);
        let engines = self.supported_engines(query_idx);

        for candidate in beam.iter() {
            for engine in engines.iter() {
                let mut next = candidate.clone();
                next.add_query(query_idx, engine, self.ctx);
                if self.settle(&mut next)? {
                    self.insert(&mut next_beam, next)?;
                }
            }
        }

        Ok(next_beam)
    }

    fn supported_engines(&self, query_idx: usize) -> crate::elements::EngineSet {
        self.ctx
            .next_workload()
            .analytical_queries()
            .get(query_idx)
            .map(|q| q.supported_engines())
            .unwrap_or_default()
    }

    /// Scores a freshly extended candidate; one left structurally infeasible gets a provisioning search. Returns
    /// whether the candidate is feasible.
    fn settle(&self, candidate: &mut BlueprintCandidate) -> Result<bool, PlanError> {
        if candidate.check_feasibility() == Feasibility::Feasible {
            candidate.recompute(self.ctx)?;
            return Ok(true);
        }

        candidate.find_best_provisioning(self.ctx, &self.comparator)?;
        Ok(candidate.feasibility() == Feasibility::Feasible)
    }

    /// Inserts into a full beam only when the candidate beats the worst, after one provisioning search if needed.
    /// Unexplored candidates the newcomer would push out get their own search first.
    fn insert(&self, beam: &mut BoundedBeam, mut candidate: BlueprintCandidate) -> Result<(), PlanError> {
        if !beam.admits(&candidate, &self.comparator) {
            if candidate.explored_provisionings() {
                return Ok(());
            }

            BEAM_RESCUES.inc();
            candidate.find_best_provisioning(self.ctx, &self.comparator)?;
            if candidate.feasibility() != Feasibility::Feasible || !beam.admits(&candidate, &self.comparator) {
                return Ok(());
            }
        }

        loop {
            let rescue_worst = beam.is_full()
                && beam.worst().map_or(false, |worst| {
                    !worst.explored_provisionings() && self.comparator.is_better(candidate.score(), worst.score())
                });
            if !rescue_worst {
                break;
            }

            let Some(mut worst) = beam.pop_worst() else {
                break;
            };

            BEAM_RESCUES.inc();
            worst.find_best_provisioning(self.ctx, &self.comparator)?;
            if worst.feasibility() == Feasibility::Feasible {
                beam.push(worst, &self.comparator);
            }
        }

        beam.push(candidate, &self.comparator);
        Ok(())
    }

    /// Routes every query the way the run-time router would over each candidate's placement. Candidates whose
    /// queries cannot all be routed, or that end up structurally infeasible, are dropped.
    fn reroute(&self, beam: BoundedBeam) -> Result<Vec<BlueprintCandidate>, PlanError> {
        let policy = RoutingPolicy::new(self.ctx.current_blueprint().routing_policy().definite.clone());
        let mut survivors = Vec::with_capacity(beam.len());

        for mut candidate in beam.into_vec() {
            if let Err(err) = candidate.reroute(self.ctx, &policy) {
                tracing::debug!(error=?err, "dropping candidate that cannot route every query");
                continue;
            }

            if candidate.check_feasibility() != Feasibility::Feasible {
                tracing::debug!(%candidate, "dropping candidate made infeasible by re-routing");
                continue;
            }

            candidate.recompute(self.ctx)?;
            survivors.push(candidate);
        }

        Ok(survivors)
    }

    /// Places leftover tables, then ranks every survivor under every nearby provisioning pairing and keeps the
    /// best `beam_size` of all of them. One survivor may fill several places.
    fn sweep_provisionings(&self, survivors: Vec<BlueprintCandidate>) -> Result<Vec<BlueprintCandidate>, PlanError> {
        let mut finalists = BoundedBeam::new(self.ctx.settings().beam_size);

        for mut candidate in survivors {
            candidate.place_unplaced_on_serverless(self.ctx);
            candidate.for_each_nearby_provisioning(self.ctx, |scored| {
                if finalists.admits(scored, &self.comparator) {
                    finalists.push(scored.clone(), &self.comparator);
                }
                Ok(())
            })?;
        }

        Ok(finalists.into_vec())
    }
}
