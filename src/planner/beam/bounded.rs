use super::candidate::BlueprintCandidate;
use crate::planner::compare::BlueprintComparator;

/// Top-K candidates kept best first by the comparator.
#[derive(Debug, Clone)]
pub struct BoundedBeam {
    capacity: usize,
    candidates: Vec<BlueprintCandidate>,
}

impl BoundedBeam {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), candidates: Vec::with_capacity(capacity.max(1)) }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity <= self.candidates.len()
    }

    pub fn best(&self) -> Option<&BlueprintCandidate> {
        self.candidates.first()
    }

    pub fn worst(&self) -> Option<&BlueprintCandidate> {
        self.candidates.last()
    }

    pub fn pop_worst(&mut self) -> Option<BlueprintCandidate> {
        self.candidates.pop()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlueprintCandidate> + '_ {
        self.candidates.iter()
    }

    /// Whether inserting `candidate` would keep it.
    pub fn admits(&self, candidate: &BlueprintCandidate, comparator: &BlueprintComparator) -> bool {
        match self.worst() {
            Some(worst) if self.is_full() => comparator.is_better(candidate.score(), worst.score()),
            _ => true,
        }
    }

    /// Inserts after every candidate not worse than it, then drops the worst beyond capacity and returns it.
    pub fn push(
        &mut self, candidate: BlueprintCandidate, comparator: &BlueprintComparator,
    ) -> Option<BlueprintCandidate> {
        let position = self
            .candidates
            .iter()
            .position(|c| comparator.is_better(candidate.score(), c.score()))
            .unwrap_or(self.candidates.len());
        self.candidates.insert(position, candidate);

        if self.capacity < self.candidates.len() {
            self.candidates.pop()
        } else {
            None
        }
    }

    pub fn into_vec(self) -> Vec<BlueprintCandidate> {
        self.candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{Blueprint, Provisioning, RoutingPolicy};
    use crate::planner::scoring::Score;
    use crate::settings::ComparatorSettings;
    use claim::*;
    use pretty_assertions::assert_eq;

    fn candidate(cost: f64) -> BlueprintCandidate {
        let bp = Blueprint::new(
            "test",
            vec![],
            Default::default(),
            Provisioning::new("db.r6g.large", 1),
            Provisioning::new("dc2.large", 1),
            RoutingPolicy::default(),
        );
        let mut c = BlueprintCandidate::based_on(&bp);
        c.set_score(Score { provisioning_cost: cost, ..Score::default() });
        c
    }

    fn costs(beam: &BoundedBeam) -> Vec<f64> {
        beam.iter().map(|c| c.score().provisioning_cost).collect()
    }

    #[test]
    fn test_beam_keeps_best_k() {
        let comparator = BlueprintComparator::new(ComparatorSettings::default());
        let mut beam = BoundedBeam::new(3);
        for cost in [5.0, 1.0, 3.0] {
            assert_none!(beam.push(candidate(cost), &comparator));
        }
        assert!(beam.is_full());
        assert_eq!(costs(&beam), vec![1.0, 3.0, 5.0]);

        assert!(!beam.admits(&candidate(9.0), &comparator));
        assert!(beam.admits(&candidate(2.0), &comparator));

        let evicted = assert_some!(beam.push(candidate(2.0), &comparator));
        assert_eq!(evicted.score().provisioning_cost, 5.0);
        assert_eq!(costs(&beam), vec![1.0, 2.0, 3.0]);

        // ties land behind existing candidates
        let evicted = assert_some!(beam.push(candidate(3.05), &comparator));
        assert_eq!(evicted.score().provisioning_cost, 3.05);

        let worst = assert_some!(beam.pop_worst());
        assert_eq!(worst.score().provisioning_cost, 3.0);
        assert_eq!(beam.len(), 2);
    }
}
