//! Plan synthesis: merge rival proposals into one canonical plan.
//!
//! Steps are joined across proposals by their stable id (derived from the
//! canonical description). Every proposal's dependency edges are kept, with
//! a per-edge count of how many proposals declared it. The merged graph is
//! ordered with Kahn's algorithm; ready steps go in order of their mean
//! position across the proposals that contain them, then by id. A cycle is
//! broken by dropping its least-supported edge, which is reported as a
//! [`SynthesisConflict`].
//!
//! The result depends only on the set of proposals, never on their order.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{instrument, warn};

use crate::domain::{
    canonical_key, Complexity, ComplexityConflict, ExecutionPlan, Philosophy, PlanComparison,
    PlanProposal, Recommendation, Step, SynthesisConflict,
};
use crate::governance::error::SynthesisError;

/// Agreement above which two proposals are considered mergeable.
pub const MERGE_THRESHOLD: f64 = 0.5;

/// A synthesized plan and the edges dropped to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub plan: ExecutionPlan,
    pub conflicts: Vec<SynthesisConflict>,
}

#[derive(Debug)]
struct MergedStep {
    description: String,
    /// Number of proposals containing the step.
    occurrences: usize,
    /// Sum of 0-based positions across those proposals.
    position_sum: usize,
}

impl MergedStep {
    /// Compare mean positions exactly: `a.sum / a.n` vs `b.sum / b.n`.
    fn cmp_mean(&self, other: &MergedStep) -> std::cmp::Ordering {
        (self.position_sum * other.occurrences).cmp(&(other.position_sum * self.occurrences))
    }
}

#[derive(Debug, Default)]
struct MergedGraph {
    steps: BTreeMap<String, MergedStep>,
    /// `step_id -> {dependency_id -> proposals declaring the edge}`
    upstream: BTreeMap<String, BTreeMap<String, usize>>,
    /// `dependency_id -> {dependent_id}`
    downstream: BTreeMap<String, BTreeSet<String>>,
}

impl MergedGraph {
    fn build(proposals: &[&PlanProposal]) -> Self {
        let mut graph = MergedGraph::default();
        for proposal in proposals {
            let mut seen = BTreeSet::new();
            for (position, step) in proposal.steps.iter().enumerate() {
                if !seen.insert(step.id.as_str()) {
                    continue;
                }
                let entry = graph
                    .steps
                    .entry(step.id.clone())
                    .or_insert_with(|| MergedStep {
                        description: step.description.trim().to_string(),
                        occurrences: 0,
                        position_sum: 0,
                    });
                entry.occurrences += 1;
                entry.position_sum += position;
            }
        }
        for proposal in proposals {
            let ids = proposal.step_id_set();
            let mut declared = BTreeSet::new();
            for step in &proposal.steps {
                for dep in &step.depends_on {
                    if dep == &step.id || !ids.contains(dep) {
                        continue;
                    }
                    if !declared.insert((step.id.as_str(), dep.as_str())) {
                        continue;
                    }
                    *graph
                        .upstream
                        .entry(step.id.clone())
                        .or_default()
                        .entry(dep.clone())
                        .or_default() += 1;
                    graph
                        .downstream
                        .entry(dep.clone())
                        .or_default()
                        .insert(step.id.clone());
                }
            }
        }
        graph
    }

    fn remove_edge(&mut self, step_id: &str, dependency: &str) {
        if let Some(deps) = self.upstream.get_mut(step_id) {
            deps.remove(dependency);
        }
        if let Some(dependents) = self.downstream.get_mut(dependency) {
            dependents.remove(step_id);
        }
    }

    /// Walk predecessors from the smallest remaining id until a node repeats.
    /// Every remaining node has a remaining predecessor, so this terminates
    /// on a cycle.
    fn find_cycle(&self, remaining: &BTreeSet<String>) -> Vec<String> {
        let Some(start) = remaining.iter().next() else {
            return Vec::new();
        };
        let mut path: Vec<String> = vec![start.clone()];
        loop {
            let current = &path[path.len() - 1];
            let next = self
                .upstream
                .get(current)
                .and_then(|deps| deps.keys().find(|d| remaining.contains(*d)))
                .cloned();
            let Some(next) = next else {
                return Vec::new();
            };
            if let Some(idx) = path.iter().position(|p| p == &next) {
                return path.split_off(idx);
            }
            path.push(next);
        }
    }

    fn order(&mut self) -> (Vec<String>, Vec<SynthesisConflict>) {
        let mut remaining: BTreeSet<String> = self.steps.keys().cloned().collect();
        let mut ordered = Vec::with_capacity(remaining.len());
        let mut conflicts = Vec::new();

        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .filter(|id| {
                    self.upstream
                        .get(*id)
                        .map_or(true, |deps| deps.keys().all(|d| !remaining.contains(d)))
                })
                .min_by(|a, b| {
                    let (sa, sb) = (&self.steps[*a], &self.steps[*b]);
                    sa.cmp_mean(sb).then_with(|| a.cmp(b))
                })
                .cloned();

            if let Some(id) = ready {
                remaining.remove(&id);
                ordered.push(id);
                continue;
            }

            // Cycle: the path is reversed (each node's successor is its
            // dependency), so edge i is `cycle[i]` depends on `cycle[i + 1]`.
            let cycle = self.find_cycle(&remaining);
            if cycle.is_empty() {
                break;
            }
            let weakest = (0..cycle.len())
                .map(|i| {
                    let step = &cycle[i];
                    let dep = &cycle[(i + 1) % cycle.len()];
                    let count = self
                        .upstream
                        .get(step)
                        .and_then(|deps| deps.get(dep))
                        .copied()
                        .unwrap_or(0);
                    (count, step.clone(), dep.clone())
                })
                .min();
            let Some((occurrences, step_id, dependency)) = weakest else {
                break;
            };
            warn!(
                step_id = %step_id,
                dependency = %dependency,
                occurrences,
                cycle_len = cycle.len(),
                "breaking dependency cycle during synthesis"
            );
            self.remove_edge(&step_id, &dependency);
            let mut members = cycle;
            members.sort();
            conflicts.push(SynthesisConflict {
                step_id,
                dropped_dependency: dependency,
                occurrences,
                cycle: members,
            });
        }
        (ordered, conflicts)
    }
}

/// Majority vote; ties prefer the pragmatic planner's value, else the lower
/// median of the tied values.
fn vote_complexity(proposals: &[&PlanProposal]) -> Complexity {
    let mut counts: BTreeMap<Complexity, usize> = BTreeMap::new();
    for p in proposals {
        *counts.entry(p.estimated_complexity).or_default() += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    let tied: Vec<Complexity> = counts
        .iter()
        .filter(|(_, &n)| n == max)
        .map(|(&c, _)| c)
        .collect();
    if tied.len() == 1 {
        return tied[0];
    }
    let pragmatic = proposals
        .iter()
        .filter(|p| p.philosophy == Philosophy::Pragmatic)
        .map(|p| p.estimated_complexity)
        .filter(|c| tied.contains(c))
        .min();
    if let Some(value) = pragmatic {
        return value;
    }
    tied.get((tied.len().saturating_sub(1)) / 2)
        .copied()
        .unwrap_or(Complexity::Medium)
}

fn union_criteria(proposals: &[&PlanProposal]) -> Vec<String> {
    let mut by_key: BTreeMap<String, String> = BTreeMap::new();
    for p in proposals {
        for criterion in &p.acceptance_criteria {
            let key = canonical_key(criterion);
            if key.is_empty() {
                continue;
            }
            by_key
                .entry(key)
                .or_insert_with(|| criterion.trim().to_string());
        }
    }
    by_key.into_values().collect()
}

/// Order proposals canonically so nothing downstream depends on arrival order.
fn canonical_order(proposals: &[PlanProposal]) -> Vec<&PlanProposal> {
    let mut sorted: Vec<&PlanProposal> = proposals.iter().collect();
    sorted.sort_by(|a, b| {
        a.proposer_id
            .cmp(&b.proposer_id)
            .then_with(|| a.step_ids().cmp(b.step_ids()))
    });
    sorted
}

/// Merges rival proposals into one [`ExecutionPlan`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanSynthesizer;

impl PlanSynthesizer {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(proposals = proposals.len()))]
    pub fn synthesize(&self, proposals: &[PlanProposal]) -> Result<Synthesis, SynthesisError> {
        if proposals.is_empty() {
            return Err(SynthesisError::NoProposals);
        }
        let sorted = canonical_order(proposals);
        let mut graph = MergedGraph::build(&sorted);
        let (order, conflicts) = graph.order();

        let steps: Vec<Step> = order
            .iter()
            .map(|id| {
                let depends_on = graph
                    .upstream
                    .get(id)
                    .map(|deps| deps.keys().cloned().collect())
                    .unwrap_or_default();
                Step {
                    id: id.clone(),
                    description: graph.steps[id].description.clone(),
                    depends_on,
                }
            })
            .collect();

        let plan = ExecutionPlan::new(
            steps,
            union_criteria(&sorted),
            sorted.iter().map(|p| p.proposer_id.clone()).collect(),
            vote_complexity(&sorted),
        );
        Ok(Synthesis { plan, conflicts })
    }

    /// Step ids that appear in at least two proposals.
    pub fn common_steps(proposals: &[PlanProposal]) -> BTreeSet<String> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for p in proposals {
            for id in p.step_id_set() {
                *counts.entry(id).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n >= 2)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Pairwise comparison for the debate log.
pub fn compare_plans(a: &PlanProposal, b: &PlanProposal) -> PlanComparison {
    let ids_a = a.step_id_set();
    let ids_b = b.step_id_set();
    let shared: Vec<String> = ids_a.intersection(&ids_b).cloned().collect();
    let union = ids_a.union(&ids_b).count();
    let agreement_score = if union == 0 {
        1.0
    } else {
        shared.len() as f64 / union as f64
    };
    let complexity_conflict = (a.estimated_complexity != b.estimated_complexity).then_some(
        ComplexityConflict {
            a: a.estimated_complexity,
            b: b.estimated_complexity,
        },
    );
    PlanComparison {
        proposer_a: a.proposer_id.clone(),
        proposer_b: b.proposer_id.clone(),
        agreement_score,
        only_in_a: ids_a.difference(&ids_b).cloned().collect(),
        only_in_b: ids_b.difference(&ids_a).cloned().collect(),
        shared_steps: shared,
        complexity_conflict,
        recommendation: if agreement_score > MERGE_THRESHOLD {
            Recommendation::Merge
        } else {
            Recommendation::Arbitrate
        },
    }
}

/// Compare every unordered pair, in proposer-id order.
pub fn debate(proposals: &[PlanProposal]) -> Vec<PlanComparison> {
    let sorted = canonical_order(proposals);
    let mut out = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            out.push(compare_plans(a, b));
        }
    }
    out
}
