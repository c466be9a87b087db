//! The generic constraint-propagation engine. `WFCSolver` knows nothing
//! about scenes, placements, or geometry — it reasons purely over node ids,
//! a pattern table, and a `Graph` of adjacency. `SCWFCSolver` (in
//! `sc_solver`) is the thing that actually drives it against a scene.

use crate::graph::Graph;
use crate::id::ClassId;
use crate::pattern::{NeighborView, PatternMap, Val, ValidityMode};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};

/// Constraint-propagation engine over any `Graph<i64>`. Owns the pattern
/// table and every node's current domain; does not own an RNG — callers
/// thread one through so the whole crate draws from a single stream.
pub struct WFCSolver<G> {
    graph: G,
    patterns: PatternMap,
    domains: HashMap<i64, Vec<Val>>,
    validity_mode: ValidityMode,
    propagate_to_solved: bool,
    propagate_callback: Option<Box<dyn FnMut(i64)>>,
    entropy_callback: Option<Box<dyn Fn(i64) -> f32>>,
}

impl<G> WFCSolver<G> {
    pub fn new(graph: G, patterns: PatternMap) -> Self {
        Self {
            graph,
            patterns,
            domains: HashMap::new(),
            validity_mode: ValidityMode::default(),
            propagate_to_solved: true,
            propagate_callback: None,
            entropy_callback: None,
        }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn patterns(&self) -> &PatternMap {
        &self.patterns
    }

    pub fn validity_mode(&self) -> ValidityMode {
        self.validity_mode
    }

    pub fn set_validity_mode(&mut self, mode: ValidityMode) {
        self.validity_mode = mode;
    }

    /// When false, neighbors whose domain is already a singleton are not
    /// re-enqueued by `propagate`.
    pub fn set_propagate_to_solved(&mut self, v: bool) {
        self.propagate_to_solved = v;
    }

    pub fn set_propagate_callback(&mut self, cb: impl FnMut(i64) + 'static) {
        self.propagate_callback = Some(Box::new(cb));
    }

    /// Overrides `node_entropy`'s default weight-sum formula. Useful to
    /// factor in extra state (e.g. distance to the propagating node) via
    /// closure capture.
    pub fn set_entropy_callback(&mut self, cb: impl Fn(i64) -> f32 + 'static) {
        self.entropy_callback = Some(Box::new(cb));
    }

    pub fn domain(&self, node: i64) -> &[Val] {
        self.domains.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_domain(&mut self, node: i64, domain: Vec<Val>) {
        self.domains.insert(node, domain);
    }

    pub fn remove_node_domain(&mut self, node: i64) {
        self.domains.remove(&node);
    }
}

impl<G: Graph<i64>> WFCSolver<G> {
    /// Σ pattern weight over the node's domain; 0 once collapsed to a
    /// singleton (or empty). An entropy callback, if set, takes over
    /// entirely.
    pub fn node_entropy(&self, node: i64) -> f32 {
        if let Some(cb) = &self.entropy_callback {
            return cb(node);
        }
        let domain = self.domain(node);
        if domain.len() <= 1 {
            return 0.0;
        }
        domain
            .iter()
            .map(|v| self.patterns.get(&v.pattern_id).map(|p| p.weight).unwrap_or(0.0))
            .sum()
    }

    /// Is `val` still consistent with `node`'s current neighborhood?
    pub fn valid(&self, val: Val, node: i64) -> bool {
        let Some(pattern) = self.patterns.get(&val.pattern_id) else {
            return false;
        };
        let neighbor_ids = self.graph.adjacent_nodes(node);
        let neighbor_domains: Vec<HashSet<ClassId>> = neighbor_ids
            .iter()
            .map(|&n| self.domain(n).iter().map(|v| v.class_id).collect())
            .collect();
        pattern.valid(
            self.validity_mode,
            neighbor_domains.iter().map(|classes| NeighborView { classes }),
        )
    }

    /// Discrete distribution over `node`'s domain weighted by pattern
    /// weight; falls back to uniform when every weight is zero.
    pub fn weighted_pick_domain(&self, node: i64, rng: &mut StdRng) -> Option<Val> {
        let domain = self.domain(node);
        if domain.is_empty() {
            return None;
        }
        let weights: Vec<f32> = domain
            .iter()
            .map(|v| self.patterns.get(&v.pattern_id).map(|p| p.weight).unwrap_or(0.0))
            .collect();
        let index = if weights.iter().any(|&w| w > 0.0) {
            WeightedIndex::new(weights).ok()?.sample(rng)
        } else {
            rng.random_range(0..domain.len())
        };
        Some(domain[index])
    }

    /// Collapses `node` to a single weighted-random `Val`. No-op if the
    /// domain is already a singleton (or empty — collapsing an empty
    /// domain is the orchestrator's job to avoid, never this engine's).
    pub fn observe(&mut self, node: i64, rng: &mut StdRng) -> bool {
        if self.domain(node).len() <= 1 {
            return false;
        }
        let Some(picked) = self.weighted_pick_domain(node, rng) else {
            return false;
        };
        self.set_domain(node, vec![picked]);
        if let Some(cb) = &mut self.propagate_callback {
            cb(node);
        }
        true
    }

    /// Drops every `Val` in `node`'s domain no longer valid. Returns
    /// whether the domain shrank.
    pub fn update_domain(&mut self, node: i64) -> bool {
        let before = self.domain(node).to_vec();
        let kept: Vec<Val> = before.iter().copied().filter(|&v| self.valid(v, node)).collect();
        let shrank = kept.len() < before.len();
        self.set_domain(node, kept);
        shrank
    }

    /// BFS-like worklist from `origin`. The first node is always
    /// refiltered and its neighbors enqueued regardless of change; after
    /// that, a node's neighbors are enqueued only if its own domain
    /// shrank. A visited set stops a node re-entering the queue within
    /// this single pass; neighbor order is shuffled per visit.
    pub fn propagate(&mut self, origin: i64, rng: &mut StdRng) {
        let mut queue: VecDeque<i64> = VecDeque::new();
        let mut visited: HashSet<i64> = HashSet::new();
        queue.push_back(origin);
        visited.insert(origin);
        let mut force = true;

        while let Some(n) = queue.pop_front() {
            let changed = self.update_domain(n);
            if let Some(cb) = &mut self.propagate_callback {
                cb(n);
            }
            if changed || force {
                force = false;
                let mut neighbors = self.graph.adjacent_nodes(n);
                shuffle(&mut neighbors, rng);
                for neighbor in neighbors {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    if !self.propagate_to_solved && self.domain(neighbor).len() == 1 {
                        continue;
                    }
                    visited.insert(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }
    }

    /// `observe` then `propagate` from `node`.
    pub fn step(&mut self, node: i64, rng: &mut StdRng) {
        self.observe(node, rng);
        self.propagate(node, rng);
    }
}

fn shuffle(items: &mut [i64], rng: &mut StdRng) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}
