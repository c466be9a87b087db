//! The hybrid orchestrator: spatial-constraint growth (`sc_propagate`) plus
//! wave-function collapse (`wfc_solve`) driven against a host scene. Owns
//! the solver graph, the boundary, the discovered set, and the one RNG
//! every probabilistic decision in this crate draws from.

use crate::boundary::Boundary;
use crate::database::{ObjectData, ObjectDatabase, Orientation};
use crate::graph::{Graph, SparseGraph};
use crate::id::ClassId;
use crate::pattern::{Pattern, Val, ValidityMode};
use crate::scene::{ScenePlacementHost, Sphere};
use crate::solver::WFCSolver;
use glam::{Mat4, Quat, Vec3};
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Normal};
use std::collections::{HashSet, VecDeque};
use std::f32::consts::TAU;

/// Suggested `branching` value for `sc_propagate`/`sc_propagate_from`: the
/// number of placement trials attempted per candidate pattern.
pub const DEFAULT_BRANCHING: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproximateValidityConfig {
    pub domain_size_cutoff: usize,
}

impl Default for ApproximateValidityConfig {
    fn default() -> Self {
        Self { domain_size_cutoff: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainMode {
    /// Child candidate-class set is always the full class universe.
    Full,
    /// Child candidate-class set is the parent pattern's required classes
    /// when the parent value is still valid and a Bernoulli trial fires;
    /// otherwise falls back to the full universe.
    Dependent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvingOrder {
    EntropyOrder,
    DiscoveryOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborhoodRefresh {
    Never,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    pub domain_mode: DomainMode,
    pub validity_mode: ValidityMode,
    pub solving_order: SolvingOrder,
    pub neighborhood_refresh: NeighborhoodRefresh,
    pub neighbor_radius_factor: f32,
    pub allow_revisit_node: bool,
    pub place_on_terrain: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let approx = ApproximateValidityConfig::default();
        Self {
            domain_mode: DomainMode::Dependent,
            validity_mode: ValidityMode::Approximate {
                domain_size_cutoff: approx.domain_size_cutoff,
            },
            solving_order: SolvingOrder::EntropyOrder,
            neighborhood_refresh: NeighborhoodRefresh::Never,
            neighbor_radius_factor: 4.0,
            allow_revisit_node: false,
            place_on_terrain: false,
        }
    }
}

/// The SC+WFC orchestrator: grows a scene by spawning geometric neighbors
/// under repulsion, then collapses the resulting graph's domains.
pub struct SCWFCSolver<H: ScenePlacementHost> {
    engine: WFCSolver<SparseGraph<i64>>,
    db: ObjectDatabase,
    host: H,
    rng: StdRng,
    config: SolverConfig,
    boundary: Boundary,
    expanding_boundary: VecDeque<i64>,
    discovered: HashSet<i64>,
    unsolved_model: H::Model,
}

impl<H: ScenePlacementHost> SCWFCSolver<H> {
    pub fn new(db: ObjectDatabase, host: H, unsolved_model: H::Model, seed: u64, config: SolverConfig) -> Self {
        let patterns = db.make_pattern_map();
        let mut engine = WFCSolver::new(SparseGraph::new(false), patterns);
        engine.set_validity_mode(config.validity_mode);
        let boundary = match config.solving_order {
            SolvingOrder::EntropyOrder => Boundary::entropy_order(),
            SolvingOrder::DiscoveryOrder => Boundary::discovery_order(),
        };
        Self {
            engine,
            db,
            host,
            rng: StdRng::seed_from_u64(seed),
            config,
            boundary,
            expanding_boundary: VecDeque::new(),
            discovered: HashSet::new(),
            unsolved_model,
        }
    }

    pub fn database(&self) -> &ObjectDatabase {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut ObjectDatabase {
        &mut self.db
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> SolverConfig {
        self.config
    }

    pub fn boundary_size(&self) -> usize {
        self.boundary.len()
    }

    pub fn discovered_size(&self) -> usize {
        self.discovered.len()
    }

    pub fn can_continue(&self) -> bool {
        !self.boundary.is_empty()
    }

    pub fn domain(&self, node: i64) -> &[Val] {
        self.engine.domain(node)
    }

    pub fn set_seed_node(&mut self, node: i64) {
        let entropy = self.engine.node_entropy(node);
        self.boundary.push(node, entropy);
        self.discovered.insert(node);
    }

    /// Called by the host after it independently creates a node; the
    /// solver tracks nothing extra on its own.
    pub fn notify_node_added(&mut self, _node: i64) {}

    /// Called by the host when a node is removed outside of the solver's
    /// own `destroy_placement` calls, so the discovered set stays pruned.
    pub fn notify_node_removed(&mut self, node: i64) {
        self.discovered.remove(&node);
    }

    fn all_class_ids(&self) -> HashSet<ClassId> {
        self.db.patterns().map(|(_, p)| p.class_id).collect()
    }

    /// Expands `class_ids` into every `Val` whose pattern has that class.
    fn domain_from_class_ids(&self, class_ids: &HashSet<ClassId>) -> Vec<Val> {
        let mut domain = Vec::new();
        for &class_id in class_ids {
            for &pattern_id in self.db.patterns_for_class(class_id) {
                domain.push(Val::new(class_id, pattern_id));
            }
        }
        domain
    }

    /// Average object footprint across a domain's classes, weighted by
    /// pattern weight. The renderer's mesh AABB is out of scope for this
    /// crate, so `ObjectData::extent` stands in directly for the
    /// bounding-box diagonal it would otherwise be measured from.
    fn weighted_average_diagonal(&self, domain: &[Val]) -> Vec3 {
        let mut total = Vec3::ZERO;
        let mut total_weight = 0.0f32;
        for val in domain {
            let Some(pattern) = self.db.pattern(val.pattern_id) else {
                continue;
            };
            let variants = self.db.objects_for_class(pattern.class_id);
            if variants.is_empty() {
                continue;
            }
            let avg_extent: f32 = variants.iter().map(|o| o.extent).sum::<f32>() / variants.len() as f32;
            total += Vec3::splat(avg_extent) * pattern.weight;
            total_weight += pattern.weight;
        }
        if total_weight > 0.0 {
            total / total_weight
        } else {
            Vec3::ZERO
        }
    }

    fn radius_for_domain(&self, domain: &[Val]) -> f32 {
        // node_entropy needs a live node id to look up the domain from the
        // engine's own table; since this is computed before a node
        // exists, sum the same formula directly over the candidate domain.
        let entropy: f32 = if domain.len() <= 1 {
            0.0
        } else {
            domain
                .iter()
                .map(|v| self.db.pattern(v.pattern_id).map(|p| p.weight).unwrap_or(0.0))
                .sum()
        };
        entropy + self.weighted_average_diagonal(domain).length() / 2.0
    }

    fn connect_to_nearby(&mut self, node: i64, pos: Vec3, radius: f32) {
        let connect_within = radius * self.config.neighbor_radius_factor;
        let others: Vec<i64> = self.discovered.iter().copied().collect();
        for other in others {
            if other == node || self.host.is_destroyed(other) {
                continue;
            }
            let other_pos = self.host.position(other);
            if (pos - other_pos).length() <= connect_within {
                self.engine.graph_mut().add_edge(node, other, 1.0);
            }
        }
    }

    fn push_boundary(&mut self, node: i64) {
        if self.discovered.insert(node) {
            let entropy = self.engine.node_entropy(node);
            self.boundary.push(node, entropy);
        }
    }

    /// Creates a seed node at the origin with the database's full domain
    /// and pushes it onto both the expanding and solving boundaries.
    fn spawn_unsolved_node(&mut self) -> i64 {
        let class_ids = self.all_class_ids();
        let domain = self.domain_from_class_ids(&class_ids);
        let node = self.host.create_placement("scwfc-node");
        self.engine.set_domain(node, domain);

        let radius = self.radius_for_domain(self.engine.domain(node));
        self.host.set_radius(node, radius);
        self.host.set_neighborhood_radius(node, radius * self.config.neighbor_radius_factor);

        self.node_check_and_update(node);
        self.push_boundary(node);
        self.expanding_boundary.push_back(node);
        node
    }

    /// Expands the scene by up to `n` placements, each contributing up to
    /// `branching` placement trials per candidate pattern via
    /// `sc_propagate_from`.
    pub fn sc_propagate(&mut self, n: usize, branching: usize, repulsion: f32) {
        if self.expanding_boundary.is_empty() {
            self.spawn_unsolved_node();
        }
        for _ in 0..n {
            let Some(parent) = self.expanding_boundary.pop_front() else {
                break;
            };
            if self.host.is_destroyed(parent) {
                continue;
            }
            let next = self.sc_propagate_from(parent, branching, repulsion);
            self.expanding_boundary.push_back(next);
        }
    }

    /// Spawns geometric neighbor candidates around `parent`, one batch per
    /// `Val` in its domain. Every surviving child is wired into the solver
    /// graph/boundary immediately; one survivor is chosen at random to
    /// become the next growth frontier (falls back to `parent` itself if
    /// nothing survived).
    fn sc_propagate_from(&mut self, parent: i64, branching: usize, repulsion: f32) -> i64 {
        let parent_domain = self.engine.domain(parent).to_vec();
        if parent_domain.is_empty() {
            return parent;
        }

        let all_class_ids = self.all_class_ids();
        let parent_entropy = self.engine.node_entropy(parent);
        let parent_transform =
            Mat4::from_rotation_translation(self.host.rotation(parent), self.host.position(parent));

        let mut survivors = Vec::new();

        for val in &parent_domain {
            let Some(pattern) = self.db.pattern(val.pattern_id).cloned() else {
                continue;
            };
            let success = if parent_entropy > 0.0 {
                (pattern.weight / parent_entropy).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let candidate_classes = match self.config.domain_mode {
                DomainMode::Full => all_class_ids.clone(),
                DomainMode::Dependent => {
                    if self.engine.valid(*val, parent) && bernoulli(&mut self.rng, success) {
                        pattern.required_classes.iter().copied().collect()
                    } else {
                        all_class_ids.clone()
                    }
                }
            };

            let positions = self.sample_positions(&pattern, success, parent_transform, branching.max(1));

            for pos in positions {
                if let Some(child) = self.try_spawn_child(parent, &candidate_classes, pos, repulsion) {
                    survivors.push(child);
                }
            }
        }

        if survivors.is_empty() {
            parent
        } else {
            survivors[self.rng.random_range(0..survivors.len())]
        }
    }

    /// Up to `trials` attempts at sampling a world-space point inside a
    /// random propagation OBB of a random `ObjectData` under `pattern`'s
    /// class.
    fn sample_positions(&mut self, pattern: &Pattern, success: f32, parent_transform: Mat4, trials: usize) -> Vec<Vec3> {
        let variants = self.db.objects_for_class(pattern.class_id).to_vec();
        if variants.is_empty() {
            return Vec::new();
        }

        let mut positions = Vec::new();
        for _ in 0..trials {
            let obj = &variants[self.rng.random_range(0..variants.len())];
            if obj.propagation_obbs.is_empty() {
                continue;
            }
            let n_props = obj.propagation_obbs.len() as f32;
            if !bernoulli(&mut self.rng, success / n_props) {
                continue;
            }
            let obb = &obj.propagation_obbs[self.rng.random_range(0..obj.propagation_obbs.len())];
            let pos_in_obb = Vec3::new(
                gaussian(&mut self.rng, obb.half_extents.x / 3.0),
                gaussian(&mut self.rng, obb.half_extents.y / 3.0),
                gaussian(&mut self.rng, obb.half_extents.z / 3.0),
            );
            let world = parent_transform * obb.transform() * pos_in_obb.extend(1.0);
            positions.push(world.truncate());
        }
        positions
    }

    fn try_spawn_child(
        &mut self,
        parent: i64,
        candidate_classes: &HashSet<ClassId>,
        mut pos: Vec3,
        repulsion: f32,
    ) -> Option<i64> {
        let domain = self.domain_from_class_ids(candidate_classes);
        let radius = self.radius_for_domain(&domain);

        pos += repulsion * self.host.sphere_repulsion(Sphere::new(pos, radius));
        if self.config.place_on_terrain {
            pos.y = self.host.terrain_height(pos.x, pos.z);
        } else {
            pos.y = 0.0;
        }

        let child = self.host.create_placement("scwfc-node");
        self.engine.set_domain(child, domain);
        self.host.set_radius(child, radius);
        self.host.set_neighborhood_radius(child, radius * self.config.neighbor_radius_factor);
        self.host.set_position(child, pos);
        self.host.set_rotation(child, self.host.rotation(parent));

        self.node_check_and_update(child);

        if self.host.is_destroyed(child) {
            None
        } else {
            self.connect_to_nearby(child, pos, radius);
            self.push_boundary(child);
            Some(child)
        }
    }

    /// Pops up to `steps` nodes off the solving boundary, observing and
    /// propagating each, and pushes newly-seen neighbors back on.
    pub fn wfc_solve(&mut self, steps: usize) {
        for _ in 0..steps {
            let Some(n) = self.boundary.pop_top() else {
                break;
            };
            if self.host.is_destroyed(n) {
                continue;
            }

            if !self.host.is_finalized(n) {
                if self.config.neighborhood_refresh == NeighborhoodRefresh::Always {
                    let pos = self.host.position(n);
                    let radius = self.host.radius(n);
                    self.connect_to_nearby(n, pos, radius);
                }
                self.step_and_update(n);
            }

            for neighbor in self.engine.graph().adjacent_nodes(n) {
                let already_seen = self.discovered.contains(&neighbor);
                if !already_seen || (self.config.allow_revisit_node && !self.host.is_destroyed(neighbor)) {
                    self.discovered.insert(neighbor);
                    let entropy = self.engine.node_entropy(neighbor);
                    self.boundary.push(neighbor, entropy);
                }
            }

            self.node_check_and_update(n);
        }
    }

    /// `engine.observe` plus a propagation pass that refreshes every
    /// touched node's host state as it goes, rather than deferring to
    /// `wfc_solve`'s own post-step call.
    fn step_and_update(&mut self, node: i64) {
        let mut rng = std::mem::replace(&mut self.rng, StdRng::seed_from_u64(0));
        self.engine.observe(node, &mut rng);
        self.propagate_with_updates(node, &mut rng);
        self.rng = rng;
    }

    fn propagate_with_updates(&mut self, origin: i64, rng: &mut StdRng) {
        // Re-implemented at this layer (rather than via WFCSolver's own
        // callback) because the callback needs `&mut self` access to the
        // host, which a `Box<dyn FnMut(i64)>` stored on the engine cannot
        // borrow.
        use std::collections::{HashSet as Set, VecDeque as Deque};
        let mut queue: Deque<i64> = Deque::new();
        let mut visited: Set<i64> = Set::new();
        queue.push_back(origin);
        visited.insert(origin);
        let mut force = true;

        while let Some(n) = queue.pop_front() {
            let changed = self.engine.update_domain(n);
            self.node_check_and_update(n);
            if changed || force {
                force = false;
                let mut neighbors = self.engine.graph().adjacent_nodes(n);
                shuffle(&mut neighbors, rng);
                for neighbor in neighbors {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    if !self.config.allow_revisit_node
                        && !self.engine.domain(neighbor).is_empty()
                        && self.engine.domain(neighbor).len() == 1
                        && self.host.is_finalized(neighbor)
                    {
                        continue;
                    }
                    visited.insert(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }
    }

    /// Repair sweep for Approximate-validity propagation: destroys any
    /// discovered, non-finalized node whose first `Val` is no longer
    /// valid under its current neighborhood.
    pub fn reevaluate_validity(&mut self) {
        let nodes: Vec<i64> = self.discovered.iter().copied().collect();
        for node in nodes {
            if self.host.is_destroyed(node) || self.host.is_finalized(node) {
                continue;
            }
            let domain = self.engine.domain(node);
            let Some(&first) = domain.first() else {
                continue;
            };
            if !self.engine.valid(first, node) {
                self.host.destroy_placement(node);
                self.engine.graph_mut().remove_node(node);
                self.engine.remove_node_domain(node);
                self.discovered.remove(&node);
            }
        }
    }

    /// Post-condition driver for a single placement: destroys empty
    /// domains, finalizes singletons, or keeps an unsolved placeholder.
    fn node_check_and_update(&mut self, node: i64) {
        if self.host.is_finalized(node) || self.host.is_destroyed(node) {
            return;
        }

        let domain = self.engine.domain(node).to_vec();

        if domain.is_empty() {
            self.host.destroy_placement(node);
            self.engine.graph_mut().remove_node(node);
            self.engine.remove_node_domain(node);
            self.discovered.remove(&node);
            log::debug!("node {node} destroyed: empty domain");
            return;
        }

        if domain.len() == 1 {
            self.finalize_node(node, domain[0]);
            return;
        }

        let radius = self.host.radius(node);
        self.host.set_model(node, self.unsolved_model.clone());
        self.host.set_radius(node, radius);
        self.host.set_neighborhood_radius(node, radius * self.config.neighbor_radius_factor);
    }

    fn finalize_node(&mut self, node: i64, val: Val) {
        let Some(pattern) = self.db.pattern(val.pattern_id).cloned() else {
            self.host.destroy_placement(node);
            log::warn!("node {node} destroyed: dangling pattern {}", val.pattern_id);
            return;
        };

        let variants: Vec<ObjectData> = self.db.objects_for_class(pattern.class_id).to_vec();
        let mut order: Vec<usize> = (0..variants.len()).collect();
        shuffle_indices(&mut order, &mut self.rng);

        let resolved = order
            .into_iter()
            .map(|i| &variants[i])
            .find_map(|obj| self.host.resolve_model(&obj.asset_path).map(|m| (obj, m)));

        let Some((obj, model)) = resolved else {
            log::debug!("node {node} kept unsolved: no loadable asset for class {}", pattern.class_id);
            return;
        };

        let rotation_y = match obj.axis_settings.y {
            Orientation::Free => self.rng.random_range(0.0..TAU),
            Orientation::Stepped => (self.rng.random_range(0..4) as f32) / 4.0 * TAU,
            Orientation::Lock => 0.0,
        };

        // The mesh AABB this scale would normally be derived from is host
        // (renderer) state this crate never sees; `extent` stands in
        // directly as the finalized footprint, so scale stays identity.
        let radius = obj.extent / 2.0;

        self.host.set_model(node, model);
        self.host.set_scale(node, Vec3::ONE);
        self.host.set_radius(node, radius);
        self.host.set_neighborhood_radius(node, radius * self.config.neighbor_radius_factor);
        if rotation_y != 0.0 {
            let current = self.host.rotation(node);
            self.host.set_rotation(node, current * Quat::from_rotation_y(rotation_y));
        }
        let pos = self.host.position(node);
        self.host.set_position(node, Vec3::new(pos.x, 0.0, pos.z));
        self.host.set_finalized(node);

        if self.host.intersects_any_solved_neighbor(node) {
            self.host.destroy_placement(node);
            log::debug!("node {node} destroyed: intersects a finalized neighbor");
        }
    }
}

fn bernoulli(rng: &mut StdRng, p: f32) -> bool {
    let p = p.clamp(0.0, 1.0) as f64;
    Bernoulli::new(p).map(|d| d.sample(rng)).unwrap_or(false)
}

fn gaussian(rng: &mut StdRng, std_dev: f32) -> f32 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, std_dev).map(|d| d.sample(rng)).unwrap_or(0.0)
}

fn shuffle(items: &mut [i64], rng: &mut StdRng) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

fn shuffle_indices(items: &mut [usize], rng: &mut StdRng) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Obb;
    use crate::id::PatternId;
    use crate::scene::test_support::RecordingHost;
    use glam::Mat3;

    fn two_class_db() -> ObjectDatabase {
        let mut db = ObjectDatabase::new();
        let a = db.create_class("A");
        let b = db.create_class("B");
        let pa = db.create_pattern(Pattern::new(a, vec![b, b], 1.0));
        let pb = db.create_pattern(Pattern::new(b, vec![a], 1.0));

        let mut obj_a = ObjectData::new("a-thing", "a.obj", 1.0);
        obj_a.propagation_obbs.push(Obb::new(Vec3::ZERO, Vec3::splat(2.0), Mat3::IDENTITY));
        db.add_object_data(a, obj_a);

        let mut obj_b = ObjectData::new("b-thing", "b.obj", 1.0);
        obj_b.propagation_obbs.push(Obb::new(Vec3::ZERO, Vec3::splat(2.0), Mat3::IDENTITY));
        db.add_object_data(b, obj_b);

        let _ = (pa, pb);
        db
    }

    #[test]
    fn empty_domain_destroys_node_immediately() {
        let db = ObjectDatabase::new();
        let host = RecordingHost::new();
        let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 1, SolverConfig::default());
        let node = solver.host_mut().create_placement("empty");
        solver.engine.set_domain(node, Vec::new());
        solver.node_check_and_update(node);
        assert!(solver.host().is_destroyed(node));
    }

    #[test]
    fn finalizing_a_singleton_domain_sets_finalized_flag() {
        let db = two_class_db();
        let host = RecordingHost::new();
        let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 42, SolverConfig::default());
        let node = solver.host_mut().create_placement("n");
        solver.host_mut().set_position(node, Vec3::ZERO);
        let a_class = ClassId::new(0);
        solver.engine.set_domain(node, vec![Val::new(a_class, PatternId::new(0))]);
        solver.node_check_and_update(node);
        assert!(solver.host().is_finalized(node));
    }

    #[test]
    fn sc_propagate_from_seed_grows_connected_graph() {
        let db = two_class_db();
        let host = RecordingHost::new();
        let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 7, SolverConfig::default());
        solver.sc_propagate(5, DEFAULT_BRANCHING, 0.0);
        assert!(solver.discovered_size() >= 1);
    }

    #[test]
    fn reevaluate_validity_destroys_only_invalid_node() {
        let db = two_class_db();
        let host = RecordingHost::new();
        let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 3, SolverConfig::default());

        let good = solver.host_mut().create_placement("good");
        let bad = solver.host_mut().create_placement("bad");
        solver.engine.set_domain(good, vec![Val::new(ClassId::new(1), PatternId::new(1))]); // class B requires A, none present -> invalid
        solver.engine.set_domain(bad, vec![Val::new(ClassId::new(1), PatternId::new(1))]);
        solver.engine.set_validity_mode(ValidityMode::Correct);
        solver.discovered.insert(good);
        solver.discovered.insert(bad);
        // Neither has a neighbor with class A, so both single-value
        // domains are actually invalid; destroy only the one we assert on
        // by giving `good` a satisfying neighbor first.
        solver.engine.graph_mut().add_edge(good, bad, 1.0);
        solver.engine.set_domain(bad, vec![Val::new(ClassId::new(0), PatternId::new(0))]); // class A

        solver.reevaluate_validity();

        assert!(!solver.host().is_destroyed(good));
    }
}
