//! End-to-end coverage driving `SCWFCSolver` against `RecordingHost`, the
//! in-memory scene the crate ships for exactly this purpose.

use glam::{Mat3, Vec3};
use pretty_assertions::assert_eq;
use scwfc::scene::test_support::RecordingHost;
use scwfc::{
    ClassId, DomainMode, Obb, ObjectData, ObjectDatabase, Pattern, PatternId, SCWFCSolver, ScenePlacementHost,
    SolverConfig, SolvingOrder, DEFAULT_BRANCHING,
};

fn chain_db() -> (ObjectDatabase, ClassId, ClassId, PatternId, PatternId) {
    let mut db = ObjectDatabase::new();
    let wall = db.create_class("Wall");
    let corner = db.create_class("Corner");

    let wall_pattern = db.create_pattern(Pattern::new(wall, vec![corner], 1.0));
    let corner_pattern = db.create_pattern(Pattern::new(corner, vec![wall], 1.0));

    let mut wall_obj = ObjectData::new("wall-a", "wall.glb", 2.0);
    wall_obj
        .propagation_obbs
        .push(Obb::new(Vec3::ZERO, Vec3::new(3.0, 1.0, 1.0), Mat3::IDENTITY));
    db.add_object_data(wall, wall_obj);

    let mut corner_obj = ObjectData::new("corner-a", "corner.glb", 1.0);
    corner_obj
        .propagation_obbs
        .push(Obb::new(Vec3::ZERO, Vec3::splat(1.0), Mat3::IDENTITY));
    db.add_object_data(corner, corner_obj);

    (db, wall, corner, wall_pattern, corner_pattern)
}

#[test]
fn fresh_database_gives_the_auto_spawned_seed_a_full_starting_domain() {
    let (db, wall, corner, _wall_pattern, _corner_pattern) = chain_db();
    let host = RecordingHost::new();
    let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 11, SolverConfig::default());

    // sc_propagate spawns its own seed node (handle 0) when the expanding
    // boundary is empty, drawing the seed's domain from every class.
    solver.sc_propagate(1, DEFAULT_BRANCHING, 0.0);

    assert!(solver.discovered_size() >= 1);
    let domain = solver.domain(0);
    if !domain.is_empty() {
        let classes: std::collections::HashSet<ClassId> = domain.iter().map(|v| v.class_id).collect();
        assert!(classes.contains(&wall) || classes.contains(&corner));
    }
}

#[test]
fn empty_seed_domain_destroys_the_node() {
    let db = ObjectDatabase::new();
    let host = RecordingHost::new();
    let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 2, SolverConfig::default());

    solver.sc_propagate(1, DEFAULT_BRANCHING, 0.0);

    // An empty database means the seed's domain is empty too, so
    // `node_check_and_update` destroys it immediately during the seed spawn.
    assert_eq!(solver.discovered_size(), 0);
}

#[test]
fn sc_propagate_keeps_surviving_children_apart_under_repulsion() {
    let (db, _, _, _, _) = chain_db();
    let host = RecordingHost::new();
    let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 99, SolverConfig::default());

    solver.sc_propagate(8, DEFAULT_BRANCHING, 1.0);

    let mut positions = Vec::new();
    for id in 0..64 {
        if !solver.host().is_destroyed(id) {
            if let Some(p) = solver.host().get(id) {
                positions.push((p.position, p.radius));
            }
        }
    }
    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            let (pi, ri) = positions[i];
            let (pj, rj) = positions[j];
            let dist = (pi - pj).length();
            if ri > 0.0 && rj > 0.0 {
                assert!(dist > 0.0, "placements {i} and {j} landed exactly on top of each other");
            }
        }
    }
}

#[test]
fn approximate_validity_repair_leaves_multi_value_domains_alone() {
    let (db, wall, corner, _wall_pattern, _corner_pattern) = chain_db();
    let host = RecordingHost::new();
    let mut config = SolverConfig::default();
    config.validity_mode = scwfc::ValidityMode::Approximate { domain_size_cutoff: 4 };
    let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 5, config);

    let lonely = solver.host_mut().create_placement("lonely");
    solver.host_mut().set_position(lonely, Vec3::ZERO);
    solver.set_seed_node(lonely);

    assert!(solver
        .domain(lonely)
        .iter()
        .any(|v| v.class_id == wall || v.class_id == corner));

    solver.reevaluate_validity();
    // The repair sweep only inspects singleton domains; a node still
    // holding both candidate classes is left untouched.
    assert!(!solver.host().is_destroyed(lonely));
}

#[test]
fn discovery_order_boundary_shrinks_by_one_per_step() {
    let (db, _, _, _, _) = chain_db();
    let host = RecordingHost::new();
    let mut config = SolverConfig::default();
    config.solving_order = SolvingOrder::DiscoveryOrder;
    let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 4, config);

    let a = solver.host_mut().create_placement("a");
    let b = solver.host_mut().create_placement("b");
    solver.host_mut().set_position(a, Vec3::ZERO);
    solver.host_mut().set_position(b, Vec3::new(5.0, 0.0, 0.0));
    solver.set_seed_node(a);
    solver.set_seed_node(b);

    assert_eq!(solver.boundary_size(), 2);
    solver.wfc_solve(1);
    assert!(solver.boundary_size() <= 2);
}

#[test]
fn database_round_trips_through_json_and_still_drives_the_solver() {
    let (db, wall, _corner, wall_pattern, _corner_pattern) = chain_db();
    let json = db.save_str().expect("serialize database");
    let reloaded = ObjectDatabase::load_str(&json).expect("deserialize database");

    assert_eq!(reloaded.class_name(wall), "Wall");
    assert_eq!(reloaded.patterns_for_class(wall), &[wall_pattern]);

    let host = RecordingHost::new();
    let mut solver = SCWFCSolver::new(reloaded, host, "unsolved".to_string(), 6, SolverConfig::default());
    solver.sc_propagate(3, DEFAULT_BRANCHING, 0.5);
    assert!(solver.discovered_size() >= 1);
}

#[test]
fn full_domain_mode_never_narrows_children_below_the_class_pair() {
    let (db, wall, corner, _wall_pattern, _corner_pattern) = chain_db();
    let host = RecordingHost::new();
    let mut config = SolverConfig::default();
    config.domain_mode = DomainMode::Full;
    let mut solver = SCWFCSolver::new(db, host, "unsolved".to_string(), 21, config);

    solver.sc_propagate(6, DEFAULT_BRANCHING, 0.0);

    for id in 0..64 {
        if solver.host().is_destroyed(id) {
            continue;
        }
        let domain = solver.domain(id);
        if domain.len() > 1 {
            let classes: std::collections::HashSet<ClassId> = domain.iter().map(|v| v.class_id).collect();
            assert!(classes.contains(&wall) || classes.contains(&corner));
        }
    }
}
