//! The scene-placement contract: the minimal interface `SCWFCSolver`
//! expects from whatever owns the actual renderable scene. The solver
//! consumes this trait only — it never touches a renderer, a node tree, or
//! a camera directly.

use glam::{Quat, Vec3};

/// A sphere used for repulsion and overlap queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// Opaque handle to a placement created through `ScenePlacementHost`.
pub type PlacementHandle = i64;

/// Everything the solver needs from a host scene. `Model` is whatever
/// opaque resource handle the host's renderer uses (mesh, prefab, …) — the
/// solver only ever stores and forwards it, never inspects it.
pub trait ScenePlacementHost {
    type Model: Clone;

    /// Creates a placement at the origin with zero radii. Returns a fresh,
    /// host-unique handle.
    fn create_placement(&mut self, name: &str) -> PlacementHandle;

    /// Idempotent; safe to call on an already-destroyed or queued handle.
    fn destroy_placement(&mut self, handle: PlacementHandle);

    fn set_position(&mut self, handle: PlacementHandle, position: Vec3);
    fn position(&self, handle: PlacementHandle) -> Vec3;

    fn set_rotation(&mut self, handle: PlacementHandle, rotation: Quat);
    fn rotation(&self, handle: PlacementHandle) -> Quat;

    fn set_scale(&mut self, handle: PlacementHandle, scale: Vec3);

    fn set_radius(&mut self, handle: PlacementHandle, radius: f32);
    fn radius(&self, handle: PlacementHandle) -> f32;

    fn set_neighborhood_radius(&mut self, handle: PlacementHandle, radius: f32);
    fn neighborhood_radius(&self, handle: PlacementHandle) -> f32;

    /// Flag only — the solver treats a finalized node as immutable.
    fn set_finalized(&mut self, handle: PlacementHandle);
    fn is_finalized(&self, handle: PlacementHandle) -> bool;

    fn is_destroyed(&self, handle: PlacementHandle) -> bool;

    fn set_model(&mut self, handle: PlacementHandle, model: Self::Model);
    fn clear_model(&mut self, handle: PlacementHandle);

    /// Resolves an `ObjectData::asset_path` into a concrete model handle.
    /// `None` means the asset failed to load — the caller treats that
    /// object variant as unusable for finalization without failing the
    /// whole solve.
    fn resolve_model(&self, asset_path: &str) -> Option<Self::Model>;

    /// A displacement vector summarizing overlap between `sphere` and
    /// existing placements.
    fn sphere_repulsion(&self, sphere: Sphere) -> Vec3;

    /// Does `handle`'s current bounding volume intersect any already
    /// finalized placement?
    fn intersects_any_solved_neighbor(&self, handle: PlacementHandle) -> bool;

    /// World-space ground height at `(x, z)`. Hosts with no terrain return
    /// `0.0`.
    fn terrain_height(&self, x: f32, z: f32) -> f32 {
        let _ = (x, z);
        0.0
    }
}

/// In-memory `ScenePlacementHost` used by this crate's own tests so solver
/// behavior can be exercised without a real renderer. Public (not
/// `#[cfg(test)]`-gated) so integration tests under `tests/` can use it
/// too; it has no reason to exist outside test code.
pub mod test_support {
    use super::*;
    use crate::id::NodeIdAllocator;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Default)]
    pub struct RecordedPlacement {
        pub name: String,
        pub position: Vec3,
        pub rotation: Quat,
        pub scale: Vec3,
        pub radius: f32,
        pub neighborhood_radius: f32,
        pub finalized: bool,
        pub destroyed: bool,
        pub model: Option<String>,
    }

    /// A host whose only job is to remember what the solver told it,
    /// including enough geometry to answer repulsion/intersection queries.
    #[derive(Debug, Default)]
    pub struct RecordingHost {
        placements: HashMap<PlacementHandle, RecordedPlacement>,
        node_ids: NodeIdAllocator,
        pub terrain_height_fn: Option<fn(f32, f32) -> f32>,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, handle: PlacementHandle) -> Option<&RecordedPlacement> {
            self.placements.get(&handle)
        }
    }

    impl ScenePlacementHost for RecordingHost {
        type Model = String;

        fn create_placement(&mut self, name: &str) -> PlacementHandle {
            let handle = self.node_ids.alloc();
            self.placements.insert(
                handle,
                RecordedPlacement {
                    name: name.to_string(),
                    scale: Vec3::ONE,
                    rotation: Quat::IDENTITY,
                    ..Default::default()
                },
            );
            handle
        }

        fn destroy_placement(&mut self, handle: PlacementHandle) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.destroyed = true;
            }
        }

        fn set_position(&mut self, handle: PlacementHandle, position: Vec3) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.position = position;
            }
        }

        fn position(&self, handle: PlacementHandle) -> Vec3 {
            self.placements.get(&handle).map(|p| p.position).unwrap_or(Vec3::ZERO)
        }

        fn set_rotation(&mut self, handle: PlacementHandle, rotation: Quat) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.rotation = rotation;
            }
        }

        fn rotation(&self, handle: PlacementHandle) -> Quat {
            self.placements.get(&handle).map(|p| p.rotation).unwrap_or(Quat::IDENTITY)
        }

        fn set_scale(&mut self, handle: PlacementHandle, scale: Vec3) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.scale = scale;
            }
        }

        fn set_radius(&mut self, handle: PlacementHandle, radius: f32) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.radius = radius;
            }
        }

        fn radius(&self, handle: PlacementHandle) -> f32 {
            self.placements.get(&handle).map(|p| p.radius).unwrap_or(0.0)
        }

        fn set_neighborhood_radius(&mut self, handle: PlacementHandle, radius: f32) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.neighborhood_radius = radius;
            }
        }

        fn neighborhood_radius(&self, handle: PlacementHandle) -> f32 {
            self.placements.get(&handle).map(|p| p.neighborhood_radius).unwrap_or(0.0)
        }

        fn set_finalized(&mut self, handle: PlacementHandle) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.finalized = true;
            }
        }

        fn is_finalized(&self, handle: PlacementHandle) -> bool {
            self.placements.get(&handle).map(|p| p.finalized).unwrap_or(false)
        }

        fn is_destroyed(&self, handle: PlacementHandle) -> bool {
            self.placements.get(&handle).map(|p| p.destroyed).unwrap_or(true)
        }

        fn set_model(&mut self, handle: PlacementHandle, model: Self::Model) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.model = Some(model);
            }
        }

        fn clear_model(&mut self, handle: PlacementHandle) {
            if let Some(p) = self.placements.get_mut(&handle) {
                p.model = None;
            }
        }

        fn resolve_model(&self, asset_path: &str) -> Option<Self::Model> {
            if asset_path.is_empty() {
                None
            } else {
                Some(asset_path.to_string())
            }
        }

        fn sphere_repulsion(&self, sphere: Sphere) -> Vec3 {
            let mut push = Vec3::ZERO;
            for (&handle, p) in &self.placements {
                if p.destroyed {
                    continue;
                }
                let _ = handle;
                let delta = sphere.center - p.position;
                let dist = delta.length();
                let min_dist = sphere.radius + p.radius;
                if dist > 1e-6 && dist < min_dist {
                    push += delta.normalize() * (min_dist - dist);
                } else if dist <= 1e-6 && min_dist > 0.0 {
                    push += Vec3::X * min_dist;
                }
            }
            push
        }

        fn intersects_any_solved_neighbor(&self, handle: PlacementHandle) -> bool {
            let Some(target) = self.placements.get(&handle) else {
                return false;
            };
            self.placements.iter().any(|(&other_handle, other)| {
                other_handle != handle
                    && other.finalized
                    && !other.destroyed
                    && (target.position - other.position).length() < target.radius + other.radius
            })
        }

        fn terrain_height(&self, x: f32, z: f32) -> f32 {
            self.terrain_height_fn.map(|f| f(x, z)).unwrap_or(0.0)
        }
    }

}
