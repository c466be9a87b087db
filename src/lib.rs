pub mod boundary;
pub mod database;
pub mod graph;
pub mod id;
pub mod pattern;
pub mod sc_solver;
pub mod scene;
pub mod solver;

pub use boundary::Boundary;
pub use database::{AxisSettings, DatabaseError, Obb, ObjectData, ObjectDatabase, Orientation};
pub use graph::{ford_fulkerson, DenseGraph, Graph, GraphNode, SparseGraph};
pub use id::{ClassId, IdAllocator, NodeIdAllocator, PatternId};
pub use pattern::{NeighborView, Pattern, PatternMap, Val, ValidityMode};
pub use sc_solver::{
    ApproximateValidityConfig, DomainMode, NeighborhoodRefresh, SCWFCSolver, SolverConfig, SolvingOrder,
    DEFAULT_BRANCHING,
};
pub use scene::{PlacementHandle, ScenePlacementHost, Sphere};
pub use solver::WFCSolver;
