//! Generic graph over opaque node handles.
//!
//! The SC+WFC core never lets the graph own a node's *data* — only its
//! `node_id` and adjacency. Placement state lives in the host scene; domain
//! state lives in the solver's own node table. This sidesteps the
//! ownership cycle the reference engine solved with ref-counted back
//! pointers (see the design notes): a `Graph<N>` here is nothing more than
//! an adjacency structure keyed by ids.
//!
//! Two implementations share the [`Graph`] trait: [`SparseGraph`] (backed
//! by `petgraph::graphmap`, used by the solver) and [`DenseGraph`] (backed
//! by `petgraph::graph`, bounded capacity, carries the Ford–Fulkerson
//! max-flow helper used by nothing in the SC+WFC core but kept because the
//! module is a reusable building block).

use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use petgraph::graphmap::{DiGraphMap, UnGraphMap};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A value usable as a graph node handle — just an integer id in practice.
pub trait GraphNode: Copy + Eq + Hash + Ord + std::fmt::Debug {
    fn node_id(&self) -> i64;
}

impl GraphNode for i64 {
    fn node_id(&self) -> i64 {
        *self
    }
}

/// Shared surface for sparse and dense graph backends.
pub trait Graph<N: GraphNode> {
    /// Insert `a` and `b` if missing and record an edge of weight `w`.
    /// A no-op if the edge already exists (first weight wins). Self-loops
    /// are rejected on undirected graphs.
    fn add_edge(&mut self, a: N, b: N, w: f32);

    /// Remove the edge between `a` and `b`, if any.
    fn remove_edge(&mut self, a: N, b: N);

    /// Remove `a` and every edge incident to it.
    fn remove_node(&mut self, a: N);

    /// Edge weight between `a` and `b`, or `0.0` if absent.
    fn adjacent(&self, a: N, b: N) -> f32;

    /// Neighbors of `a` in insertion order (empty if `a` is unknown).
    fn adjacent_nodes(&self, a: N) -> Vec<N>;

    fn is_directed(&self) -> bool;

    fn n_nodes(&self) -> usize;

    fn contains_node(&self, a: N) -> bool;

    /// Breadth-first search from `a` to `b`. Returns the path (inclusive of
    /// both ends) if `b` is reachable.
    fn bfs(&self, a: N, b: N) -> Option<Vec<N>> {
        if !self.contains_node(a) || !self.contains_node(b) {
            return None;
        }
        let mut parent: HashMap<N, N> = HashMap::new();
        let mut visited: std::collections::HashSet<N> = std::collections::HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(a);
        visited.insert(a);

        while let Some(u) = queue.pop_front() {
            if u == b {
                return Some(reconstruct_path(&parent, a, b));
            }
            for v in self.adjacent_nodes(u) {
                if visited.insert(v) {
                    parent.insert(v, u);
                    queue.push_back(v);
                }
            }
        }
        if a == b {
            return Some(vec![a]);
        }
        None
    }
}

fn reconstruct_path<N: GraphNode>(parent: &HashMap<N, N>, a: N, b: N) -> Vec<N> {
    let mut path = vec![b];
    let mut cur = b;
    while cur != a {
        cur = parent[&cur];
        path.push(cur);
    }
    path.reverse();
    path
}

// ─── Sparse graph ──────────────────────────────────────────────────────────

enum SparseInner<N: GraphNode> {
    Directed(DiGraphMap<N, f32>),
    Undirected(UnGraphMap<N, f32>),
}

/// `petgraph::graphmap` backed graph, keyed directly by `N` rather than an
/// opaque `NodeIndex` — a natural fit since this crate's nodes are already
/// plain integer handles. O(1)-ish average node/edge lookup.
pub struct SparseGraph<N: GraphNode> {
    inner: SparseInner<N>,
}

impl<N: GraphNode> SparseGraph<N> {
    pub fn new(directed: bool) -> Self {
        let inner = if directed {
            SparseInner::Directed(DiGraphMap::new())
        } else {
            SparseInner::Undirected(UnGraphMap::new())
        };
        Self { inner }
    }
}

impl<N: GraphNode> Default for SparseGraph<N> {
    fn default() -> Self {
        Self::new(false)
    }
}

impl<N: GraphNode> Graph<N> for SparseGraph<N> {
    fn add_edge(&mut self, a: N, b: N, w: f32) {
        match &mut self.inner {
            SparseInner::Directed(g) => {
                if g.contains_edge(a, b) {
                    return; // already present — first weight wins
                }
                g.add_edge(a, b, w);
            }
            SparseInner::Undirected(g) => {
                if a == b {
                    return; // self-loops rejected on undirected graphs
                }
                if g.contains_edge(a, b) {
                    return;
                }
                g.add_edge(a, b, w);
            }
        }
    }

    fn remove_edge(&mut self, a: N, b: N) {
        match &mut self.inner {
            SparseInner::Directed(g) => {
                g.remove_edge(a, b);
            }
            SparseInner::Undirected(g) => {
                g.remove_edge(a, b);
            }
        }
    }

    fn remove_node(&mut self, a: N) {
        match &mut self.inner {
            SparseInner::Directed(g) => {
                g.remove_node(a);
            }
            SparseInner::Undirected(g) => {
                g.remove_node(a);
            }
        }
    }

    fn adjacent(&self, a: N, b: N) -> f32 {
        match &self.inner {
            SparseInner::Directed(g) => g.edge_weight(a, b).copied().unwrap_or(0.0),
            SparseInner::Undirected(g) => g.edge_weight(a, b).copied().unwrap_or(0.0),
        }
    }

    fn adjacent_nodes(&self, a: N) -> Vec<N> {
        match &self.inner {
            SparseInner::Directed(g) => g.neighbors(a).collect(),
            SparseInner::Undirected(g) => g.neighbors(a).collect(),
        }
    }

    fn is_directed(&self) -> bool {
        matches!(self.inner, SparseInner::Directed(_))
    }

    fn n_nodes(&self) -> usize {
        match &self.inner {
            SparseInner::Directed(g) => g.node_count(),
            SparseInner::Undirected(g) => g.node_count(),
        }
    }

    fn contains_node(&self, a: N) -> bool {
        match &self.inner {
            SparseInner::Directed(g) => g.contains_node(a),
            SparseInner::Undirected(g) => g.contains_node(a),
        }
    }
}

// ─── Dense graph ───────────────────────────────────────────────────────────

enum DenseInner<N: GraphNode> {
    Directed(DiGraph<N, f32>),
    Undirected(UnGraph<N, f32>),
}

/// `petgraph::graph` backed graph with a fixed node capacity, chosen when
/// `N` is bounded and small. Node insertion beyond `capacity` is a
/// programmer error (fail-fast), matching the reference engine's
/// assertion-based contract. Keeps its own `N -> NodeIndex` map alongside
/// the petgraph storage, the same pairing the teacher's own scene graph
/// keeps alongside its `petgraph::graph::DiGraph`.
pub struct DenseGraph<N: GraphNode> {
    capacity: usize,
    inner: DenseInner<N>,
    index: HashMap<N, NodeIndex>,
}

impl<N: GraphNode> DenseGraph<N> {
    pub fn new(capacity: usize, directed: bool) -> Self {
        let inner = if directed {
            DenseInner::Directed(DiGraph::with_capacity(capacity, capacity))
        } else {
            DenseInner::Undirected(UnGraph::with_capacity(capacity, capacity))
        };
        Self {
            capacity,
            inner,
            index: HashMap::with_capacity(capacity),
        }
    }

    fn ensure_index(&mut self, a: N) -> NodeIndex {
        if let Some(&idx) = self.index.get(&a) {
            return idx;
        }
        assert!(
            self.index.len() < self.capacity,
            "DenseGraph capacity {} exceeded adding node {:?}",
            self.capacity,
            a
        );
        let idx = match &mut self.inner {
            DenseInner::Directed(g) => g.add_node(a),
            DenseInner::Undirected(g) => g.add_node(a),
        };
        self.index.insert(a, idx);
        idx
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every node currently in the graph, in no particular order.
    pub fn nodes(&self) -> Vec<N> {
        self.index.keys().copied().collect()
    }
}

impl<N: GraphNode> Graph<N> for DenseGraph<N> {
    fn add_edge(&mut self, a: N, b: N, w: f32) {
        let undirected = matches!(self.inner, DenseInner::Undirected(_));
        if undirected && a == b {
            return;
        }
        let ia = self.ensure_index(a);
        let ib = self.ensure_index(b);
        match &mut self.inner {
            DenseInner::Directed(g) => {
                if g.find_edge(ia, ib).is_some() {
                    return; // already present — first weight wins
                }
                g.add_edge(ia, ib, w);
            }
            DenseInner::Undirected(g) => {
                if g.find_edge(ia, ib).is_some() {
                    return;
                }
                g.add_edge(ia, ib, w);
            }
        }
    }

    fn remove_edge(&mut self, a: N, b: N) {
        let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) else {
            return;
        };
        match &mut self.inner {
            DenseInner::Directed(g) => {
                if let Some(e) = g.find_edge(ia, ib) {
                    g.remove_edge(e);
                }
            }
            DenseInner::Undirected(g) => {
                if let Some(e) = g.find_edge(ia, ib) {
                    g.remove_edge(e);
                }
            }
        }
    }

    fn remove_node(&mut self, a: N) {
        let Some(&idx) = self.index.get(&a) else {
            return;
        };
        // `petgraph::graph::Graph::remove_node` swap-removes: the last node
        // takes the removed slot's index, so the index map has to follow it.
        let last_idx = NodeIndex::new(self.index.len() - 1);
        match &mut self.inner {
            DenseInner::Directed(g) => {
                let last_key = g[last_idx];
                g.remove_node(idx);
                self.index.remove(&a);
                if last_idx != idx {
                    self.index.insert(last_key, idx);
                }
            }
            DenseInner::Undirected(g) => {
                let last_key = g[last_idx];
                g.remove_node(idx);
                self.index.remove(&a);
                if last_idx != idx {
                    self.index.insert(last_key, idx);
                }
            }
        }
    }

    fn adjacent(&self, a: N, b: N) -> f32 {
        let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) else {
            return 0.0;
        };
        match &self.inner {
            DenseInner::Directed(g) => g
                .find_edge(ia, ib)
                .and_then(|e| g.edge_weight(e))
                .copied()
                .unwrap_or(0.0),
            DenseInner::Undirected(g) => g
                .find_edge(ia, ib)
                .and_then(|e| g.edge_weight(e))
                .copied()
                .unwrap_or(0.0),
        }
    }

    fn adjacent_nodes(&self, a: N) -> Vec<N> {
        let Some(&ia) = self.index.get(&a) else {
            return Vec::new();
        };
        match &self.inner {
            DenseInner::Directed(g) => g.neighbors(ia).map(|idx| g[idx]).collect(),
            DenseInner::Undirected(g) => g.neighbors(ia).map(|idx| g[idx]).collect(),
        }
    }

    fn is_directed(&self) -> bool {
        matches!(self.inner, DenseInner::Directed(_))
    }

    fn n_nodes(&self) -> usize {
        self.index.len()
    }

    fn contains_node(&self, a: N) -> bool {
        self.index.contains_key(&a)
    }
}

/// Maximum flow from `source` to `sink` via repeated BFS augmenting paths
/// (Edmonds–Karp). Not used by the SC+WFC core; retained because `Graph` is
/// a reusable building block and dense capacity graphs are a natural fit
/// for flow problems. Works purely through the `Graph`/`DenseGraph` public
/// surface so it stays agnostic to whatever backs `DenseGraph` internally.
pub fn ford_fulkerson<N: GraphNode>(capacities: &DenseGraph<N>, source: N, sink: N) -> f32 {
    if !capacities.contains_node(source) || !capacities.contains_node(sink) {
        return 0.0;
    }

    let nodes = capacities.nodes();
    let n = nodes.len();
    let pos: HashMap<N, usize> = nodes.iter().enumerate().map(|(i, &node)| (node, i)).collect();
    let mut residual = vec![0.0f32; n * n];
    for &a in &nodes {
        for &b in &nodes {
            residual[pos[&a] * n + pos[&b]] = capacities.adjacent(a, b);
        }
    }

    let s = pos[&source];
    let t = pos[&sink];
    let mut max_flow = 0.0;

    loop {
        let mut parent = vec![usize::MAX; n];
        let mut visited = vec![false; n];
        let mut queue = VecDeque::new();
        queue.push_back(s);
        visited[s] = true;

        while let Some(u) = queue.pop_front() {
            for v in 0..n {
                if !visited[v] && residual[u * n + v] > 0.0 {
                    visited[v] = true;
                    parent[v] = u;
                    queue.push_back(v);
                }
            }
        }

        if !visited[t] {
            break;
        }

        // Bottleneck along the augmenting path.
        let mut path_flow = f32::MAX;
        let mut v = t;
        while v != s {
            let u = parent[v];
            path_flow = path_flow.min(residual[u * n + v]);
            v = u;
        }

        let mut v = t;
        while v != s {
            let u = parent[v];
            residual[u * n + v] -= path_flow;
            residual[v * n + u] += path_flow;
            v = u;
        }

        max_flow += path_flow;
    }

    max_flow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_undirected_symmetry() {
        let mut g: SparseGraph<i64> = SparseGraph::new(false);
        g.add_edge(1, 2, 3.0);
        assert_eq!(g.adjacent(1, 2), g.adjacent(2, 1));
        assert!(g.adjacent_nodes(1).contains(&2));
        assert!(g.adjacent_nodes(2).contains(&1));
    }

    #[test]
    fn sparse_self_loop_rejected() {
        let mut g: SparseGraph<i64> = SparseGraph::new(false);
        g.add_edge(1, 1, 1.0);
        assert_eq!(g.adjacent(1, 1), 0.0);
    }

    #[test]
    fn sparse_first_weight_wins() {
        let mut g: SparseGraph<i64> = SparseGraph::new(false);
        g.add_edge(1, 2, 5.0);
        g.add_edge(1, 2, 99.0);
        assert_eq!(g.adjacent(1, 2), 5.0);
    }

    #[test]
    fn sparse_remove_node_clears_adjacency() {
        let mut g: SparseGraph<i64> = SparseGraph::new(false);
        g.add_edge(1, 2, 1.0);
        g.add_edge(2, 3, 1.0);
        g.remove_node(2);
        assert!(!g.adjacent_nodes(1).contains(&2));
        assert!(!g.adjacent_nodes(3).contains(&2));
        assert_eq!(g.n_nodes(), 2);
    }

    #[test]
    fn sparse_bfs_finds_path() {
        let mut g: SparseGraph<i64> = SparseGraph::new(false);
        g.add_edge(1, 2, 1.0);
        g.add_edge(2, 3, 1.0);
        g.add_edge(3, 4, 1.0);
        let path = g.bfs(1, 4).expect("path should exist");
        assert_eq!(path, vec![1, 2, 3, 4]);
        assert!(g.bfs(4, 99).is_none());
    }

    #[test]
    fn dense_matches_sparse_semantics() {
        let mut g: DenseGraph<i64> = DenseGraph::new(4, false);
        g.add_edge(0, 1, 2.0);
        g.add_edge(1, 2, 3.0);
        assert_eq!(g.adjacent(0, 1), g.adjacent(1, 0));
        assert_eq!(g.adjacent(0, 2), 0.0);
        let path = g.bfs(0, 2).unwrap();
        assert_eq!(path, vec![0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn dense_overflow_panics() {
        let mut g: DenseGraph<i64> = DenseGraph::new(1, false);
        g.add_edge(0, 1, 1.0);
    }

    #[test]
    fn dense_remove_node_clears_adjacency() {
        let mut g: DenseGraph<i64> = DenseGraph::new(4, false);
        g.add_edge(1, 2, 1.0);
        g.add_edge(2, 3, 1.0);
        g.remove_node(2);
        assert!(!g.adjacent_nodes(1).contains(&2));
        assert!(!g.adjacent_nodes(3).contains(&2));
        assert_eq!(g.n_nodes(), 2);
        // node 3 (the swap-removed survivor) must still resolve correctly.
        assert_eq!(g.adjacent(3, 1), 0.0);
        assert!(g.contains_node(1));
        assert!(g.contains_node(3));
    }

    #[test]
    fn directed_adjacency_is_asymmetric() {
        let mut g: SparseGraph<i64> = SparseGraph::new(true);
        g.add_edge(1, 2, 1.0);
        assert_eq!(g.adjacent(1, 2), 1.0);
        assert_eq!(g.adjacent(2, 1), 0.0);
        assert!(g.adjacent_nodes(1).contains(&2));
        assert!(!g.adjacent_nodes(2).contains(&1));
    }

    #[test]
    fn max_flow_simple_network() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3, capacities chosen for a known max flow.
        let mut g: DenseGraph<i64> = DenseGraph::new(4, true);
        g.add_edge(0, 1, 3.0);
        g.add_edge(0, 2, 2.0);
        g.add_edge(1, 3, 2.0);
        g.add_edge(2, 3, 3.0);
        g.add_edge(1, 2, 1.0);
        let flow = ford_fulkerson(&g, 0, 3);
        assert!((flow - 5.0).abs() < 1e-6, "expected max flow 5.0, got {flow}");
    }
}
