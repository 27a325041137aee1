//! Undirected/directed node graph with a lazily memoized shortest-path
//! oracle (C1). Grounded on `map.rs`'s `Map`/`Tile` adjacency model, but
//! generalized away from raw `(usize, usize)` grid coordinates to stable
//! graph-local node indices so that the rest of the engine never has to
//! know whether a `Node` came from a grid, an OSM extract, or a synthetic
//! test fixture.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use rand::Rng;

/// A single graph vertex. `pos` is carried for map-derived graphs (used as
/// an admissible Manhattan heuristic and for rendering) but is optional --
/// synthetic graphs built directly in tests need not set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: usize,
    pub pos: Option<(usize, usize)>,
    pub neighbors: Vec<usize>,
    pub pickup: bool,
    pub delivery: bool,
    pub endpoint: bool,
    pub station: Option<usize>,
}

impl Node {
    fn bare(id: usize) -> Self {
        Node {
            id,
            pos: None,
            neighbors: Vec::new(),
            pickup: false,
            delivery: false,
            endpoint: false,
            station: None,
        }
    }
}

/// One shortest path, inclusive of both endpoints.
pub type Path = Vec<usize>;

#[derive(Default)]
struct DistanceOracle {
    /// Memoized `(u, v) -> path`. `dist(u, v) == path(u, v).len() - 1`.
    path_cache: HashMap<(usize, usize), Path>,
    /// Dense all-pairs distances, populated only after `warshall_floyd`.
    dense: Option<Vec<Vec<usize>>>,
}

pub struct Graph {
    nodes: Vec<Node>,
    directed: bool,
    oracle: RefCell<DistanceOracle>,
}

impl Graph {
    /// Builds a graph from pre-populated nodes. Callers (the map loader, or
    /// tests) are responsible for adjacency symmetry when `directed` is
    /// false; this constructor does not second-guess it.
    pub fn new(nodes: Vec<Node>, directed: bool) -> Self {
        Graph {
            nodes,
            directed,
            oracle: RefCell::new(DistanceOracle::default()),
        }
    }

    /// Builds an undirected graph from an edge list over `n` nodes.
    pub fn from_edges(n: usize, edges: &[(usize, usize)], directed: bool) -> Self {
        let mut nodes: Vec<Node> = (0..n).map(Node::bare).collect();
        for &(u, v) in edges {
            nodes[u].neighbors.push(v);
            if !directed {
                nodes[v].neighbors.push(u);
            }
        }
        Graph::new(nodes, directed)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn node(&self, v: usize) -> &Node {
        &self.nodes[v]
    }

    pub fn node_mut(&mut self, v: usize) -> &mut Node {
        &mut self.nodes[v]
    }

    pub fn neighbors(&self, v: usize) -> &[usize] {
        &self.nodes[v].neighbors
    }

    /// Neighbors plus `v` itself -- the successor set used by every
    /// time-expanded search in the solver family (staying is always legal).
    pub fn neighbors_with_stay(&self, v: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes[v].neighbors.len() + 1);
        out.extend_from_slice(&self.nodes[v].neighbors);
        out.push(v);
        out
    }

    pub fn pickups(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.pickup).map(|n| n.id).collect()
    }

    pub fn deliveries(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.delivery).map(|n| n.id).collect()
    }

    pub fn endpoints(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.endpoint).map(|n| n.id).collect()
    }

    pub fn stations(&self, station: usize) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.station == Some(station))
            .map(|n| n.id)
            .collect()
    }

    fn manhattan(&self, u: usize, v: usize) -> usize {
        match (self.nodes[u].pos, self.nodes[v].pos) {
            (Some((ux, uy)), Some((vx, vy))) => {
                ux.abs_diff(vx) + uy.abs_diff(vy)
            }
            _ => 0,
        }
    }

    /// One shortest path from `u` to `v`, inclusive of both endpoints,
    /// memoized under the ordered key `(u, v)`. Plain A* over unit edges; on
    /// a directed graph this must not be assumed symmetric with `(v, u)`.
    pub fn path(&self, u: usize, v: usize) -> Path {
        if let Some(dense) = &self.oracle.borrow().dense {
            // Dense table only stores distances; still need an explicit
            // path so fall through to cache/search, but we can skip the
            // search entirely when u == v.
            let _ = dense;
        }
        if let Some(p) = self.oracle.borrow().path_cache.get(&(u, v)) {
            return p.clone();
        }
        let path = self.a_star_path(u, v);
        self.oracle
            .borrow_mut()
            .path_cache
            .insert((u, v), path.clone());
        path
    }

    /// Hop distance from `u` to `v` (`path(u,v).len() - 1`), served from the
    /// dense table in O(1) once `warshall_floyd` has run.
    pub fn dist(&self, u: usize, v: usize) -> usize {
        if let Some(dense) = &self.oracle.borrow().dense {
            return dense[u][v];
        }
        self.path(u, v).len() - 1
    }

    fn a_star_path(&self, start: usize, goal: usize) -> Path {
        if start == goal {
            return vec![start];
        }
        let mut open: BinaryHeap<Reverse<(usize, usize)>> = BinaryHeap::new();
        let mut g_cost: HashMap<usize, usize> = HashMap::new();
        let mut came_from: HashMap<usize, usize> = HashMap::new();

        g_cost.insert(start, 0);
        open.push(Reverse((self.manhattan(start, goal), start)));

        while let Some(Reverse((_, current))) = open.pop() {
            if current == goal {
                let mut path = vec![goal];
                let mut cur = goal;
                while let Some(&prev) = came_from.get(&cur) {
                    path.push(prev);
                    cur = prev;
                }
                path.reverse();
                return path;
            }
            let current_g = g_cost[&current];
            for &next in &self.nodes[current].neighbors {
                let tentative = current_g + 1;
                if tentative < *g_cost.get(&next).unwrap_or(&usize::MAX) {
                    came_from.insert(next, current);
                    g_cost.insert(next, tentative);
                    open.push(Reverse((tentative + self.manhattan(next, goal), next)));
                }
            }
        }

        // Disconnected: the engine never calls this on a goal unreachable
        // from the agent's own component, but solvers must treat an empty
        // path as "no route" rather than panicking.
        Vec::new()
    }

    /// Materializes the all-pairs distance matrix with `n` breadth-first
    /// searches (unit-weight edges make this equivalent to, and cheaper
    /// than, a literal Floyd-Warshall triple loop). Once populated, `dist`
    /// never grows its cache entry for `(u, v)` back down; the table is
    /// fill-once.
    pub fn warshall_floyd(&mut self) {
        let n = self.nodes.len();
        let mut dense = vec![vec![usize::MAX; n]; n];
        for src in 0..n {
            dense[src][src] = 0;
            let mut queue = std::collections::VecDeque::new();
            queue.push_back(src);
            while let Some(u) = queue.pop_front() {
                let du = dense[src][u];
                for &v in &self.nodes[u].neighbors {
                    if dense[src][v] == usize::MAX {
                        dense[src][v] = du + 1;
                        queue.push_back(v);
                    }
                }
            }
        }
        self.oracle.borrow_mut().dense = Some(dense);
    }

    /// Uniform-random node distinct from `v`. When `station_aware` is set
    /// the draw is restricted to nodes carrying a station tag (used by the
    /// `*_STATION` problem variants of spec §6).
    pub fn random_new_goal<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        v: usize,
        station_aware: bool,
    ) -> usize {
        let candidates: Vec<usize> = if station_aware {
            self.nodes
                .iter()
                .filter(|n| n.station.is_some() && n.id != v)
                .map(|n| n.id)
                .collect()
        } else {
            (0..self.nodes.len()).filter(|&id| id != v).collect()
        };
        debug_assert!(!candidates.is_empty(), "graph has no alternative goal for {v}");
        candidates[rng.gen_range(0..candidates.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid3x3() -> Graph {
        // 0 1 2
        // 3 4 5
        // 6 7 8
        let mut edges = Vec::new();
        for r in 0..3 {
            for c in 0..3 {
                let id = r * 3 + c;
                if c + 1 < 3 {
                    edges.push((id, id + 1));
                }
                if r + 1 < 3 {
                    edges.push((id, id + 3));
                }
            }
        }
        Graph::from_edges(9, &edges, false)
    }

    #[test]
    fn path_is_symmetric_length_on_undirected_graph() {
        let g = grid3x3();
        let p_uv = g.path(0, 8);
        let p_vu = g.path(8, 0);
        assert_eq!(p_uv.len(), g.dist(0, 8) + 1);
        assert_eq!(p_uv.len(), p_vu.len());
        assert_eq!(p_uv.first(), Some(&0));
        assert_eq!(p_uv.last(), Some(&8));
    }

    #[test]
    fn warshall_floyd_matches_lazy_dist() {
        let mut g = grid3x3();
        let lazy = g.dist(2, 6);
        g.warshall_floyd();
        assert_eq!(g.dist(2, 6), lazy);
    }

    #[test]
    fn random_new_goal_never_returns_self() {
        let g = grid3x3();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        for _ in 0..20 {
            assert_ne!(g.random_new_goal(&mut rng, 4, false), 4);
        }
    }

    #[test]
    fn neighbors_with_stay_includes_self() {
        let g = grid3x3();
        let c = g.neighbors_with_stay(4);
        assert!(c.contains(&4));
        assert_eq!(c.len(), g.neighbors(4).len() + 1);
    }
}
