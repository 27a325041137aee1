//! Solver base (C4): time-expanded A* over `(node, time)` state, shared by
//! every solver in the CBS family and reused (with a different blocking
//! predicate) by WHCA*/HCA* and TP. Grounded in the reference
//! `algorithm.rs` / `algorithm/astar.rs` / `algorithm/astarfocal.rs`, but
//! generalized: instead of one copy of A* per consumer (constraint set for
//! CBS, reservation table for WHCA, committed-path obstacles for TP), the
//! search takes a `Blocked` closure so the traversal logic -- open list,
//! goal acceptance, MDD construction -- is written once.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{instrument, trace};

use crate::graph::{Graph, Path};

/// A single conflict-tree constraint (spec §3 `Conflict`, lifted one level
/// to "the constraint a CT-node imposes on one agent"). `Vertex` forbids
/// occupying `node` at `time` (or forever after, if `permanent`, used by
/// target-conflict reasoning in CBS); `Edge` forbids the `from -> to`
/// transition arriving at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constraint {
    Vertex {
        node: usize,
        time: usize,
        permanent: bool,
    },
    Edge {
        from: usize,
        to: usize,
        time: usize,
    },
}

impl Constraint {
    pub fn forbids(&self, from: usize, to: usize, time: usize) -> bool {
        match *self {
            Constraint::Vertex {
                node,
                time: c_time,
                permanent,
            } => node == to && if permanent { time >= c_time } else { time == c_time },
            Constraint::Edge {
                from: c_from,
                to: c_to,
                time: c_time,
            } => c_from == from && c_to == to && c_time == time,
        }
    }

    /// The time step this constraint last matters at; used to bound how
    /// long the "demote to plain 2-D A*" shortcut in the low-level search
    /// must wait before engaging (spec §4.4).
    pub fn horizon(&self) -> usize {
        match *self {
            Constraint::Vertex { time, .. } => time,
            Constraint::Edge { time, .. } => time,
        }
    }
}

pub fn horizon_of<'a>(constraints: impl IntoIterator<Item = &'a Constraint>) -> usize {
    constraints.into_iter().map(Constraint::horizon).max().unwrap_or(0)
}

/// A found path together with its optimal cost (`f_min`), used by
/// ECBS/iECBS to compute the bounded-suboptimality window.
pub type SearchOutcome = Option<(Path, usize)>;

/// Multi-valued Decision Diagram: for each time layer, the set of nodes an
/// optimal path could be at. Used by CBS's cardinal-conflict reasoning
/// (spec §4.5, `is_singleton_at_position`).
pub type Mdd = Vec<HashSet<usize>>;

pub fn is_singleton_at_position(mdd: &Mdd, layer: usize, node: usize) -> bool {
    mdd.get(layer).is_some_and(|l| l.len() == 1 && l.contains(&node))
}

/// Repeats each path's last node until every path has the same length
/// (spec §4.4 `align`). Idempotent: aligning an already-aligned bundle is a
/// no-op, and the per-agent trajectory prefix is untouched.
pub fn align(paths: &mut [Path]) {
    let len = max_len(paths);
    for p in paths.iter_mut() {
        if let Some(&last) = p.last() {
            while p.len() < len {
                p.push(last);
            }
        }
    }
}

pub fn max_len(paths: &[Path]) -> usize {
    paths.iter().map(|p| p.len()).max().unwrap_or(0)
}

/// Node at time `t` along `path`, clamped to the final (parked) position
/// once `t` runs past the path's length -- the padding `align` would apply,
/// computed lazily instead of materializing it.
pub fn at(path: &Path, t: usize) -> usize {
    *path.get(t).unwrap_or_else(|| path.last().expect("path must be non-empty"))
}

/// `h3`: pairwise collision count between two paths aligned to a common
/// length (spec §4.5). Counts both vertex and edge-swap conflicts.
pub fn count_conflicts(p: &Path, q: &Path) -> usize {
    let len = p.len().max(q.len());
    let mut count = 0;
    for t in 1..len {
        let (pp, pc) = (at(p, t - 1), at(p, t));
        let (qp, qc) = (at(q, t - 1), at(q, t));
        if pc == qc {
            count += 1;
        }
        if pp == qc && qp == pc {
            count += 1;
        }
    }
    count
}

/// Total pairwise conflict count across a whole path bundle -- the ECBS
/// high-level FOCAL heuristic.
pub fn total_conflicts(paths: &[Path]) -> usize {
    let mut total = 0;
    for i in 0..paths.len() {
        for j in (i + 1)..paths.len() {
            total += count_conflicts(&paths[i], &paths[j]);
        }
    }
    total
}

#[derive(Debug, Clone)]
struct LowLevelNode {
    position: usize,
    f_open: usize,
    g: usize,
    time: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenKey(usize, Reverse<usize>, usize); // (f_open, -g, position) tie-break: larger g first

impl PartialOrd for OpenKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OpenKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0).then(self.1.cmp(&other.1)).then(self.2.cmp(&other.2))
    }
}

/// Time-expanded A* from `start` to `goal`, constrained by `blocked(from,
/// to, time)`. `path_length_floor` is the earliest time step at which
/// reaching `goal` is accepted (CBS's target-reasoning length constraint);
/// `horizon` is the last time step any constraint cares about, after which
/// the search demotes to a plain 2-D search that only revisits `goal`
/// (spec §4.4's "exceed constraints limit" branch) so it always
/// terminates on a finite graph.
#[instrument(skip_all, level = "debug")]
pub fn time_expanded_astar(
    graph: &Graph,
    start: usize,
    goal: usize,
    path_length_floor: usize,
    horizon: usize,
    blocked: impl Fn(usize, usize, usize) -> bool,
) -> SearchOutcome {
    let mut open: BTreeSet<(OpenKey, u64)> = BTreeSet::new();
    let mut nodes: HashMap<u64, LowLevelNode> = HashMap::new();
    let mut closed: HashSet<(usize, usize)> = HashSet::new();
    let mut came_from: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
    let mut next_id = 0u64;

    let h0 = graph.dist(start, goal);
    open.insert((OpenKey(h0, Reverse(0), start), next_id));
    nodes.insert(
        next_id,
        LowLevelNode {
            position: start,
            f_open: h0,
            g: 0,
            time: 0,
        },
    );
    next_id += 1;

    while let Some(&(ref key, id)) = open.iter().next() {
        let key = key.clone();
        open.remove(&(key, id));
        let current = nodes[&id].clone();
        trace!(?current, "expand");

        let past_horizon = current.time > horizon;

        if current.position == goal && current.g >= path_length_floor {
            let mut path = vec![current.position];
            let mut key = (current.position, current.g);
            while let Some(&prev) = came_from.get(&key) {
                path.push(prev.0);
                key = prev;
            }
            path.reverse();
            return Some((path, current.f_open));
        }

        if closed.contains(&(current.position, current.time)) {
            continue;
        }
        closed.insert((current.position, current.time));

        let g_next = current.g + 1;
        let t_next = if past_horizon { current.time } else { current.time + 1 };

        let successors: Vec<usize> = if past_horizon {
            // Demoted to plain search: no blocked() predicate depends on
            // time past `horizon`, so the stay-in-place option is dropped
            // and this degenerates into an ordinary graph search toward
            // `goal` over real adjacency (spec §4.4's "exceed constraints
            // limit" branch) -- never a synthesized edge straight to goal.
            graph.neighbors(current.position).to_vec()
        } else {
            graph.neighbors_with_stay(current.position)
        };

        for next in successors {
            if closed.contains(&(next, t_next)) {
                continue;
            }
            if blocked(current.position, next, g_next) {
                continue;
            }
            let h = graph.dist(next, goal);
            let f_open = g_next + h;
            let okey = OpenKey(f_open, Reverse(g_next), next);
            came_from.insert((next, g_next), (current.position, current.g));
            nodes.insert(
                next_id,
                LowLevelNode {
                    position: next,
                    f_open,
                    g: g_next,
                    time: t_next,
                },
            );
            open.insert((okey, next_id));
            next_id += 1;
        }
    }

    None
}

/// Focal-search variant of [`time_expanded_astar`] for ECBS/iECBS and its
/// low-level bounded-suboptimal search: FOCAL contains every OPEN state
/// with `f_open <= w * f_min`, and the expansion order within FOCAL is by
/// `conflict_cost(prev, node, time)` (ties broken by `(f_open, g)`), per
/// spec §4.5.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, level = "debug")]
pub fn focal_time_expanded_astar(
    graph: &Graph,
    start: usize,
    goal: usize,
    path_length_floor: usize,
    horizon: usize,
    suboptimality: f64,
    blocked: impl Fn(usize, usize, usize) -> bool,
    conflict_cost: impl Fn(usize, usize, usize) -> usize,
) -> SearchOutcome {
    // f_min is not known up front; run the plain search first, matching the
    // reference's "fast path then focal" two-pass structure.
    let (_, f_min) = time_expanded_astar(graph, start, goal, path_length_floor, horizon, &blocked)?;
    let bound = (f_min as f64 * suboptimality).floor() as usize;

    #[derive(Clone)]
    struct FNode {
        position: usize,
        f_open: usize,
        f_focal: usize,
        g: usize,
        time: usize,
    }
    #[derive(PartialEq, Eq, Clone)]
    struct FKey(usize, usize, Reverse<usize>, usize); // (f_focal, f_open, -g, position)
    impl PartialOrd for FKey {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for FKey {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0
                .cmp(&other.0)
                .then(self.1.cmp(&other.1))
                .then(self.2.cmp(&other.2))
                .then(self.3.cmp(&other.3))
        }
    }

    let mut focal: BTreeSet<(FKey, u64)> = BTreeSet::new();
    let mut nodes: HashMap<u64, FNode> = HashMap::new();
    let mut closed: HashSet<(usize, usize)> = HashSet::new();
    let mut came_from: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
    let mut next_id = 0u64;

    let h0 = graph.dist(start, goal);
    focal.insert((FKey(0, h0, Reverse(0), start), next_id));
    nodes.insert(
        next_id,
        FNode {
            position: start,
            f_open: h0,
            f_focal: 0,
            g: 0,
            time: 0,
        },
    );
    next_id += 1;

    while let Some(&(ref key, id)) = focal.iter().next() {
        let key = key.clone();
        focal.remove(&(key, id));
        let current = nodes[&id].clone();
        let past_horizon = current.time > horizon;

        if current.position == goal && current.g >= path_length_floor {
            let mut path = vec![current.position];
            let mut key = (current.position, current.g);
            while let Some(&prev) = came_from.get(&key) {
                path.push(prev.0);
                key = prev;
            }
            path.reverse();
            return Some((path, current.f_open));
        }

        if closed.contains(&(current.position, current.time)) {
            continue;
        }
        closed.insert((current.position, current.time));

        let g_next = current.g + 1;
        let t_next = if past_horizon { current.time } else { current.time + 1 };
        let successors: Vec<usize> = if past_horizon {
            // See the identical branch in `time_expanded_astar`.
            graph.neighbors(current.position).to_vec()
        } else {
            graph.neighbors_with_stay(current.position)
        };

        for next in successors {
            if closed.contains(&(next, t_next)) {
                continue;
            }
            if blocked(current.position, next, g_next) {
                continue;
            }
            let h = graph.dist(next, goal);
            let f_open = g_next + h;
            if f_open > bound {
                continue;
            }
            let f_focal = current.f_focal + conflict_cost(current.position, next, t_next);
            let fkey = FKey(f_focal, f_open, Reverse(g_next), next);
            came_from.insert((next, g_next), (current.position, current.g));
            nodes.insert(
                next_id,
                FNode {
                    position: next,
                    f_open,
                    f_focal,
                    g: g_next,
                    time: t_next,
                },
            );
            focal.insert((fkey, next_id));
            next_id += 1;
        }
    }

    None
}

/// Builds the optimal-cost MDD for a search from `start` to `goal` under
/// `blocked`: the set of nodes reachable at each time layer via *some*
/// optimal path. Needed for CBS's cardinal/semi-cardinal conflict
/// classification.
pub fn construct_mdd(
    graph: &Graph,
    start: usize,
    goal: usize,
    optimal_cost: usize,
    horizon: usize,
    blocked: impl Fn(usize, usize, usize) -> bool,
) -> Mdd {
    // Forward reachable-at-time-t sets pruned by remaining distance, then
    // backward-pruned to only what can still finish in exactly
    // `optimal_cost` steps; the intersection is the MDD layer.
    let mut forward: Vec<HashSet<usize>> = vec![HashSet::from([start])];
    for t in 0..optimal_cost {
        let mut next = HashSet::new();
        for &pos in &forward[t] {
            let past_horizon = t > horizon;
            let succ: Vec<usize> = if past_horizon {
                graph.neighbors(pos).to_vec()
            } else {
                graph.neighbors_with_stay(pos)
            };
            for n in succ {
                if blocked(pos, n, t + 1) {
                    continue;
                }
                if graph.dist(n, goal) <= optimal_cost - t - 1 {
                    next.insert(n);
                }
            }
        }
        forward.push(next);
    }

    let mut backward: Vec<HashSet<usize>> = vec![HashSet::new(); optimal_cost + 1];
    backward[optimal_cost] = HashSet::from([goal]);
    for t in (0..optimal_cost).rev() {
        let mut cur = HashSet::new();
        for &pos in &forward[t] {
            let past_horizon = t > horizon;
            let succ: Vec<usize> = if past_horizon {
                graph.neighbors(pos).to_vec()
            } else {
                graph.neighbors_with_stay(pos)
            };
            if succ.iter().any(|&n| !blocked(pos, n, t + 1) && backward[t + 1].contains(&n)) {
                cur.insert(pos);
            }
        }
        backward[t] = cur;
    }

    forward
        .iter()
        .zip(backward.iter())
        .map(|(f, b)| f.intersection(b).copied().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn line5() -> Graph {
        Graph::from_edges(5, &[(0, 1), (1, 2), (2, 3), (3, 4)], false)
    }

    #[test]
    fn unconstrained_search_finds_shortest_path() {
        let g = line5();
        let (path, cost) = time_expanded_astar(&g, 0, 4, 0, 0, |_, _, _| false).unwrap();
        assert_eq!(path, vec![0, 1, 2, 3, 4]);
        assert_eq!(cost, 4);
    }

    #[test]
    fn vertex_constraint_forces_a_wait() {
        let g = line5();
        // Forbid being at node 2 at time 2: agent must wait one step.
        let c = Constraint::Vertex {
            node: 2,
            time: 2,
            permanent: false,
        };
        let (path, cost) =
            time_expanded_astar(&g, 0, 4, 0, c.horizon(), |from, to, t| c.forbids(from, to, t)).unwrap();
        assert_eq!(cost, 5);
        assert_eq!(path.last(), Some(&4));
    }

    #[test]
    fn count_conflicts_detects_vertex_and_swap() {
        let p = vec![0, 1, 2];
        let q_vertex = vec![2, 1, 2];
        assert_eq!(count_conflicts(&p, &q_vertex), 1); // meet at node 1, time 1
        let q_swap = vec![1, 0, 0];
        assert_eq!(count_conflicts(&p, &q_swap), 1); // swap across edge 0-1 at time 1
    }

    #[test]
    fn align_pads_to_common_length_and_is_idempotent() {
        let mut paths = vec![vec![0, 1, 2], vec![0, 1]];
        align(&mut paths);
        assert_eq!(paths[1], vec![0, 1, 1]);
        let before = paths.clone();
        align(&mut paths);
        assert_eq!(paths, before);
    }

    #[test]
    fn focal_search_respects_suboptimality_bound() {
        let g = line5();
        let (_, cost) = focal_time_expanded_astar(&g, 0, 4, 0, 0, 1.5, |_, _, _| false, |_, _, _| 0).unwrap();
        assert_eq!(cost, 4); // no conflicts to trade off against, so optimal
    }
}
