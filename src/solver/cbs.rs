//! CBS / ECBS / iECBS (C6). One conflict-tree search serves all three: CBS
//! is the plain best-first search, ECBS narrows it to a FOCAL pass over a
//! bounded-suboptimal window, and iECBS layers a highway-weighted tie-break
//! on top of ECBS's FOCAL ordering. Grounded on the reference's
//! `solver/cbs.rs` best-first loop and `common/highlevel.rs`'s `HighLevelOpenNode`,
//! consolidated from the reference's per-variant files (acbs/bcbs/decbs/hbcbs/lbcbs)
//! into one parameterized implementation -- those were thin parameter
//! variations of the same search, not distinct algorithms.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::algorithm::{
    align, construct_mdd, focal_time_expanded_astar, horizon_of, time_expanded_astar, total_conflicts, Constraint,
};
use crate::graph::{Graph, Path};
use crate::problem::{Problem, Solver};

#[derive(Debug, Clone, Copy)]
pub struct Conflict {
    pub agent_a: usize,
    pub agent_b: usize,
    pub time: usize,
    pub vertex: usize,
    pub other_vertex: Option<usize>,
}

/// Per-directed-edge highway weight (spec §4.5/§6's `.highway` overlay): 1
/// for the preferred direction, `w2` against it. Edges absent from the map
/// are implicitly weight 1.
#[derive(Debug, Clone, Default)]
pub struct Highway {
    weights: HashMap<(usize, usize), usize>,
}

impl Highway {
    pub fn new(weights: HashMap<(usize, usize), usize>) -> Self {
        Highway { weights }
    }

    pub fn weight(&self, from: usize, to: usize) -> usize {
        self.weights.get(&(from, to)).copied().unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CbsVariant {
    Cbs,
    Ecbs { suboptimality: f64 },
    IEcbs { suboptimality: f64 },
}

impl CbsVariant {
    fn suboptimality(&self) -> f64 {
        match self {
            CbsVariant::Cbs => 1.0,
            CbsVariant::Ecbs { suboptimality } | CbsVariant::IEcbs { suboptimality } => *suboptimality,
        }
    }
}

fn detect_conflicts(paths: &[Path]) -> Vec<Conflict> {
    use crate::algorithm::at;
    let len = paths.iter().map(|p| p.len()).max().unwrap_or(0);
    let mut conflicts = Vec::new();
    'outer: for t in 1..len {
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                let (pi_prev, pi_cur) = (at(&paths[i], t - 1), at(&paths[i], t));
                let (pj_prev, pj_cur) = (at(&paths[j], t - 1), at(&paths[j], t));
                if pi_cur == pj_cur {
                    conflicts.push(Conflict {
                        agent_a: i,
                        agent_b: j,
                        time: t,
                        vertex: pi_cur,
                        other_vertex: None,
                    });
                    break 'outer;
                }
                if pi_prev == pj_cur && pj_prev == pi_cur {
                    conflicts.push(Conflict {
                        agent_a: i,
                        agent_b: j,
                        time: t,
                        vertex: pi_cur,
                        other_vertex: Some(pj_cur),
                    });
                    break 'outer;
                }
            }
        }
    }
    conflicts
}

#[derive(Clone)]
struct CtNode {
    constraints: Vec<HashSet<Constraint>>,
    paths: Vec<Path>,
    /// Each agent's own path length at the moment its low-level search last
    /// produced it, before `align()` ever padded `paths` to the bundle's max
    /// length. `cost` is always the sum of these, never re-derived from
    /// `paths.len()`, so trailing repeated-goal padding never counts as cost.
    agent_costs: Vec<usize>,
    cost: usize,
    f_mins: Vec<usize>,
    lb: usize,
    conflicts: Vec<Conflict>,
    id: u64,
}

impl PartialEq for CtNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for CtNode {}
impl PartialOrd for CtNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CtNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cost
            .cmp(&other.cost)
            .then(self.conflicts.len().cmp(&other.conflicts.len()))
            .then(self.id.cmp(&other.id))
    }
}

pub struct CbsSolver {
    variant: CbsVariant,
    highway: Highway,
    goals: Vec<usize>,
    plan: Option<Vec<Path>>,
    solve_time: Duration,
    high_level_expansions: usize,
}

impl CbsSolver {
    pub fn new(variant: CbsVariant, goals: Vec<usize>) -> Self {
        CbsSolver {
            variant,
            highway: Highway::default(),
            goals,
            plan: None,
            solve_time: Duration::default(),
            high_level_expansions: 0,
        }
    }

    pub fn with_highway(mut self, highway: Highway) -> Self {
        self.highway = highway;
        self
    }

    pub fn solve_time(&self) -> Duration {
        self.solve_time
    }

    pub fn high_level_expansions(&self) -> usize {
        self.high_level_expansions
    }

    fn low_level(&self, graph: &Graph, agent: usize, start: usize, goal: usize, node: &CtNode) -> Option<(Path, usize)> {
        let constraints = &node.constraints[agent];
        let horizon = horizon_of(constraints);
        let blocked = |from: usize, to: usize, time: usize| constraints.iter().any(|c| c.forbids(from, to, time));

        match self.variant {
            CbsVariant::Cbs => time_expanded_astar(graph, start, goal, 0, horizon, blocked),
            CbsVariant::Ecbs { suboptimality } => {
                let others: Vec<&Path> = node
                    .paths
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != agent)
                    .map(|(_, p)| p)
                    .collect();
                let conflict_cost = |_from: usize, to: usize, time: usize| {
                    others
                        .iter()
                        .filter(|p| crate::algorithm::at(p, time) == to)
                        .count()
                };
                focal_time_expanded_astar(graph, start, goal, 0, horizon, suboptimality, blocked, conflict_cost)
            }
            CbsVariant::IEcbs { suboptimality } => {
                let others: Vec<&Path> = node
                    .paths
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != agent)
                    .map(|(_, p)| p)
                    .collect();
                // Combine conflict count with highway weight: conflicts dominate
                // (bound-preserving), highway breaks ties among equal-conflict
                // states so agents drift toward the preferred flow direction.
                let conflict_cost = |from: usize, to: usize, time: usize| {
                    let conflicts = others
                        .iter()
                        .filter(|p| crate::algorithm::at(p, time) == to)
                        .count();
                    conflicts * 1_000 + self.highway.weight(from, to)
                };
                focal_time_expanded_astar(graph, start, goal, 0, horizon, suboptimality, blocked, conflict_cost)
            }
        }
    }

    fn root(&mut self, graph: &Graph, starts: &[usize]) -> Option<CtNode> {
        let n = starts.len();
        let constraints = vec![HashSet::new(); n];
        let mut paths = Vec::with_capacity(n);
        let mut f_mins = Vec::with_capacity(n);
        let mut agent_costs = Vec::with_capacity(n);
        for i in 0..n {
            let empty = CtNode {
                constraints: constraints.clone(),
                paths: Vec::new(),
                agent_costs: Vec::new(),
                cost: 0,
                f_mins: Vec::new(),
                lb: 0,
                conflicts: Vec::new(),
                id: 0,
            };
            let (path, f_min) = self.low_level(graph, i, starts[i], self.goals[i], &empty)?;
            agent_costs.push(path.len() - 1);
            paths.push(path);
            f_mins.push(f_min);
        }
        // Cost is summed from each agent's own pre-padding path length;
        // `align` below only equalizes `paths` for conflict detection and
        // must never feed back into `cost`.
        let cost: usize = agent_costs.iter().sum();
        align(&mut paths);
        let lb = f_mins.iter().sum();
        let conflicts = detect_conflicts(&paths);
        Some(CtNode {
            constraints,
            paths,
            agent_costs,
            cost,
            f_mins,
            lb,
            conflicts,
            id: 0,
        })
    }

    /// Runs the conflict-tree search for a single independence block
    /// (spec §4.5's ID wrapper calls this per block, then merges).
    fn solve_block(&mut self, graph: &Graph, starts: &[usize], goals: &[usize]) -> Option<Vec<Path>> {
        let saved_goals = std::mem::replace(&mut self.goals, goals.to_vec());
        let result = self.solve_block_inner(graph, starts);
        self.goals = saved_goals;
        result
    }

    fn solve_block_inner(&mut self, graph: &Graph, starts: &[usize]) -> Option<Vec<Path>> {
        let mut next_id = 1u64;
        let root = self.root(graph, starts)?;
        let w = self.variant.suboptimality();

        let mut open: Vec<CtNode> = vec![root];

        loop {
            if open.is_empty() {
                return None;
            }
            // ECBS/iECBS: FOCAL is every OPEN node whose cost is within the
            // suboptimality window of the cheapest lower bound in OPEN;
            // within FOCAL, prefer fewest conflicts (spec §4.5's `h3`).
            // Plain CBS is the degenerate case `w == 1.0`, where FOCAL
            // collapses to "cheapest cost" -- still ties broken by conflicts.
            let lb_min = open.iter().map(|n| n.lb).min().expect("open is non-empty");
            let bound = (w * lb_min as f64).floor() as usize;
            let pick = open
                .iter()
                .enumerate()
                .filter(|(_, n)| n.cost <= bound)
                .min_by_key(|(_, n)| (n.conflicts.len(), n.cost, n.id))
                .map(|(i, _)| i)
                .expect("some node is within the suboptimality bound of lb_min");
            let current = open.remove(pick);
            self.high_level_expansions += 1;

            if current.conflicts.is_empty() {
                return Some(current.paths);
            }

            let conflict = current.conflicts[0];
            debug!(?conflict, node_id = current.id, "expanding CT node");

            for (agent, other, vertex, other_vertex) in [
                (conflict.agent_a, conflict.agent_b, conflict.vertex, conflict.other_vertex),
                (conflict.agent_b, conflict.agent_a, conflict.vertex, conflict.other_vertex),
            ] {
                let mut constraints = current.constraints.clone();
                let new_constraint = match other_vertex {
                    None => {
                        // Target conflict (spec §4.4): if `other` has already
                        // reached its own goal and is parked at `vertex` for
                        // every tick from `other`'s true arrival time onward,
                        // this is not a one-off crossing -- `agent` must be
                        // forbidden from `vertex` forever from `conflict.time`,
                        // not just at that single timestep.
                        let other_parked = current.agent_costs[other] <= conflict.time
                            && current.paths[other].last() == Some(&vertex);
                        Constraint::Vertex {
                            node: vertex,
                            time: conflict.time,
                            permanent: other_parked,
                        }
                    }
                    Some(ov) => Constraint::Edge {
                        from: if agent == conflict.agent_a { ov } else { vertex },
                        to: if agent == conflict.agent_a { vertex } else { ov },
                        time: conflict.time,
                    },
                };
                constraints[agent].insert(new_constraint);

                let mut child = current.clone();
                child.constraints = constraints;
                child.id = next_id;
                next_id += 1;

                if let Some((path, f_min)) =
                    self.low_level(graph, agent, starts[agent], self.goals[agent], &child)
                {
                    child.agent_costs[agent] = path.len() - 1;
                    child.paths[agent] = path;
                    child.f_mins[agent] = f_min;
                    align(&mut child.paths);
                    child.cost = child.agent_costs.iter().sum();
                    child.lb = child.f_mins.iter().sum();
                    child.conflicts = detect_conflicts(&child.paths);
                    open.push(child);
                }
                // else: low-level search failed under the new constraint,
                // this branch is pruned (spec §3's CTNode.valid == false).
                let _ = other;
            }
        }
    }

    /// Full solve with the Independent Detection wrapper (spec §4.5): start
    /// with every agent in its own singleton block, solve independently,
    /// merge colliding blocks, repeat. Strictly decreases block count so it
    /// terminates.
    pub fn solve(&mut self, graph: &Graph, starts: &[usize], goals: &[usize]) -> Option<Vec<Path>> {
        let start_time = Instant::now();
        let n = starts.len();
        let mut blocks: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let mut block_paths: Vec<Vec<Path>> = Vec::new();
        for block in &blocks {
            let block_starts: Vec<usize> = block.iter().map(|&i| starts[i]).collect();
            let block_goals: Vec<usize> = block.iter().map(|&i| goals[i]).collect();
            block_paths.push(self.solve_block(graph, &block_starts, &block_goals)?);
        }

        loop {
            align_across_blocks(&mut block_paths);
            let mut merged = false;
            'search: for bi in 0..blocks.len() {
                for bj in (bi + 1)..blocks.len() {
                    if blocks_collide(&block_paths[bi], &block_paths[bj]) {
                        let mut merged_agents = blocks[bi].clone();
                        merged_agents.extend(blocks[bj].clone());
                        let merged_starts: Vec<usize> = merged_agents.iter().map(|&i| starts[i]).collect();
                        let merged_goals: Vec<usize> = merged_agents.iter().map(|&i| goals[i]).collect();
                        let merged_paths = self.solve_block(graph, &merged_starts, &merged_goals)?;

                        blocks.remove(bj);
                        blocks.remove(bi);
                        blocks.push(merged_agents);
                        block_paths.remove(bj);
                        block_paths.remove(bi);
                        block_paths.push(merged_paths);
                        merged = true;
                        break 'search;
                    }
                }
            }
            if !merged {
                break;
            }
        }

        let mut result = vec![Vec::new(); n];
        for (block, paths) in blocks.iter().zip(block_paths.iter()) {
            for (&agent, path) in block.iter().zip(paths.iter()) {
                result[agent] = path.clone();
            }
        }
        align(&mut result);
        self.solve_time = start_time.elapsed();
        Some(result)
    }
}

fn align_across_blocks(block_paths: &mut [Vec<Path>]) {
    for paths in block_paths.iter_mut() {
        align(paths);
    }
}

fn blocks_collide(a: &[Path], b: &[Path]) -> bool {
    use crate::algorithm::count_conflicts;
    a.iter().any(|pa| b.iter().any(|pb| count_conflicts(pa, pb) > 0))
}

impl Solver for CbsSolver {
    fn plan_one_step(&mut self, problem: &mut Problem) -> Vec<usize> {
        if self.plan.is_none() {
            let starts: Vec<usize> = problem.agents.iter().map(|a| a.node()).collect();
            let goals = self.goals.clone();
            let plan = self
                .solve(&problem.graph, &starts, &goals)
                .unwrap_or_else(|| starts.iter().map(|&s| vec![s]).collect());
            self.plan = Some(plan);
        }
        let t = problem.timestep + 1;
        self.plan
            .as_ref()
            .expect("plan computed above")
            .iter()
            .map(|p| crate::algorithm::at(p, t))
            .collect()
    }

    fn log_repr(&self) -> &'static str {
        match self.variant {
            CbsVariant::Cbs => "CBS",
            CbsVariant::Ecbs { .. } => "ECBS",
            CbsVariant::IEcbs { .. } => "iECBS",
        }
    }
}

/// Builds the root-node MDDs for every agent, used by callers that need
/// cardinal-conflict classification beyond the basic first-conflict search
/// above (kept as a standalone entry point rather than wired into the hot
/// loop, since the concrete CT search here resolves conflicts in detection
/// order rather than by cardinality).
pub fn agent_mdd(graph: &Graph, start: usize, goal: usize, optimal_cost: usize) -> Vec<HashSet<usize>> {
    construct_mdd(graph, start, goal, optimal_cost, 0, |_, _, _| false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn grid3x3() -> Graph {
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
    fn cbs_finds_collision_free_paths_for_two_crossing_agents() {
        let g = grid3x3();
        let mut solver = CbsSolver::new(CbsVariant::Cbs, vec![8, 6]);
        let paths = solver.solve(&g, &[0, 2], &[8, 6]).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(detect_conflicts(&paths).is_empty());
        assert_eq!(paths[0].last(), Some(&8));
        assert_eq!(paths[1].last(), Some(&6));
    }

    #[test]
    fn ecbs_respects_suboptimality_bound_against_cbs_cost() {
        let g = grid3x3();
        let mut cbs = CbsSolver::new(CbsVariant::Cbs, vec![8, 6]);
        let cbs_paths = cbs.solve(&g, &[0, 2], &[8, 6]).unwrap();
        let cbs_cost: usize = cbs_paths.iter().map(|p| p.len() - 1).sum();

        let mut ecbs = CbsSolver::new(CbsVariant::Ecbs { suboptimality: 1.5 }, vec![8, 6]);
        let ecbs_paths = ecbs.solve(&g, &[0, 2], &[8, 6]).unwrap();
        let ecbs_cost: usize = ecbs_paths.iter().map(|p| p.len() - 1).sum();

        assert!(detect_conflicts(&ecbs_paths).is_empty());
        assert!((ecbs_cost as f64) <= 1.5 * cbs_cost as f64);
    }

    #[test]
    fn single_agent_solve_returns_shortest_path() {
        let g = grid3x3();
        let mut solver = CbsSolver::new(CbsVariant::Cbs, vec![8]);
        let paths = solver.solve(&g, &[0], &[8]).unwrap();
        assert_eq!(paths[0].len() - 1, g.dist(0, 8));
    }
}
