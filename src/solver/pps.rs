//! PPS (C8): parallel push-and-swap. Grounded on spec §4.8's swap-vertex
//! primitive and the reference's priority-ordered per-tick commit pattern
//! shared with PIBT (`solver/pibt.rs`'s commit/taken bookkeeping). Every
//! agent starts as a pusher; when two pushers deadlock head-on, the
//! lower-priority one detours onto a spare branch of the nearest
//! degree->=3 vertex (spec's "swap vertex"), lets the other pass, then
//! resumes pushing from there -- a push-and-swap in spirit without
//! needing an explicit multi-tick role for the agent that has right of way.

use std::collections::HashMap;

use crate::graph::Graph;
use crate::problem::{Problem, Solver};

#[derive(Debug, Clone, Copy)]
enum Role {
    Pusher,
    /// Detouring onto `park` (a spare neighbor of `vertex`) to let the
    /// higher-priority partner pass. Reverts to `Pusher` once parked; the
    /// ordinary pusher logic then naturally waits for the corridor to
    /// clear before walking back through `vertex` toward its own goal.
    Detour { park: usize },
}

pub struct PpsSolver {
    goals: Vec<usize>,
    roles: Vec<Role>,
}

impl PpsSolver {
    pub fn new(goals: Vec<usize>) -> Self {
        let roles = vec![Role::Pusher; goals.len()];
        PpsSolver { goals, roles }
    }

    fn nearest_swap_vertex(graph: &Graph, from: usize) -> Option<usize> {
        use std::collections::VecDeque;
        let mut seen = vec![false; graph.len()];
        let mut queue = VecDeque::new();
        seen[from] = true;
        queue.push_back(from);
        while let Some(v) = queue.pop_front() {
            if graph.neighbors(v).len() >= 3 {
                return Some(v);
            }
            for &n in graph.neighbors(v) {
                if !seen[n] {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }
        None
    }

    /// A neighbor of `vertex` that lies on neither agent's through-route --
    /// the "spare branch" a detouring agent parks on.
    fn pick_park(graph: &Graph, vertex: usize, through_goals: &[usize]) -> usize {
        let avoid: Vec<usize> = through_goals
            .iter()
            .map(|&goal| Self::step_toward(graph, vertex, goal))
            .collect();
        graph
            .neighbors(vertex)
            .iter()
            .copied()
            .find(|n| !avoid.contains(n))
            .unwrap_or(vertex)
    }

    fn step_toward(graph: &Graph, from: usize, to: usize) -> usize {
        let path = graph.path(from, to);
        path.get(1).copied().unwrap_or(from)
    }

    fn plan_step(&mut self, graph: &Graph, positions: &[usize]) -> Vec<usize> {
        let n = positions.len();

        // An agent that has reached its parking spot resumes pushing
        // immediately, so this tick's decision already sees it as a pusher.
        for i in 0..n {
            if let Role::Detour { park } = self.roles[i] {
                if positions[i] == park {
                    self.roles[i] = Role::Pusher;
                }
            }
        }

        let mut commit: Vec<Option<usize>> = vec![None; n];
        let mut reserved: HashMap<usize, usize> = HashMap::new();

        for i in 0..n {
            if commit[i].is_some() {
                continue;
            }
            match self.roles[i] {
                Role::Detour { park } => {
                    let want = Self::step_toward(graph, positions[i], park);
                    if !reserved.contains_key(&want) {
                        reserved.insert(want, i);
                        commit[i] = Some(want);
                    } else {
                        reserved.insert(positions[i], i);
                        commit[i] = Some(positions[i]);
                    }
                }
                Role::Pusher => {
                    let goal = self.goals[i];
                    if positions[i] == goal {
                        reserved.insert(positions[i], i);
                        commit[i] = Some(positions[i]);
                        continue;
                    }
                    let want = Self::step_toward(graph, positions[i], goal);
                    let blocked_by = positions.iter().position(|&p| p == want).filter(|&j| j != i);
                    let mutual_block = blocked_by.is_some_and(|j| {
                        matches!(self.roles[j], Role::Pusher)
                            && Self::step_toward(graph, positions[j], self.goals[j]) == positions[i]
                    });

                    match blocked_by {
                        None if !reserved.contains_key(&want) => {
                            reserved.insert(want, i);
                            commit[i] = Some(want);
                        }
                        Some(j) if mutual_block && i < j => {
                            // i has priority; j must detour. i waits this
                            // tick since j is still physically in the way.
                            if let Some(vertex) = Self::nearest_swap_vertex(graph, positions[j]) {
                                let park = Self::pick_park(graph, vertex, &[self.goals[i], self.goals[j]]);
                                self.roles[j] = Role::Detour { park };
                            }
                            reserved.insert(positions[i], i);
                            commit[i] = Some(positions[i]);
                        }
                        Some(_) => {
                            // Either `j` already has priority and will
                            // detour on its own turn, or no push is
                            // possible yet; wait one tick.
                            reserved.insert(positions[i], i);
                            commit[i] = Some(positions[i]);
                        }
                        None => {
                            reserved.insert(positions[i], i);
                            commit[i] = Some(positions[i]);
                        }
                    }
                }
            }
        }

        commit.into_iter().enumerate().map(|(i, c)| c.unwrap_or(positions[i])).collect()
    }
}

impl Solver for PpsSolver {
    fn plan_one_step(&mut self, problem: &mut Problem) -> Vec<usize> {
        let positions: Vec<usize> = problem.agents.iter().map(|a| a.node()).collect();
        self.plan_step(&problem.graph, &positions)
    }

    fn log_repr(&self) -> &'static str {
        "PPS"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    /// 0 - 1 - 2(hub, degree 3) - 3, plus 2 - 4 as the spare branch.
    fn t_graph() -> Graph {
        Graph::from_edges(5, &[(0, 1), (1, 2), (2, 3), (2, 4)], false)
    }

    #[test]
    fn single_pusher_reaches_goal() {
        let g = t_graph();
        let mut solver = PpsSolver::new(vec![3]);
        let mut pos = vec![0usize];
        for _ in 0..10 {
            if pos[0] == 3 {
                break;
            }
            pos = solver.plan_step(&g, &pos);
        }
        assert_eq!(pos[0], 3);
    }

    #[test]
    fn head_on_pair_eventually_passes_through_hub() {
        // Agents start on opposite ends of the stem with swapped goals, so
        // they must pass each other through the hub's spare branch.
        let g = t_graph();
        let mut solver = PpsSolver::new(vec![3, 0]);
        let mut pos = vec![0usize, 3usize];
        let mut reached = false;
        for _ in 0..30 {
            let prev = pos.clone();
            pos = solver.plan_step(&g, &pos);
            assert_ne!(pos[0], pos[1], "vertex conflict");
            assert!(!(pos[0] == prev[1] && pos[1] == prev[0]), "edge swap");
            if pos == vec![3, 0] {
                reached = true;
                break;
            }
        }
        assert!(reached, "pair never reached their swapped goals");
    }
}
