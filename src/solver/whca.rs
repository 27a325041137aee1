//! WHCA*/HCA* (C5): prioritized cooperative A* over a shared reservation
//! table. Grounded on the reference's time-expanded A* (`algorithm/astar.rs`)
//! generalized per spec §4.6; HCA is implemented literally as WHCA with
//! `window = usize::MAX` (§9 decision).

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::algorithm::{align, at, max_len, time_expanded_astar};
use crate::graph::{Graph, Path};
use crate::problem::{Problem, Solver};

/// `(node, time) -> agent` reservations, plus a "parked here forever after
/// t_reach" record per agent that has already reached its goal -- later
/// agents must not route through it (spec §4.6).
#[derive(Default)]
struct Reservation {
    occupied: HashMap<(usize, usize), usize>,
    parked_from: HashMap<usize, (usize, usize)>, // node -> (agent, t_reach)
}

impl Reservation {
    fn blocked_for(&self, agent: usize) -> impl Fn(usize, usize, usize) -> bool + '_ {
        move |from, to, time| {
            if let Some(&owner) = self.occupied.get(&(to, time)) {
                if owner != agent {
                    return true;
                }
            }
            // Edge-swap: someone else is moving to `from` at `time` while
            // coming out of `to` at `time - 1`.
            if time > 0 {
                if let Some(&owner) = self.occupied.get(&(from, time)) {
                    if owner != agent {
                        if let Some(&prev_owner) = self.occupied.get(&(to, time - 1)) {
                            if prev_owner == owner {
                                return true;
                            }
                        }
                    }
                }
            }
            if let Some(&(owner, t_reach)) = self.parked_from.get(&to) {
                if owner != agent && time >= t_reach {
                    return true;
                }
            }
            false
        }
    }

    fn commit(&mut self, agent: usize, path: &Path, reached_goal: bool) {
        for (t, &node) in path.iter().enumerate() {
            self.occupied.insert((node, t), agent);
        }
        if reached_goal {
            if let Some(&goal) = path.last() {
                self.parked_from.insert(goal, (agent, path.len() - 1));
            }
        }
    }
}

pub struct WhcaSolver {
    window: usize,
    goals: Vec<usize>,
}

impl WhcaSolver {
    pub fn new(window: usize, goals: Vec<usize>) -> Self {
        WhcaSolver { window, goals }
    }

    pub fn hca(goals: Vec<usize>) -> Self {
        WhcaSolver {
            window: usize::MAX,
            goals,
        }
    }

    /// Plans (or replans) every agent's committed path for the upcoming
    /// window, given their current positions, and returns the bundle.
    pub fn plan_window(&self, graph: &Graph, starts: &[usize]) -> Vec<Path> {
        let mut reservation = Reservation::default();
        let mut paths = Vec::with_capacity(starts.len());

        for (agent, (&start, &goal)) in starts.iter().zip(self.goals.iter()).enumerate() {
            let unconstrained = graph.path(start, goal);
            let mut candidate = unconstrained.clone();
            if self.window != usize::MAX && candidate.len() > self.window + 1 {
                candidate.truncate(self.window + 1);
            }
            let reaches_goal = candidate.last() == Some(&goal);

            let free_of_conflicts = (0..candidate.len()).all(|t| {
                !reservation.blocked_for(agent)(
                    *candidate.get(t.saturating_sub(1)).unwrap_or(&start),
                    candidate[t],
                    t,
                )
            });

            if free_of_conflicts {
                debug!(agent, "WHCA fast path accepted");
                reservation.commit(agent, &candidate, reaches_goal);
                paths.push(candidate);
                continue;
            }

            let blocked = reservation.blocked_for(agent);
            // WHCA termination: accept once g >= window (truncated plan);
            // HCA (window == MAX) only ever accepts at the goal itself. Both
            // fall out of the same horizon-capped search: past the horizon
            // the shared search demotes to "only the goal matters".
            let outcome = time_expanded_astar(graph, start, goal, 0, self.window, blocked);

            let (mut path, _) = outcome.unwrap_or_else(|| (vec![start], 0));
            if self.window != usize::MAX && path.len() > self.window + 1 {
                path.truncate(self.window + 1);
            }
            let reaches_goal = path.last() == Some(&goal);
            reservation.commit(agent, &path, reaches_goal);
            paths.push(path);
        }

        align(&mut paths);
        paths
    }
}

impl Solver for WhcaSolver {
    fn plan_one_step(&mut self, problem: &mut Problem) -> Vec<usize> {
        let starts: Vec<usize> = problem.agents.iter().map(|a| a.node()).collect();
        let plan = self.plan_window(&problem.graph, &starts);
        plan.iter().map(|p| at(p, 1)).collect()
    }

    fn log_repr(&self) -> &'static str {
        if self.window == usize::MAX {
            "HCA"
        } else {
            "WHCA"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn line5() -> Graph {
        Graph::from_edges(5, &[(0, 1), (1, 2), (2, 3), (3, 4)], false)
    }

    #[test]
    fn hca_single_agent_takes_shortest_path() {
        let g = line5();
        let solver = WhcaSolver::hca(vec![4]);
        let paths = solver.plan_window(&g, &[0]);
        assert_eq!(paths[0].first(), Some(&0));
        assert_eq!(paths[0].last(), Some(&4));
    }

    #[test]
    fn hca_two_agents_avoid_head_on_collision() {
        let g = line5();
        let solver = WhcaSolver::hca(vec![4, 0]);
        let paths = solver.plan_window(&g, &[0, 4]);
        let len = max_len(&paths);
        for t in 1..len {
            assert_ne!(at(&paths[0], t), at(&paths[1], t), "vertex conflict at t={t}");
            assert!(
                !(at(&paths[0], t - 1) == at(&paths[1], t) && at(&paths[1], t - 1) == at(&paths[0], t)),
                "edge swap at t={t}"
            );
        }
    }

    #[test]
    fn window_one_whca_behaves_greedily() {
        let g = line5();
        let solver = WhcaSolver::new(1, vec![4]);
        let paths = solver.plan_window(&g, &[0]);
        assert_eq!(paths[0][0], 0);
        assert_eq!(paths[0][1], 1);
    }
}
