//! Problem driver (C3): owns the Graph and Agent/Task state and runs the
//! per-tick simulation loop shared by MAPF, IMAPF, and MAPD. Grounded on the
//! reference workspace's `main.rs` drive loop, generalized from "run one
//! fixed episode" to the three problem kinds named in spec §4.3.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, instrument};

use crate::agent::Agent;
use crate::graph::Graph;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    Mapf,
    Imapf { completion_limit: usize },
    ImapfFair { per_agent_limit: usize },
    Mapd { spawn_freq: f64, task_cap: usize },
    MapfStation,
    ImapfStation { completion_limit: usize },
}

impl ProblemKind {
    fn is_station_variant(&self) -> bool {
        matches!(self, ProblemKind::MapfStation | ProblemKind::ImapfStation { .. })
    }
}

/// Anything that can decide, for the current tick, the next node each agent
/// should move to. CBS-family solvers compute the whole episode up front on
/// their first call and simply replay it; PIBT/WHCA/TP recompute (part of)
/// the plan every tick. Either shape fits this single method.
pub trait Solver {
    fn plan_one_step(&mut self, problem: &mut Problem) -> Vec<usize>;
    fn log_repr(&self) -> &'static str;
}

pub struct Problem {
    pub graph: Graph,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub kind: ProblemKind,
    pub timestep: usize,
    pub timestep_limit: usize,
    completed_count: usize,
    per_agent_completed: Vec<usize>,
    spawned_count: usize,
    next_task_id: usize,
    rng: StdRng,
    auto_assignment: bool,
}

impl Problem {
    pub fn new(
        graph: Graph,
        agents: Vec<Agent>,
        kind: ProblemKind,
        timestep_limit: usize,
        seed: u64,
        auto_assignment: bool,
    ) -> Self {
        let n = agents.len();
        Problem {
            graph,
            agents,
            tasks: Vec::new(),
            kind,
            timestep: 0,
            timestep_limit,
            completed_count: 0,
            per_agent_completed: vec![0; n],
            spawned_count: 0,
            next_task_id: 0,
            rng: StdRng::seed_from_u64(seed),
            auto_assignment,
        }
    }

    /// Wires up a fixed-goal MAPF/IMAPF-station episode: one task per agent
    /// from `goals[i]`, assigned immediately.
    pub fn seed_initial_tasks(&mut self, goals: &[usize]) {
        assert_eq!(goals.len(), self.agents.len());
        for (i, &goal) in goals.iter().enumerate() {
            let task_id = self.next_task_id;
            self.next_task_id += 1;
            self.tasks.push(Task::mapf(task_id, goal, self.timestep));
            self.agents[i].set_task(task_id, goal);
        }
    }

    pub fn is_solved(&self) -> bool {
        match self.kind {
            ProblemKind::Mapf | ProblemKind::MapfStation => {
                self.agents.iter().all(|a| a.is_at_goal())
            }
            ProblemKind::Imapf { completion_limit }
            | ProblemKind::ImapfStation { completion_limit } => self.completed_count >= completion_limit,
            ProblemKind::ImapfFair { per_agent_limit } => {
                self.per_agent_completed.iter().all(|&c| c >= per_agent_limit)
            }
            ProblemKind::Mapd { task_cap, .. } => {
                self.spawned_count >= task_cap
                    && self.tasks.iter().all(|t| !t.is_open())
                    && self.agents.iter().all(|a| !a.has_task())
            }
        }
    }

    /// Runs the full tick loop (spec §4.3) until solved or the timestep
    /// limit is hit, driving `solver` each iteration. Returns whether the
    /// problem reached a solved state.
    #[instrument(skip_all, fields(kind = ?self.kind, agents = self.agents.len()))]
    pub fn run(&mut self, solver: &mut dyn Solver) -> bool {
        while !self.is_solved() && self.timestep < self.timestep_limit {
            let next_nodes = solver.plan_one_step(self);
            self.apply(&next_nodes);
            self.update();
        }
        let solved = self.is_solved();
        info!(solved, timestep = self.timestep, "problem run finished");
        solved
    }

    fn apply(&mut self, next_nodes: &[usize]) {
        assert_eq!(next_nodes.len(), self.agents.len());
        for i in 0..self.agents.len() {
            let to = next_nodes[i];
            let neighbors: Vec<usize> = self.graph.neighbors(self.agents[i].node()).to_vec();
            self.agents[i].set_node(to, &neighbors);
        }
    }

    /// The post-move bookkeeping half of the tick (spec §4.3's
    /// `problem.update()`): advance tasks, close completions, spawn new
    /// MAPD tasks, auto-assign, and append history.
    fn update(&mut self) {
        self.timestep += 1;

        for i in 0..self.agents.len() {
            let node = self.agents[i].node();
            if let Some(task_id) = self.agents[i].task() {
                let task = &mut self.tasks[task_id];
                task.advance(node);
                if task.completed() {
                    task.close(self.timestep);
                    self.completed_count += 1;
                    self.per_agent_completed[i] += 1;
                    self.agents[i].release_task();
                    debug!(agent = i, task_id, "task completed");
                } else if let Some(next_subgoal) = task.current_subgoal() {
                    self.agents[i].set_next_subgoal(next_subgoal);
                }
            }
        }

        match self.kind {
            ProblemKind::Imapf { .. } | ProblemKind::ImapfFair { .. } | ProblemKind::ImapfStation { .. } => {
                let station_aware = self.kind.is_station_variant();
                for i in 0..self.agents.len() {
                    if !self.agents[i].has_task() {
                        let v = self.agents[i].node();
                        let goal = self.graph.random_new_goal(&mut self.rng, v, station_aware);
                        let task_id = self.next_task_id;
                        self.next_task_id += 1;
                        self.tasks.push(Task::mapf(task_id, goal, self.timestep));
                        self.agents[i].set_task(task_id, goal);
                    }
                }
            }
            ProblemKind::Mapd { spawn_freq, task_cap } => {
                self.spawn_mapd_tasks(spawn_freq, task_cap);
                if self.auto_assignment {
                    self.auto_assign_mapd();
                }
            }
            ProblemKind::Mapf | ProblemKind::MapfStation => {}
        }

        for agent in &mut self.agents {
            agent.update_history();
            agent.clear_updated_flag();
        }
    }

    /// MAPD spawn rule (spec §4.3): `f >= 1` spawns `floor(f)` tasks every
    /// tick; `f < 1` spawns one task every `ceil(1/f)` ticks. Stops once
    /// `task_cap` tasks have ever been spawned.
    fn spawn_mapd_tasks(&mut self, freq: f64, task_cap: usize) {
        if self.spawned_count >= task_cap {
            return;
        }
        let due = if freq >= 1.0 {
            freq.floor() as usize
        } else {
            let period = (1.0 / freq).ceil() as usize;
            if period == 0 || self.timestep % period == 0 {
                1
            } else {
                0
            }
        };
        let pickups = self.graph.pickups();
        let deliveries = self.graph.deliveries();
        if pickups.is_empty() || deliveries.is_empty() {
            return;
        }
        for _ in 0..due {
            if self.spawned_count >= task_cap {
                break;
            }
            use rand::Rng;
            let pickup = pickups[self.rng.gen_range(0..pickups.len())];
            let delivery = deliveries[self.rng.gen_range(0..deliveries.len())];
            let task_id = self.next_task_id;
            self.next_task_id += 1;
            self.tasks
                .push(Task::pickup_delivery(task_id, pickup, delivery, self.timestep));
            self.spawned_count += 1;
        }
    }

    /// Greedily assigns open tasks to agents already standing on the task's
    /// pickup node (spec §4.3's `auto_assignment`).
    fn auto_assign_mapd(&mut self) {
        for i in 0..self.agents.len() {
            if self.agents[i].has_task() {
                continue;
            }
            let node = self.agents[i].node();
            if let Some(task_idx) = self.tasks.iter().position(|t| {
                t.is_open() && t.progress() == 0 && t.current_subgoal() == Some(node)
            }) {
                let task = &mut self.tasks[task_idx];
                let goal = task.current_subgoal().expect("open task has a current subgoal");
                self.agents[i].set_task(task.id, goal);
            }
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

    struct GreedySolver;
    impl Solver for GreedySolver {
        fn plan_one_step(&mut self, problem: &mut Problem) -> Vec<usize> {
            problem
                .agents
                .iter()
                .map(|a| match a.goal() {
                    Some(g) if g != a.node() => {
                        let path = problem.graph.path(a.node(), g);
                        path.get(1).copied().unwrap_or(a.node())
                    }
                    _ => a.node(),
                })
                .collect()
        }
        fn log_repr(&self) -> &'static str {
            "greedy"
        }
    }

    #[test]
    fn mapf_solves_when_agent_already_at_goal() {
        let g = line5();
        let agents = vec![Agent::new(0, 2)];
        let mut problem = Problem::new(g, agents, ProblemKind::Mapf, 10, 0, false);
        problem.seed_initial_tasks(&[2]);
        let mut solver = GreedySolver;
        assert!(problem.run(&mut solver));
        assert_eq!(problem.timestep, 0);
    }

    #[test]
    fn mapf_single_agent_reaches_goal_along_shortest_path() {
        let g = line5();
        let agents = vec![Agent::new(0, 0)];
        let mut problem = Problem::new(g, agents, ProblemKind::Mapf, 10, 0, false);
        problem.seed_initial_tasks(&[4]);
        let mut solver = GreedySolver;
        assert!(problem.run(&mut solver));
        assert_eq!(problem.agents[0].node(), 4);
        assert_eq!(problem.timestep, 4);
    }

    #[test]
    fn timestep_limit_halts_an_unsolvable_run() {
        let g = line5();
        let agents = vec![Agent::new(0, 0)];
        let mut problem = Problem::new(g, agents, ProblemKind::Mapf, 2, 0, false);
        problem.seed_initial_tasks(&[4]);
        let mut solver = GreedySolver;
        assert!(!problem.run(&mut solver));
        assert_eq!(problem.timestep, 2);
    }
}
