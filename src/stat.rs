//! Result log (C11): per-run [`Stats`] counters plus a plain-text
//! `[setting]/[solver]/[problem]/[graph]` report. Grounded on the reference
//! `stat.rs`'s `Stats`/`print`, widened from its single CSV row into the
//! block-structured report of spec §6 and generalized to read `Problem`'s
//! task/agent state directly rather than only a final cost.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::time::Duration;

use tracing::error;

use crate::config::Config;
use crate::problem::Problem;

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub cost: usize,
    pub time: Duration,
    pub low_level_expand_nodes: usize,
    pub high_level_expand_nodes: usize,
    /// Achieved suboptimality ratio for ECBS/iECBS (`cost / lower_bound`);
    /// `None` for solvers that don't track a lower bound.
    pub achieved_suboptimality: Option<f64>,
}

impl Stats {
    pub fn record_high_level_expansion(&mut self) {
        self.high_level_expand_nodes += 1;
    }

    pub fn record_low_level_expansion(&mut self) {
        self.low_level_expand_nodes += 1;
    }
}

pub struct ResultLog;

impl ResultLog {
    /// Pure formatting layer over `Stats`/`Problem`/`Config`: no solver
    /// control flow depends on this.
    pub fn render(config: &Config, problem: &Problem, stats: &Stats, solved: bool) -> String {
        let mut out = String::new();

        out.push_str("[setting]\n");
        out.push_str(&format!("field:{}\n", config.map_path));
        out.push_str(&format!("scenario:{}\n", config.scenario_file.as_deref().unwrap_or("")));
        out.push_str(&format!("agentnum:{}\n", config.num_agents));
        out.push_str(&format!("timesteplimit:{}\n", config.timestep_limit));
        out.push_str(&format!("seed:{}\n", config.seed));

        out.push_str("[solver]\n");
        out.push_str(&format!("name:{}\n", config.solver));
        out.push_str(&format!("suboptimal_high:{:?}\n", config.sub_optimal.0));
        out.push_str(&format!("suboptimal_low:{:?}\n", config.sub_optimal.1));
        out.push_str(&format!("achieved_suboptimality:{:?}\n", stats.achieved_suboptimality));

        out.push_str("[problem]\n");
        out.push_str(&format!("kind:{:?}\n", problem.kind));
        out.push_str(&format!("solved:{solved}\n"));
        out.push_str(&format!("timestep:{}\n", problem.timestep));
        out.push_str(&format!("cost:{}\n", stats.cost));
        out.push_str(&format!("time_ms:{}\n", stats.time.as_millis()));
        out.push_str(&format!("high_level_expand_nodes:{}\n", stats.high_level_expand_nodes));
        out.push_str(&format!("low_level_expand_nodes:{}\n", stats.low_level_expand_nodes));

        out.push_str("[graph]\n");
        out.push_str(&format!("nodes:{}\n", problem.graph.len()));
        out.push_str(&format!("directed:{}\n", problem.graph.is_directed()));

        for (i, agent) in problem.agents.iter().enumerate() {
            out.push_str(&format!("[agent {i}]\n"));
            let path: Vec<String> = agent.history().iter().map(|s| s.v.to_string()).collect();
            out.push_str(&format!("path:{}\n", path.join(",")));
        }

        for task in &problem.tasks {
            out.push_str(&format!("[task {}]\n", task.id));
            out.push_str(&format!("open:{}\n", task.is_open()));
        }

        out
    }

    pub fn append_to_file(path: &str, rendered: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(rendered.as_bytes()));
        if let Err(e) = result {
            error!(path, error = %e, "failed to write result log");
        }
    }

    pub fn write(config: &Config, problem: &Problem, stats: &Stats, solved: bool) {
        let rendered = Self::render(config, problem, stats, solved);
        Self::append_to_file(&config.output_path, &rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::graph::Graph;
    use crate::problem::ProblemKind;
    use crate::solver::SolverKind;

    fn sample_config() -> Config {
        Config {
            problem: ProblemKind::Mapf,
            solver: SolverKind::Cbs,
            map_path: "maps/test.map".to_string(),
            scenario_file: Some("scen/test.scen".to_string()),
            num_agents: 1,
            timestep_limit: 50,
            seed: 7,
            warshall_floyd: false,
            window: usize::MAX,
            sub_optimal: (None, None),
            soft_mode: false,
            output_path: "unused.log".to_string(),
        }
    }

    #[test]
    fn render_includes_all_required_blocks() {
        let graph = Graph::from_edges(2, &[(0, 1)], false);
        let agents = vec![Agent::new(0, 0)];
        let problem = Problem::new(graph, agents, ProblemKind::Mapf, 50, 7, false);
        let stats = Stats {
            cost: 3,
            high_level_expand_nodes: 5,
            low_level_expand_nodes: 12,
            ..Default::default()
        };

        let rendered = ResultLog::render(&sample_config(), &problem, &stats, true);
        for block in ["[setting]", "[solver]", "[problem]", "[graph]", "[agent 0]"] {
            assert!(rendered.contains(block), "missing block {block} in:\n{rendered}");
        }
        assert!(rendered.contains("cost:3"));
        assert!(rendered.contains("name:CBS"));
    }

    #[test]
    fn append_to_file_creates_and_grows_the_log() {
        let path = std::env::temp_dir()
            .join(format!("mapf-engine-resultlog-test-{}.log", std::process::id()))
            .to_string_lossy()
            .into_owned();
        let _ = std::fs::remove_file(&path);

        ResultLog::append_to_file(&path, "first\n");
        ResultLog::append_to_file(&path, "second\n");
        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(contents, "first\nsecond\n");
    }
}
