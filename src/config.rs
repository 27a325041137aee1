//! Config file + CLI (C10): `key=value` config file (spec §6) merged under
//! CLI-flag precedence into a [`Config`], validated against the
//! solver/problem compatibility rules of spec §7 class 2. Grounded on the
//! reference `config.rs`'s `Cli`/`Config::validate`, retargeted from bare
//! solver-name strings onto [`SolverKind`]/[`ProblemKind`].

use std::collections::HashMap;
use std::fs;

use clap::Parser;

use crate::error::ConfigError;
use crate::problem::ProblemKind;
use crate::solver::SolverKind;

#[derive(Parser, Debug)]
#[command(
    name = "mapf-engine",
    about = "Multi-agent path-finding and task-execution engine.",
    version
)]
pub struct Cli {
    #[arg(short = 'p', long = "config", help = "Path to the key=value config file")]
    pub config_path: String,

    #[arg(long, help = "Override PROBLEM_TYPE")]
    pub problem_type: Option<String>,
    #[arg(long, help = "Override SOLVER_TYPE")]
    pub solver_type: Option<String>,
    #[arg(long, help = "Override field (map file path)")]
    pub field: Option<String>,
    #[arg(long, help = "Override agentnum")]
    pub agentnum: Option<usize>,
    #[arg(long, help = "Override tasknum")]
    pub tasknum: Option<usize>,
    #[arg(long, help = "Override taskfrequency")]
    pub taskfrequency: Option<f64>,
    #[arg(long, help = "Override timesteplimit")]
    pub timesteplimit: Option<usize>,
    #[arg(long, help = "Override seed")]
    pub seed: Option<u64>,
    #[arg(long, help = "Override scenariofile")]
    pub scenariofile: Option<String>,
    #[arg(long, help = "Override WarshallFloyd")]
    pub warshall_floyd: Option<bool>,
    #[arg(long, help = "Override window")]
    pub window: Option<usize>,
    #[arg(long, help = "Override suboptimal")]
    pub suboptimal: Option<f64>,
    #[arg(long, help = "Override softmode")]
    pub softmode: Option<bool>,
    #[arg(long, help = "Override log (result log output path)")]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub problem: ProblemKind,
    pub solver: SolverKind,
    pub map_path: String,
    pub scenario_file: Option<String>,
    pub num_agents: usize,
    pub timestep_limit: usize,
    pub seed: u64,
    pub warshall_floyd: bool,
    pub window: usize,
    /// `(high-level, low-level)` suboptimality bounds, matching the
    /// reference's `(high, low)` convention; the config-file table only
    /// exposes one `suboptimal` key, which this crate reads as the
    /// low-level bound ECBS/iECBS's FOCAL search consumes.
    pub sub_optimal: (Option<f64>, Option<f64>),
    pub soft_mode: bool,
    pub output_path: String,
}

/// Pure parse of already-read config-file text; [`load_config_file`] wraps
/// file reading around it so tests can exercise this hermetically.
pub fn parse_config_file(contents: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();
    for (i, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(ConfigError::MalformedLine {
                line: i + 1,
                raw: line.to_string(),
            });
        };
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

pub fn load_config_file(path: &str) -> Result<HashMap<String, String>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    parse_config_file(&contents)
}

/// CLI flags take precedence over the config file: any `Some` override is
/// stringified and written over the corresponding config-file key.
fn merge_cli_overrides(mut file_map: HashMap<String, String>, cli: &Cli) -> HashMap<String, String> {
    macro_rules! over {
        ($key:literal, $field:expr) => {
            if let Some(v) = &$field {
                file_map.insert($key.to_string(), v.to_string());
            }
        };
    }
    over!("PROBLEM_TYPE", cli.problem_type);
    over!("SOLVER_TYPE", cli.solver_type);
    over!("field", cli.field);
    over!("agentnum", cli.agentnum);
    over!("tasknum", cli.tasknum);
    over!("taskfrequency", cli.taskfrequency);
    over!("timesteplimit", cli.timesteplimit);
    over!("seed", cli.seed);
    over!("scenariofile", cli.scenariofile);
    over!("WarshallFloyd", cli.warshall_floyd);
    over!("window", cli.window);
    over!("suboptimal", cli.suboptimal);
    over!("softmode", cli.softmode);
    over!("log", cli.output_path);
    file_map
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes")
}

fn parse_problem_kind(kind_str: &str, m: &HashMap<String, String>) -> Result<ProblemKind, ConfigError> {
    let get_usize = |key: &'static str| -> Result<usize, ConfigError> {
        let raw = m.get(key).ok_or(ConfigError::MissingKey(key))?;
        raw.parse().map_err(|_| ConfigError::UnknownEnumValue {
            key,
            value: raw.clone(),
        })
    };
    let get_f64 = |key: &'static str| -> Result<f64, ConfigError> {
        let raw = m.get(key).ok_or(ConfigError::MissingKey(key))?;
        raw.parse().map_err(|_| ConfigError::UnknownEnumValue {
            key,
            value: raw.clone(),
        })
    };

    Ok(match kind_str {
        "MAPF" => ProblemKind::Mapf,
        "MAPF_STATION" => ProblemKind::MapfStation,
        "IMAPF" => ProblemKind::Imapf {
            completion_limit: get_usize("tasknum")?,
        },
        "IMAPF_STATION" => ProblemKind::ImapfStation {
            completion_limit: get_usize("tasknum")?,
        },
        "IMAPF_FAIR" => ProblemKind::ImapfFair {
            per_agent_limit: get_usize("tasknum")?,
        },
        "MAPD" => ProblemKind::Mapd {
            spawn_freq: get_f64("taskfrequency")?,
            task_cap: get_usize("tasknum")?,
        },
        other => {
            return Err(ConfigError::UnknownEnumValue {
                key: "PROBLEM_TYPE",
                value: other.to_string(),
            })
        }
    })
}

impl Config {
    pub fn build(cli: &Cli) -> Result<Config, ConfigError> {
        let file_map = load_config_file(&cli.config_path)?;
        let merged = merge_cli_overrides(file_map, cli);
        Config::from_map(&merged)
    }

    /// Builds and validates a `Config` from an already-merged key/value
    /// map. Exposed so tests can drive it with literal maps instead of a
    /// `Cli` + a config file on disk.
    pub fn from_map(m: &HashMap<String, String>) -> Result<Config, ConfigError> {
        let get = |key: &'static str| m.get(key).ok_or(ConfigError::MissingKey(key));

        let problem = parse_problem_kind(get("PROBLEM_TYPE")?, m)?;
        let solver = SolverKind::parse(get("SOLVER_TYPE")?)?;
        let map_path = get("field")?.clone();

        let agent_num: usize = get("agentnum")?.parse().map_err(|_| ConfigError::UnknownEnumValue {
            key: "agentnum",
            value: m["agentnum"].clone(),
        })?;
        let timestep_limit: usize = get("timesteplimit")?.parse().map_err(|_| ConfigError::UnknownEnumValue {
            key: "timesteplimit",
            value: m["timesteplimit"].clone(),
        })?;
        let seed: u64 = m.get("seed").and_then(|s| s.parse().ok()).unwrap_or(0);
        let scenario_file = m.get("scenariofile").cloned();
        let warshall_floyd = m.get("WarshallFloyd").map(|s| parse_bool(s)).unwrap_or(false);
        let window = m.get("window").and_then(|s| s.parse().ok()).unwrap_or(usize::MAX);
        let soft_mode = m.get("softmode").map(|s| parse_bool(s)).unwrap_or(false);
        let output_path = m.get("log").cloned().unwrap_or_else(|| "result.log".to_string());
        let low_level_sub_optimal = m.get("suboptimal").and_then(|s| s.parse().ok());

        let config = Config {
            problem,
            solver,
            map_path,
            scenario_file,
            num_agents: agent_num,
            timestep_limit,
            seed,
            warshall_floyd,
            window,
            sub_optimal: (None, low_level_sub_optimal),
            soft_mode,
            output_path,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.problem, ProblemKind::Mapd { .. }) && !self.solver.supports_mapd() {
            return Err(ConfigError::SolverProblemMismatch {
                solver: self.solver.to_string(),
                problem: "MAPD".to_string(),
                reason: "CBS-family solvers require a single fixed goal per agent known up front, \
                         not an online task stream"
                    .to_string(),
            });
        }
        if self.solver.is_whole_episode() && !matches!(self.problem, ProblemKind::Mapf | ProblemKind::MapfStation) {
            return Err(ConfigError::SolverProblemMismatch {
                solver: self.solver.to_string(),
                problem: format!("{:?}", self.problem),
                reason: "whole-episode solvers plan one fixed episode up front and cannot serve \
                         a recurring goal/task stream"
                    .to_string(),
            });
        }

        let low = self.sub_optimal.1;
        if self.solver.requires_low_level_suboptimal() {
            if low.is_none() {
                return Err(ConfigError::SuboptimalBoundMismatch {
                    solver: self.solver.to_string(),
                    which: "low-level",
                    expected: "present (w >= 1.0)",
                    actual: low,
                });
            }
        } else if low.is_some() {
            return Err(ConfigError::SuboptimalBoundMismatch {
                solver: self.solver.to_string(),
                which: "low-level",
                expected: "absent",
                actual: low,
            });
        }
        if let Some(w) = low {
            if w < 1.0 {
                return Err(ConfigError::SuboptimalBoundMismatch {
                    solver: self.solver.to_string(),
                    which: "low-level",
                    expected: ">= 1.0",
                    actual: Some(w),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapf_map() -> HashMap<String, String> {
        [
            ("PROBLEM_TYPE", "MAPF"),
            ("SOLVER_TYPE", "CBS"),
            ("field", "map_file/test.map"),
            ("agentnum", "4"),
            ("timesteplimit", "200"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn parses_key_value_lines_and_skips_comments_and_blanks() {
        let text = "# comment\nPROBLEM_TYPE=MAPF\n\nSOLVER_TYPE = CBS\n";
        let m = parse_config_file(text).unwrap();
        assert_eq!(m.get("PROBLEM_TYPE"), Some(&"MAPF".to_string()));
        assert_eq!(m.get("SOLVER_TYPE"), Some(&"CBS".to_string()));
    }

    #[test]
    fn rejects_line_without_equals() {
        let err = parse_config_file("PROBLEM_TYPE MAPF\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedLine { line: 1, .. }));
    }

    #[test]
    fn builds_valid_cbs_mapf_config() {
        let cfg = Config::from_map(&mapf_map()).unwrap();
        assert_eq!(cfg.solver, SolverKind::Cbs);
        assert_eq!(cfg.problem, ProblemKind::Mapf);
        assert_eq!(cfg.num_agents, 4);
    }

    #[test]
    fn rejects_missing_required_key() {
        let mut m = mapf_map();
        m.remove("agentnum");
        let err = Config::from_map(&m).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("agentnum")));
    }

    #[test]
    fn rejects_cbs_on_mapd_problem() {
        let mut m = mapf_map();
        m.insert("PROBLEM_TYPE".to_string(), "MAPD".to_string());
        m.insert("tasknum".to_string(), "10".to_string());
        m.insert("taskfrequency".to_string(), "1.0".to_string());
        let err = Config::from_map(&m).unwrap_err();
        assert!(matches!(err, ConfigError::SolverProblemMismatch { .. }));
    }

    #[test]
    fn rejects_ecbs_without_suboptimal_bound() {
        let mut m = mapf_map();
        m.insert("SOLVER_TYPE".to_string(), "ECBS".to_string());
        let err = Config::from_map(&m).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::SuboptimalBoundMismatch { which: "low-level", expected: "present (w >= 1.0)", .. }
        ));
    }

    #[test]
    fn accepts_ecbs_with_suboptimal_bound() {
        let mut m = mapf_map();
        m.insert("SOLVER_TYPE".to_string(), "ECBS".to_string());
        m.insert("suboptimal".to_string(), "1.5".to_string());
        let cfg = Config::from_map(&m).unwrap();
        assert_eq!(cfg.sub_optimal.1, Some(1.5));
    }

    #[test]
    fn cli_overrides_take_precedence_over_file() {
        let cli = Cli {
            config_path: "unused".to_string(),
            problem_type: None,
            solver_type: None,
            field: None,
            agentnum: Some(99),
            tasknum: None,
            taskfrequency: None,
            timesteplimit: None,
            seed: None,
            scenariofile: None,
            warshall_floyd: None,
            window: None,
            suboptimal: None,
            softmode: None,
            output_path: None,
        };
        let merged = merge_cli_overrides(mapf_map(), &cli);
        assert_eq!(merged.get("agentnum"), Some(&"99".to_string()));
    }
}
