//! Scenario loader (C10): parses the tab/whitespace-separated `.scen`
//! format into graph-node-id `(start, goal)` pairs, bucketed for
//! reproducible subsetting, plus a YAML debug round-trip. Grounded on the
//! reference `scenario.rs`'s `load_from_scen`/`generate_agents_by_buckets`/
//! `generate_agents_randomly`/`load_agents_from_yaml`/`write_agents_to_yaml`,
//! generalized from raw `(x, y)` coordinates to graph node ids via
//! [`crate::map::CellIndex`].

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ScenarioError;
use crate::map::CellIndex;

/// One scenario line, reduced to the `(start, goal)` node-id pair the rest
/// of the engine consumes (spec §6: only `sx,sy,gx,gy` are consumed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
    pub start: usize,
    pub goal: usize,
}

pub struct Scenario {
    pub map: String,
    pub map_width: usize,
    pub map_height: usize,
    buckets: HashMap<usize, Vec<Route>>,
}

/// Pure parse of already-read `.scen` text, taking `path` only for error
/// messages. [`Scenario::load_from_scen`] is the thin file-reading wrapper
/// around this; tests call this directly with in-memory literals to stay
/// hermetic.
pub fn parse_scen(path: &str, contents: &str, index: &CellIndex) -> Result<Scenario, ScenarioError> {
    let mut lines = contents.lines();

    let header = lines.next().ok_or_else(|| ScenarioError::Malformed {
        path: path.to_string(),
        line: 1,
        reason: "missing version header".to_string(),
    })?;
    if !header.trim_start().starts_with("version") {
        return Err(ScenarioError::Malformed {
            path: path.to_string(),
            line: 1,
            reason: format!("expected a `version` header, got {header:?}"),
        });
    }

    let mut scenario = Scenario {
        map: String::new(),
        map_width: 0,
        map_height: 0,
        buckets: HashMap::new(),
    };

    for (offset, line) in lines.enumerate() {
        let line_no = offset + 2;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 9 {
            return Err(ScenarioError::Malformed {
                path: path.to_string(),
                line: line_no,
                reason: format!("expected 9 fields (idx,map,w,h,sx,sy,gx,gy,opt), got {}", parts.len()),
            });
        }
        let field = |i: usize| -> Result<usize, ScenarioError> {
            parts[i].parse().map_err(|_| ScenarioError::Malformed {
                path: path.to_string(),
                line: line_no,
                reason: format!("field {i} ({:?}) is not an integer", parts[i]),
            })
        };
        let bucket_index = field(0)?;
        let (sx, sy, gx, gy) = (field(4)?, field(5)?, field(6)?, field(7)?);

        if scenario.map.is_empty() {
            scenario.map = parts[1].to_string();
            scenario.map_width = field(2)?;
            scenario.map_height = field(3)?;
        }

        let start = index.node_at(sx, sy).ok_or_else(|| ScenarioError::Malformed {
            path: path.to_string(),
            line: line_no,
            reason: format!("start ({sx},{sy}) is not a passable map cell"),
        })?;
        let goal = index.node_at(gx, gy).ok_or_else(|| ScenarioError::Malformed {
            path: path.to_string(),
            line: line_no,
            reason: format!("goal ({gx},{gy}) is not a passable map cell"),
        })?;

        scenario.buckets.entry(bucket_index).or_default().push(Route { start, goal });
    }

    Ok(scenario)
}

impl Scenario {
    pub fn load_from_scen(path: &str, index: &CellIndex) -> Result<Scenario, ScenarioError> {
        let contents = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_string(),
            source,
        })?;
        parse_scen(path, &contents, index)
    }

    /// Draws one route per requested bucket, without reuse within a bucket.
    pub fn generate_agents_by_buckets<R: Rng + ?Sized>(
        &self,
        agent_buckets: &[usize],
        rng: &mut R,
    ) -> Result<Vec<Route>, ScenarioError> {
        let mut routes = Vec::with_capacity(agent_buckets.len());
        let mut used: HashMap<usize, HashSet<usize>> = HashMap::new();

        for &bucket_index in agent_buckets {
            let bucket = self
                .buckets
                .get(&bucket_index)
                .ok_or(ScenarioError::BucketNotFound(bucket_index))?;

            let available: Vec<usize> = (0..bucket.len())
                .filter(|idx| used.get(&bucket_index).is_none_or(|u| !u.contains(idx)))
                .collect();
            if available.is_empty() {
                return Err(ScenarioError::NotEnoughRoutes {
                    requested: agent_buckets.len(),
                    available: routes.len(),
                });
            }

            let &route_index = available.choose(rng).expect("available is non-empty");
            routes.push(bucket[route_index]);
            used.entry(bucket_index).or_default().insert(route_index);
        }

        info!(count = routes.len(), "generated agents from scenario buckets");
        Ok(routes)
    }

    /// Draws `num_agents` distinct routes uniformly at random across all
    /// buckets.
    pub fn generate_agents_randomly<R: Rng + ?Sized>(
        &self,
        num_agents: usize,
        rng: &mut R,
    ) -> Result<Vec<Route>, ScenarioError> {
        let mut available: Vec<Route> = self.buckets.values().flatten().copied().collect();
        if available.len() < num_agents {
            return Err(ScenarioError::NotEnoughRoutes {
                requested: num_agents,
                available: available.len(),
            });
        }
        available.sort();
        available.shuffle(rng);
        available.truncate(num_agents);

        info!(count = available.len(), "generated agents randomly from scenario");
        Ok(available)
    }

    pub fn load_agents_from_yaml(path: &str) -> Result<Vec<Route>, ScenarioError> {
        let file = File::open(path).map_err(|source| ScenarioError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_reader(file).map_err(|e| ScenarioError::Malformed {
            path: path.to_string(),
            line: 0,
            reason: e.to_string(),
        })
    }

    pub fn write_agents_to_yaml(path: &str, routes: &[Route]) -> Result<(), ScenarioError> {
        let file = File::create(path).map_err(|source| ScenarioError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::to_writer(file, routes).map_err(|e| ScenarioError::Malformed {
            path: path.to_string(),
            line: 0,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::parse_map;
    use rand::rngs::StdRng;

    const GRID5X5: &str = "height 5\nwidth 5\nmap\n.....\n.....\n.....\n.....\n.....\n";

    #[test]
    fn loads_buckets_and_resolves_node_ids() {
        let (_, index) = parse_map("test", GRID5X5).unwrap();
        let scen = "version 1\n0\tgrid\t5\t5\t0\t0\t4\t4\t8\n1\tgrid\t5\t5\t1\t0\t3\t4\t6\n";
        let scenario = parse_scen("test", scen, &index).unwrap();
        assert_eq!(scenario.map, "grid");

        let mut rng = StdRng::seed_from_u64(0);
        let routes = scenario.generate_agents_by_buckets(&[0, 1], &mut rng).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].start, index.node_at(0, 0).unwrap());
        assert_eq!(routes[0].goal, index.node_at(4, 4).unwrap());
        assert_eq!(routes[1].start, index.node_at(1, 0).unwrap());
        assert_eq!(routes[1].goal, index.node_at(3, 4).unwrap());
    }

    #[test]
    fn bucket_not_found_is_a_typed_error() {
        let (_, index) = parse_map("test", GRID5X5).unwrap();
        let scenario = parse_scen("test", "version 1\n0\tgrid\t5\t5\t0\t0\t4\t4\t8\n", &index).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = scenario.generate_agents_by_buckets(&[7], &mut rng).unwrap_err();
        assert!(matches!(err, ScenarioError::BucketNotFound(7)));
    }

    #[test]
    fn random_generation_rejects_when_not_enough_routes() {
        let (_, index) = parse_map("test", GRID5X5).unwrap();
        let scenario = parse_scen("test", "version 1\n0\tgrid\t5\t5\t0\t0\t4\t4\t8\n", &index).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = scenario.generate_agents_randomly(5, &mut rng).unwrap_err();
        assert!(matches!(err, ScenarioError::NotEnoughRoutes { requested: 5, available: 1 }));
    }

    #[test]
    fn malformed_line_rejects_non_version_header() {
        let (_, index) = parse_map("test", GRID5X5).unwrap();
        let err = parse_scen("test", "0\tgrid\t5\t5\t0\t0\t4\t4\t8\n", &index).unwrap_err();
        assert!(matches!(err, ScenarioError::Malformed { line: 1, .. }));
    }

    #[test]
    fn yaml_round_trips_routes() {
        let routes = vec![Route { start: 0, goal: 4 }, Route { start: 1, goal: 3 }];
        let path = std::env::temp_dir()
            .join(format!("mapf-engine-routes-test-{}.yaml", std::process::id()))
            .to_string_lossy()
            .into_owned();
        Scenario::write_agents_to_yaml(&path, &routes).unwrap();
        let loaded = Scenario::load_agents_from_yaml(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, routes);
    }
}
