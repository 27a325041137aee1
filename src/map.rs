//! Map/graph loader (C10): builds a node-per-passable-cell [`Graph`] from
//! the reference's ASCII grid format, generalized per spec §4.1/§6 so that
//! the rest of the engine only ever sees graph node ids, never raw grid
//! coordinates. Grounded on the reference `map.rs`'s grid scan (header
//! parsing, 4-directional adjacency) and on
//! `original_source/src/graph/pd.cpp`/`station.cpp` for the `.pd`/`.st`
//! overlay formats. `.highway` has no reference implementation in the
//! original source; its direction-code-to-edge-weight mapping here is this
//! crate's own reading of spec §6/§9 (see `DESIGN.md`).

use std::collections::HashMap;
use std::fs;

use crate::error::MapError;
use crate::graph::{Graph, Node};
use crate::solver::cbs::Highway;

/// Against-flow highway weight (spec §4.5's `w2`); the preferred direction
/// always costs 1.
const HIGHWAY_AGAINST_WEIGHT: usize = 2;

/// Maps grid coordinates `(x = column, y = row)` to the graph node id of
/// that cell. Obstacle cells never get a node, so lookups for them return
/// `None` -- overlay loaders treat that as "nothing to annotate here"
/// rather than an error.
pub struct CellIndex {
    width: usize,
    height: usize,
    cell_to_node: HashMap<(usize, usize), usize>,
}

impl CellIndex {
    pub fn node_at(&self, x: usize, y: usize) -> Option<usize> {
        self.cell_to_node.get(&(x, y)).copied()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn in_bounds(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }
}

/// Parses the `height H` / `width W` / `map` header lines shared by the map
/// file and (implicitly, by row/column position) every overlay file.
fn parse_header<'a>(
    path: &str,
    lines: &mut impl Iterator<Item = &'a str>,
) -> Result<(usize, usize), MapError> {
    let height = lines
        .next()
        .and_then(|l| l.split_whitespace().last())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| MapError::Truncated {
            path: path.to_string(),
            expected: "height H",
        })?;
    let width = lines
        .next()
        .and_then(|l| l.split_whitespace().last())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| MapError::Truncated {
            path: path.to_string(),
            expected: "width W",
        })?;
    lines.next().ok_or_else(|| MapError::Truncated {
        path: path.to_string(),
        expected: "map",
    })?;
    Ok((height, width))
}

pub fn parse_map(path: &str, contents: &str) -> Result<(Graph, CellIndex), MapError> {
    let mut lines = contents.lines();
    let (height, width) = parse_header(path, &mut lines)?;

    let rows: Vec<&str> = lines.by_ref().take(height).collect();
    if rows.len() != height {
        return Err(MapError::RowCountMismatch {
            path: path.to_string(),
            declared: height,
            actual: rows.len(),
        });
    }

    let mut cell_to_node = HashMap::new();
    let mut nodes = Vec::new();
    for (y, row) in rows.iter().enumerate() {
        let chars: Vec<char> = row.chars().collect();
        if chars.len() != width {
            return Err(MapError::RowWidthMismatch {
                path: path.to_string(),
                row: y,
                expected: width,
                actual: chars.len(),
            });
        }
        for (x, &ch) in chars.iter().enumerate() {
            match ch {
                '.' => {
                    let id = nodes.len();
                    cell_to_node.insert((x, y), id);
                    nodes.push(Node {
                        id,
                        pos: Some((x, y)),
                        neighbors: Vec::new(),
                        pickup: false,
                        delivery: false,
                        endpoint: false,
                        station: None,
                    });
                }
                '@' | 'T' => {}
                other => return Err(MapError::UnknownTile(other)),
            }
        }
    }

    for y in 0..height {
        for x in 0..width {
            let Some(&id) = cell_to_node.get(&(x, y)) else {
                continue;
            };
            for (dx, dy) in [(1i32, 0i32), (-1, 0), (0, 1), (0, -1)] {
                let (nx, ny) = (x as i32 + dx, y as i32 + dy);
                if nx < 0 || ny < 0 {
                    continue;
                }
                if let Some(&nid) = cell_to_node.get(&(nx as usize, ny as usize)) {
                    nodes[id].neighbors.push(nid);
                }
            }
        }
    }

    let index = CellIndex {
        width,
        height,
        cell_to_node,
    };
    Ok((Graph::new(nodes, false), index))
}

/// Loads the `.map` file into a `Graph` plus the coordinate index the
/// overlay loaders need.
pub fn load_map(path: &str) -> Result<(Graph, CellIndex), MapError> {
    let contents = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_string(),
        source,
    })?;
    parse_map(path, &contents)
}

pub fn parse_pd(path: &str, contents: &str, graph: &mut Graph, index: &CellIndex) -> Result<(), MapError> {
    for (y, row) in contents.lines().enumerate() {
        for (x, ch) in row.chars().enumerate() {
            if ch == '.' {
                continue;
            }
            if !index.in_bounds(x, y) {
                return Err(MapError::AnnotationOutOfBounds {
                    path: path.to_string(),
                    x,
                    y,
                });
            }
            let Some(id) = index.node_at(x, y) else {
                continue;
            };
            // Three distinct match arms, not one shared regex across
            // pickup and delivery (spec §9's resolved Open Question).
            match ch {
                'p' => graph.node_mut(id).pickup = true,
                'd' => graph.node_mut(id).delivery = true,
                'e' => graph.node_mut(id).endpoint = true,
                's' => {
                    graph.node_mut(id).pickup = true;
                    graph.node_mut(id).delivery = true;
                }
                'a' => {
                    graph.node_mut(id).pickup = true;
                    graph.node_mut(id).delivery = true;
                    graph.node_mut(id).endpoint = true;
                }
                other => return Err(MapError::UnknownAnnotation(other)),
            }
        }
    }
    Ok(())
}

/// Overlays `.pd` pickup/delivery/endpoint annotations onto `graph`.
pub fn apply_pd_annotations(graph: &mut Graph, index: &CellIndex, path: &str) -> Result<(), MapError> {
    let contents = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_string(),
        source,
    })?;
    parse_pd(path, &contents, graph, index)
}

pub fn parse_stations(path: &str, contents: &str, graph: &mut Graph, index: &CellIndex) -> Result<(), MapError> {
    for (y, row) in contents.lines().enumerate() {
        for (x, ch) in row.chars().enumerate() {
            if ch == '.' || ch == '@' || ch == 'T' {
                continue;
            }
            let Some(digit) = ch.to_digit(10) else {
                return Err(MapError::UnknownAnnotation(ch));
            };
            if !index.in_bounds(x, y) {
                return Err(MapError::AnnotationOutOfBounds {
                    path: path.to_string(),
                    x,
                    y,
                });
            }
            let Some(id) = index.node_at(x, y) else {
                continue;
            };
            graph.node_mut(id).station = Some(digit as usize);
        }
    }
    Ok(())
}

/// Overlays `.st` station-id annotations (digits `0..9`) onto `graph`.
pub fn apply_station_annotations(graph: &mut Graph, index: &CellIndex, path: &str) -> Result<(), MapError> {
    let contents = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_string(),
        source,
    })?;
    parse_stations(path, &contents, graph, index)
}

/// Preferred `(dx, dy)` deltas for one `.highway` direction code. `r/l/u/d`
/// are single cardinal directions; `x/y/z/w` are this crate's reading of
/// the two-direction "turn" codes spec §6 gestures at without fully
/// specifying (north-east/north-west/south-east/south-west respectively).
fn preferred_deltas(ch: char) -> Result<&'static [(i32, i32)], char> {
    Ok(match ch {
        'r' => &[(1, 0)],
        'l' => &[(-1, 0)],
        'u' => &[(0, -1)],
        'd' => &[(0, 1)],
        'x' => &[(1, 0), (0, -1)],
        'y' => &[(-1, 0), (0, -1)],
        'z' => &[(1, 0), (0, 1)],
        'w' => &[(-1, 0), (0, 1)],
        other => return Err(other),
    })
}

pub fn parse_highway(path: &str, contents: &str, graph: &Graph, index: &CellIndex) -> Result<Highway, MapError> {
    let mut weights = HashMap::new();
    for (y, row) in contents.lines().enumerate() {
        for (x, ch) in row.chars().enumerate() {
            if ch == '.' {
                continue;
            }
            if !index.in_bounds(x, y) {
                return Err(MapError::AnnotationOutOfBounds {
                    path: path.to_string(),
                    x,
                    y,
                });
            }
            let Some(id) = index.node_at(x, y) else {
                continue;
            };
            let deltas = preferred_deltas(ch).map_err(MapError::UnknownAnnotation)?;
            let preferred: Vec<usize> = deltas
                .iter()
                .filter_map(|&(dx, dy)| {
                    let (nx, ny) = (x as i32 + dx, y as i32 + dy);
                    if nx < 0 || ny < 0 {
                        return None;
                    }
                    index.node_at(nx as usize, ny as usize)
                })
                .collect();
            for &n in graph.neighbors(id) {
                let w = if preferred.contains(&n) { 1 } else { HIGHWAY_AGAINST_WEIGHT };
                weights.insert((id, n), w);
            }
        }
    }
    Ok(Highway::new(weights))
}

/// Builds the per-directed-edge [`Highway`] weighting from a `.highway`
/// overlay.
pub fn apply_highway_annotations(graph: &Graph, index: &CellIndex, path: &str) -> Result<Highway, MapError> {
    let contents = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_string(),
        source,
    })?;
    parse_highway(path, &contents, graph, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID3X3: &str = "height 3\nwidth 3\nmap\n...\n...\n...\n";

    #[test]
    fn parses_open_grid_into_dense_graph() {
        let (g, index) = parse_map("test", GRID3X3).unwrap();
        assert_eq!(g.len(), 9);
        assert_eq!(index.width(), 3);
        assert_eq!(index.height(), 3);
        // Center cell (1,1) has all four neighbors.
        let center = index.node_at(1, 1).unwrap();
        assert_eq!(g.neighbors(center).len(), 4);
        // Corner cell (0,0) has two.
        let corner = index.node_at(0, 0).unwrap();
        assert_eq!(g.neighbors(corner).len(), 2);
    }

    #[test]
    fn obstacles_get_no_node_and_no_edges_through_them() {
        let grid = "height 3\nwidth 3\nmap\n@..\n...\n..@\n";
        let (g, index) = parse_map("test", grid).unwrap();
        assert_eq!(g.len(), 7);
        assert!(index.node_at(0, 0).is_none());
        assert!(index.node_at(2, 2).is_none());
        let right_of_obstacle = index.node_at(1, 0).unwrap();
        assert!(!g
            .neighbors(right_of_obstacle)
            .contains(&index.node_at(0, 0).unwrap_or(usize::MAX)));
    }

    #[test]
    fn rejects_unknown_tile_character() {
        let grid = "height 1\nwidth 1\nmap\n?\n";
        let err = parse_map("test", grid).unwrap_err();
        assert!(matches!(err, MapError::UnknownTile('?')));
    }

    #[test]
    fn rejects_row_width_mismatch() {
        let grid = "height 2\nwidth 3\nmap\n...\n..\n";
        let err = parse_map("test", grid).unwrap_err();
        assert!(matches!(err, MapError::RowWidthMismatch { row: 1, expected: 3, actual: 2, .. }));
    }

    #[test]
    fn pd_overlay_uses_three_distinct_arms() {
        let (mut g, index) = parse_map("test", GRID3X3).unwrap();
        let overlay = "p..\n.s.\n..d\n";
        parse_pd("test", overlay, &mut g, &index).unwrap();
        let p = index.node_at(0, 0).unwrap();
        let s = index.node_at(1, 1).unwrap();
        let d = index.node_at(2, 2).unwrap();
        assert!(g.node(p).pickup && !g.node(p).delivery);
        assert!(g.node(s).pickup && g.node(s).delivery);
        assert!(!g.node(d).pickup && g.node(d).delivery);
    }

    #[test]
    fn station_overlay_assigns_digits() {
        let (mut g, index) = parse_map("test", GRID3X3).unwrap();
        let overlay = "0..\n...\n..3\n";
        parse_stations("test", overlay, &mut g, &index).unwrap();
        assert_eq!(g.node(index.node_at(0, 0).unwrap()).station, Some(0));
        assert_eq!(g.node(index.node_at(2, 2).unwrap()).station, Some(3));
        assert_eq!(g.node(index.node_at(1, 1).unwrap()).station, None);
    }

    #[test]
    fn highway_overlay_weights_preferred_direction_cheaper() {
        let (g, index) = parse_map("test", GRID3X3).unwrap();
        let overlay = "...\n.r.\n...\n";
        let highway = parse_highway("test", overlay, &g, &index).unwrap();
        let center = index.node_at(1, 1).unwrap();
        let right = index.node_at(2, 1).unwrap();
        let left = index.node_at(0, 1).unwrap();
        assert_eq!(highway.weight(center, right), 1);
        assert_eq!(highway.weight(center, left), HIGHWAY_AGAINST_WEIGHT);
    }
}
