//! Typed error taxonomy (spec class 1/2 failures). Class 3 (algorithmic
//! failure: no path under constraints, CBS infeasible, TP out of endpoints)
//! is not represented here -- it is the `Ok(false)` / `None` return path of
//! the solvers, not an `Err`. Class 4 (invariant breach) is a `panic!`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read map file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("map file {path} is truncated: expected line {expected:?}")]
    Truncated { path: String, expected: &'static str },
    #[error("map file {path} declares {declared} rows but grid has {actual}")]
    RowCountMismatch {
        path: String,
        declared: usize,
        actual: usize,
    },
    #[error("map file {path} row {row} has width {actual}, expected {expected}")]
    RowWidthMismatch {
        path: String,
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("unrecognized tile character '{0}' in map")]
    UnknownTile(char),
    #[error("annotation file {path} references out-of-bounds cell ({x}, {y})")]
    AnnotationOutOfBounds { path: String, x: usize, y: usize },
    #[error("unrecognized annotation code '{0}'")]
    UnknownAnnotation(char),
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scenario file {path} line {line} is malformed: {reason}")]
    Malformed {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("requested {requested} agents but scenario only has {available}")]
    NotEnoughRoutes { requested: usize, available: usize },
    #[error("bucket {0} not found in scenario")]
    BucketNotFound(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config line {line} is not a `key=value` pair: {raw:?}")]
    MalformedLine { line: usize, raw: String },
    #[error("unknown value {value:?} for key {key}")]
    UnknownEnumValue { key: &'static str, value: String },
    #[error("missing required config key {0}")]
    MissingKey(&'static str),
    #[error(
        "solver {solver} is incompatible with problem {problem}: {reason}"
    )]
    SolverProblemMismatch {
        solver: String,
        problem: String,
        reason: String,
    },
    #[error(
        "solver {solver} requires suboptimality bound {which} to be {expected}, got {actual:?}"
    )]
    SuboptimalBoundMismatch {
        solver: String,
        which: &'static str,
        expected: &'static str,
        actual: Option<f64>,
    },
}
