// src/lib.rs

//! Solvcheck
//!
//! Pre-merge gate answering one question for a package recipe: can its
//! dependencies be installed on every configuration of its build matrix?
//!
//! # Architecture
//!
//! - Expansion: recipe matrix → ordered `BuildConfiguration`s
//! - Rendering: selectors and templates → canonical specs per phase
//! - Solving: pluggable backends (`classic`, `sat`, `alternate`)
//! - Interpretation: raw backend failures → backend-agnostic `Conflict`s
//! - Orchestration: bounded parallelism, retries, cancellation, one report

pub mod check;
pub mod config;
pub mod conflict;
mod error;
pub mod matrix;
pub mod package_spec;
pub mod progress;
pub mod recipe;
pub mod solver;
pub mod version;

pub use check::{
    CancelToken, CheckOptions, Checker, InconclusiveCause, Outcome, RetryPolicy, SolvabilityReport, Verdict, check,
};
pub use config::CheckerConfig;
pub use conflict::{Conflict, RawFailure, interpret};
pub use error::{Error, Result};
pub use matrix::{BuildConfiguration, Target, expand};
pub use package_spec::{PackageSpec, Phase};
pub use progress::{CheckProgress, LogProgress, SilentProgress};
pub use recipe::{Recipe, RenderError, parse_recipe, parse_recipe_file, render};
pub use solver::{
    BackendFailure, BackendVariant, ResolvedPackage, RunExports, SolveRequest, SolveResult, SolverBackend, create_backend,
};
pub use version::{Version, VersionSpec};
