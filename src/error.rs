// src/error.rs

//! Crate-wide error type
//!
//! Errors here are input and infrastructure failures that stop an operation
//! outright (bad recipe file, unreadable config, malformed spec). Solver
//! outcomes are not errors: they travel as [`crate::solver::SolveResult`]
//! values and end up in the report.

use crate::recipe::RenderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid package spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("Invalid build matrix: {0}")]
    InvalidMatrix(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Unknown solver backend '{0}' (expected classic, sat or alternate)")]
    UnknownBackend(String),
}

pub type Result<T> = std::result::Result<T, Error>;
