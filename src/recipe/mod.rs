// src/recipe/mod.rs

//! Recipe metadata and spec rendering
//!
//! A recipe declares the build matrix, the channels to search and the
//! requirement lists of each dependency phase. Requirement strings may carry
//! templates and inline selectors evaluated per configuration:
//!
//! ```toml
//! [package]
//! name = "foo"
//! version = "1.0"
//!
//! [matrix]
//! targets = ["linux-64", "osx-arm64"]
//!
//! [[matrix.axes]]
//! name = "python"
//! values = ["3.9", "3.10"]
//!
//! [requirements]
//! build = ["{{ compiler('c') }}"]
//! host = ["python {{ python }}", "cudatoolkit 11.8  # [linux]"]
//! run = ["python", "{{ pin_compatible('numpy', max_pin='x.x') }}"]
//!
//! [[outputs]]
//! name = "libfoo"
//!
//! [outputs.requirements]
//! host = ["zlib"]
//! ```

pub mod exports;
mod format;
pub mod parser;
pub mod pin;
pub mod render;
pub mod selector;
pub mod template;

use thiserror::Error;

pub use format::{
    AxisDecl, AxisValue, BuildSection, ChannelsSection, DEFAULT_CHANNEL, MatrixSection, Output, OutputSection,
    PackageSection, PinRunAsBuild, Recipe, RequirementsSection, SkipRule,
};
pub use parser::{parse_recipe, parse_recipe_file, validate_recipe};
pub use render::{RenderedPhase, Solved, render, render_output_phase, render_phase};
pub use selector::Context;

/// Failure to turn requirement templates into concrete specs
///
/// Recorded as an inconclusive outcome for the configuration being rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("undefined variable '{variable}' in '{expression}'")]
    UndefinedVariable { variable: String, expression: String },

    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("invalid requirement '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },
}
