// src/commands/mod.rs
//! Command handlers for the solvcheck CLI

mod check;
mod expand;
pub mod progress;
mod render;

pub use check::cmd_check;
pub use expand::cmd_expand;
pub use render::cmd_render;

use anyhow::{Context, Result};
use solvcheck::recipe::{Recipe, parse_recipe_file, validate_recipe};
use std::path::Path;
use tracing::warn;

/// Exit code for unreadable or invalid input
pub const EXIT_INVALID_INPUT: i32 = 3;

/// Load and validate a recipe, logging validation warnings
fn load_recipe(path: &Path) -> Result<Recipe> {
    let recipe = parse_recipe_file(path).with_context(|| format!("Failed to load recipe {}", path.display()))?;
    for warning in validate_recipe(&recipe)? {
        warn!("{}: {}", path.display(), warning);
    }
    Ok(recipe)
}
