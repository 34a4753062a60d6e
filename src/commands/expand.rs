// src/commands/expand.rs
//! Build matrix listing

use super::load_recipe;
use anyhow::Result;
use solvcheck::matrix;
use std::path::Path;

/// Print the configurations a recipe expands to, one label per line
pub fn cmd_expand(recipe_path: &Path, json: bool) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let configurations = matrix::expand(&recipe)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&configurations)?);
        return Ok(());
    }

    if configurations.is_empty() {
        println!("No configurations.");
        return Ok(());
    }
    for configuration in &configurations {
        if configuration.is_cross() {
            println!("{} (build on {})", configuration, configuration.build_target);
        } else {
            println!("{}", configuration);
        }
    }
    println!("\nTotal: {} configuration(s)", configurations.len());
    Ok(())
}
