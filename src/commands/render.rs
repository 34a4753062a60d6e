// src/commands/render.rs
//! Rendered spec inspection

use super::load_recipe;
use anyhow::{Result, anyhow};
use solvcheck::matrix;
use solvcheck::package_spec::Phase;
use solvcheck::recipe::{Solved, render_output_phase};
use std::path::Path;

/// Print the specs one phase of one configuration renders to
///
/// `pin_compatible` entries render as bare names and no run exports are
/// added, since no environment has been solved.
pub fn cmd_render(recipe_path: &Path, label: &str, phase: &str, output: Option<&str>) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let phase = Phase::parse(phase)?;
    let output = match output {
        Some(name) => recipe
            .output(name)
            .ok_or_else(|| anyhow!("Recipe has no output {} with requirements", name))?,
        None => recipe
            .checked_outputs()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Recipe has no outputs"))?,
    };
    let configuration = matrix::select(matrix::expand(&recipe)?, &[label.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No configuration labelled {}", label))?;

    let rendered = render_output_phase(&recipe, &output, &configuration, phase, Solved::default())?;
    let target = match phase {
        Phase::Build => &configuration.build_target,
        _ => &configuration.target,
    };
    println!("{} {} ({} phase on {}):", output.name, configuration, phase, target);
    if rendered.specs.is_empty() {
        println!("  (no requirements)");
    }
    for spec in &rendered.specs {
        println!("  {}", spec);
    }
    if !rendered.constraints.is_empty() {
        println!("Constraints:");
        for constraint in &rendered.constraints {
            println!("  {}", constraint);
        }
    }
    Ok(())
}
