// src/recipe/parser.rs

//! Recipe file parsing

use crate::error::{Error, Result};
use crate::matrix::Target;
use crate::recipe::format::Recipe;
use std::collections::HashSet;
use std::path::Path;

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read recipe file: {}", e)))?;

    parse_recipe(&content)
}

/// Validate a recipe for completeness and correctness
///
/// Returns warnings for suspicious but usable metadata.
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if recipe.package.name.is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }
    if recipe.package.version.is_empty() {
        return Err(Error::ParseError("Recipe package version cannot be empty".to_string()));
    }

    if recipe.matrix.targets.is_empty() {
        return Err(Error::InvalidMatrix("no targets declared".to_string()));
    }
    for target in &recipe.matrix.targets {
        Target::parse(target)?;
    }
    for (target, build) in &recipe.matrix.build_platform {
        Target::parse(target)?;
        Target::parse(build)?;
        if !recipe.matrix.targets.contains(target) {
            warnings.push(format!("build_platform entry for undeclared target {}", target));
        }
    }

    let mut seen = HashSet::new();
    for axis in &recipe.matrix.axes {
        if axis.name.is_empty() {
            return Err(Error::InvalidMatrix("axis with empty name".to_string()));
        }
        if !seen.insert(axis.name.as_str()) {
            return Err(Error::InvalidMatrix(format!("axis '{}' declared twice", axis.name)));
        }
        if axis.values.is_empty() {
            warnings.push(format!("Axis {} has no values; it contributes no configurations", axis.name));
        }
    }

    let mut zipped = HashSet::new();
    for group in &recipe.matrix.zip {
        let mut lengths = Vec::new();
        for name in group {
            let axis = recipe
                .matrix
                .axes
                .iter()
                .find(|a| &a.name == name)
                .ok_or_else(|| Error::InvalidMatrix(format!("zip references unknown axis '{}'", name)))?;
            if !zipped.insert(name.as_str()) {
                return Err(Error::InvalidMatrix(format!("axis '{}' appears in more than one zip group", name)));
            }
            lengths.push(axis.values.len());
        }
        if lengths.windows(2).any(|w| w[0] != w[1]) {
            return Err(Error::InvalidMatrix(format!(
                "zipped axes {} have different numbers of values",
                group.join(", ")
            )));
        }
    }

    if recipe.channels.sources.is_empty() {
        warnings.push("No channels declared".to_string());
    }

    let mut names = HashSet::from([recipe.package.name.as_str()]);
    for output in &recipe.outputs {
        if output.name.is_empty() {
            return Err(Error::ParseError("Output name cannot be empty".to_string()));
        }
        if !names.insert(output.name.as_str()) {
            return Err(Error::ParseError(format!("Output '{}' declared twice", output.name)));
        }
    }

    let no_requirements = recipe.checked_outputs().iter().all(|o| {
        let reqs = o.requirements;
        reqs.build.is_empty() && reqs.host.is_empty() && reqs.run.is_empty() && reqs.test.is_empty()
    });
    if no_requirements {
        warnings.push("Recipe declares no requirements".to_string());
    }

    Ok(warnings)
}
