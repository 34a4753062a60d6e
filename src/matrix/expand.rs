// src/matrix/expand.rs

//! Configuration expansion
//!
//! Targets are expanded in declared order; within a target the variant axes
//! are crossed in declared order, zipped axes forming a single dimension at
//! the position of their first member. Values guarded by `when` are kept
//! only if the selector holds for the target and the axes chosen so far.
//! Finished configurations matching any skip rule are dropped.

use crate::error::{Error, Result};
use crate::matrix::{BuildConfiguration, Target};
use crate::recipe::{AxisValue, Context, Recipe};
use tracing::{debug, info};

/// One row of a dimension: the axis values chosen together
type Row<'a> = Vec<(&'a str, &'a AxisValue)>;

/// Expand a recipe into its ordered configuration set
///
/// The result is a pure function of the recipe. An axis whose values are all
/// filtered out contributes no configurations for that branch.
pub fn expand(recipe: &Recipe) -> Result<Vec<BuildConfiguration>> {
    let dimensions = dimensions(recipe)?;
    let mut targets: Vec<Target> = Vec::new();
    for subdir in &recipe.matrix.targets {
        let target = Target::parse(subdir)?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    let mut configs = Vec::new();
    for target in targets {
        let build_target = match recipe.matrix.build_platform.get(&target.subdir()) {
            Some(subdir) => Target::parse(subdir)?,
            None => target.clone(),
        };
        let mut expansion = Expansion {
            recipe,
            dimensions: &dimensions,
            target: &target,
            build_target: &build_target,
            axes: Vec::new(),
            out: &mut configs,
        };
        let ctx = Context::for_target(&target, &build_target);
        expansion.walk(0, &ctx)?;
    }

    info!(
        package = %recipe.package.name,
        configurations = configs.len(),
        "Expanded build matrix"
    );
    Ok(configs)
}

/// Keep only configurations whose label is listed
pub fn select(configs: Vec<BuildConfiguration>, labels: &[String]) -> Result<Vec<BuildConfiguration>> {
    if labels.is_empty() {
        return Ok(configs);
    }
    for label in labels {
        if !configs.iter().any(|c| &c.label() == label) {
            return Err(Error::InvalidMatrix(format!("no configuration labelled '{}'", label)));
        }
    }
    Ok(configs.into_iter().filter(|c| labels.contains(&c.label())).collect())
}

fn dimensions(recipe: &Recipe) -> Result<Vec<Vec<Row<'_>>>> {
    let matrix = &recipe.matrix;
    let group_of = |name: &str| matrix.zip.iter().position(|g| g.iter().any(|n| n == name));

    for group in &matrix.zip {
        for name in group {
            if !matrix.axes.iter().any(|a| &a.name == name) {
                return Err(Error::InvalidMatrix(format!("zip references unknown axis '{}'", name)));
            }
        }
    }

    let mut dims = Vec::new();
    let mut emitted_groups = Vec::new();
    for axis in &matrix.axes {
        match group_of(&axis.name) {
            None => dims.push(axis.values.iter().map(|v| vec![(axis.name.as_str(), v)]).collect()),
            Some(group) if emitted_groups.contains(&group) => {}
            Some(group) => {
                emitted_groups.push(group);
                let members: Vec<_> = matrix
                    .axes
                    .iter()
                    .filter(|a| group_of(&a.name) == Some(group))
                    .collect();
                let len = members[0].values.len();
                if members.iter().any(|m| m.values.len() != len) {
                    return Err(Error::InvalidMatrix(format!(
                        "zipped axes {} have different numbers of values",
                        matrix.zip[group].join(", ")
                    )));
                }
                let rows = (0..len)
                    .map(|i| members.iter().map(|m| (m.name.as_str(), &m.values[i])).collect())
                    .collect();
                dims.push(rows);
            }
        }
    }
    Ok(dims)
}

struct Expansion<'a, 'o> {
    recipe: &'a Recipe,
    dimensions: &'a [Vec<Row<'a>>],
    target: &'a Target,
    build_target: &'a Target,
    axes: Vec<(String, String)>,
    out: &'o mut Vec<BuildConfiguration>,
}

impl Expansion<'_, '_> {
    fn walk(&mut self, depth: usize, ctx: &Context) -> Result<()> {
        if depth == self.dimensions.len() {
            return self.finish();
        }

        let dimensions = self.dimensions;
        for row in &dimensions[depth] {
            let mut admitted = true;
            for (_, value) in row {
                if let Some(when) = value.condition()
                    && !ctx.evaluate(when)?
                {
                    admitted = false;
                    break;
                }
            }
            if !admitted {
                continue;
            }

            let mut next = ctx.clone();
            let mark = self.axes.len();
            for (name, value) in row {
                next.set(name, value.value());
                self.axes.push((name.to_string(), value.value().to_string()));
            }
            self.walk(depth + 1, &next)?;
            self.axes.truncate(mark);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let config = BuildConfiguration::new(self.target.clone(), self.build_target.clone(), self.axes.clone());
        let ctx = Context::for_configuration(&config);
        for rule in &self.recipe.matrix.skip {
            if ctx.evaluate(&rule.when)? {
                debug!(config = %config.label(), rule = %rule.when, "Skipping configuration");
                return Ok(());
            }
        }
        self.out.push(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parse_recipe;

    fn labels(configs: &[BuildConfiguration]) -> Vec<String> {
        configs.iter().map(|c| c.label()).collect()
    }

    #[test]
    fn test_zero_axes_one_per_target() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64", "osx-arm64", "win-64", "linux-64"]
"#,
        )
        .unwrap();
        let configs = expand(&recipe).unwrap();
        assert_eq!(labels(&configs), vec!["linux-64", "osx-arm64", "win-64"]);
    }

    #[test]
    fn test_cross_product_in_declared_order() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[[matrix.axes]]
name = "python"
values = ["3.9", "3.10"]

[[matrix.axes]]
name = "cuda"
values = ["None", "11.8"]
"#,
        )
        .unwrap();
        let configs = expand(&recipe).unwrap();
        assert_eq!(
            labels(&configs),
            vec![
                "linux-64/python=3.9,cuda=None",
                "linux-64/python=3.9,cuda=11.8",
                "linux-64/python=3.10,cuda=None",
                "linux-64/python=3.10,cuda=11.8",
            ]
        );
        assert_eq!(expand(&recipe).unwrap(), configs);
    }

    #[test]
    fn test_when_and_skip() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64", "osx-arm64"]

[[matrix.axes]]
name = "python"
values = ["3.9", "3.10"]

[[matrix.axes]]
name = "cuda"
values = ["None", { value = "11.8", when = "linux" }]

[[matrix.skip]]
when = "osx and python == '3.9'"
"#,
        )
        .unwrap();
        let configs = expand(&recipe).unwrap();
        assert_eq!(
            labels(&configs),
            vec![
                "linux-64/python=3.9,cuda=None",
                "linux-64/python=3.9,cuda=11.8",
                "linux-64/python=3.10,cuda=None",
                "linux-64/python=3.10,cuda=11.8",
                "osx-arm64/python=3.10,cuda=None",
            ]
        );
    }

    #[test]
    fn test_axis_filtered_to_nothing() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["osx-64"]

[[matrix.axes]]
name = "cuda"
values = [{ value = "11.8", when = "linux" }]
"#,
        )
        .unwrap();
        assert!(expand(&recipe).unwrap().is_empty());
    }

    #[test]
    fn test_zip_keys() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]
zip = [["cuda", "cudnn"]]

[[matrix.axes]]
name = "cuda"
values = ["11.8", "12.0"]

[[matrix.axes]]
name = "python"
values = ["3.10"]

[[matrix.axes]]
name = "cudnn"
values = ["8", "9"]
"#,
        )
        .unwrap();
        let configs = expand(&recipe).unwrap();
        assert_eq!(
            labels(&configs),
            vec![
                "linux-64/cuda=11.8,cudnn=8,python=3.10",
                "linux-64/cuda=12.0,cudnn=9,python=3.10",
            ]
        );
    }

    #[test]
    fn test_build_platform_mapping() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-aarch64"]

[matrix.build_platform]
"linux-aarch64" = "linux-64"
"#,
        )
        .unwrap();
        let configs = expand(&recipe).unwrap();
        assert_eq!(configs[0].build_target.subdir(), "linux-64");
        assert!(configs[0].is_cross());
    }

    #[test]
    fn test_selector_on_later_axis_fails() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[[matrix.axes]]
name = "cuda"
values = [{ value = "11.8", when = "python == '3.10'" }]

[[matrix.axes]]
name = "python"
values = ["3.10"]
"#,
        )
        .unwrap();
        assert!(expand(&recipe).is_err());
    }

    #[test]
    fn test_select_labels() {
        let recipe = parse_recipe(
            r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64", "win-64"]
"#,
        )
        .unwrap();
        let configs = expand(&recipe).unwrap();
        let picked = select(configs.clone(), &["win-64".to_string()]).unwrap();
        assert_eq!(labels(&picked), vec!["win-64"]);
        assert!(select(configs, &["osx-64".to_string()]).is_err());
    }
}
