// src/recipe/render.rs

//! Spec rendering: recipe requirements → concrete package specs per phase
//!
//! For one configuration, one output and one phase, each requirement line
//! goes through inline selector filtering, template expansion and
//! normalization into the canonical conda-build dialect. Requirements on the
//! recipe's own outputs are dropped, since the solver can never find them
//! before they are built.
//!
//! Later phases also depend on what earlier ones solved to: run exports of
//! the build and host packages are added (see [`exports`](super::exports)),
//! `pin_compatible` and `pin_run_as_build` pin run requirements to the host
//! (or build) solution, and the test phase installs the final run
//! requirements next to its own.

use crate::matrix::BuildConfiguration;
use crate::package_spec::{PackageSpec, Phase, canonical_version};
use crate::recipe::RenderError;
use crate::recipe::exports::{self, Propagated};
use crate::recipe::format::{Output, Recipe};
use crate::recipe::pin::pin_from_build;
use crate::recipe::selector::{Context, split_inline_selector};
use crate::recipe::template::{self, Expanded};
use crate::solver::ResolvedPackage;
use tracing::{trace, warn};

/// Packages never requested even when a recipe names them
const IGNORED_PACKAGES: &[&str] = &["parquet-cpp"];

/// Specs for one phase plus the constraints it is solved with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPhase {
    /// Packages that must be installed
    pub specs: Vec<PackageSpec>,
    /// Version restrictions applied only if the package ends up installed
    pub constraints: Vec<PackageSpec>,
}

impl RenderedPhase {
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Solutions of the phases already solved for an output
#[derive(Debug, Clone, Copy, Default)]
pub struct Solved<'a> {
    pub build: Option<&'a [ResolvedPackage]>,
    pub host: Option<&'a [ResolvedPackage]>,
}

/// Render the specs of one phase of the top-level package, nothing solved yet
///
/// `pin_compatible` requirements render as bare names here.
pub fn render(recipe: &Recipe, config: &BuildConfiguration, phase: Phase) -> Result<Vec<PackageSpec>, RenderError> {
    Ok(render_phase(recipe, config, phase, Solved::default())?.specs)
}

/// Render one phase of the top-level package
pub fn render_phase(
    recipe: &Recipe,
    config: &BuildConfiguration,
    phase: Phase,
    solved: Solved<'_>,
) -> Result<RenderedPhase, RenderError> {
    let main = Output {
        name: &recipe.package.name,
        requirements: &recipe.requirements,
        build: &recipe.build,
    };
    render_output_phase(recipe, &main, config, phase, solved)
}

/// Render one phase of `output` given what earlier phases solved to
pub fn render_output_phase(
    recipe: &Recipe,
    output: &Output<'_>,
    config: &BuildConfiguration,
    phase: Phase,
    solved: Solved<'_>,
) -> Result<RenderedPhase, RenderError> {
    let ctx = Context::for_configuration(config);
    let renderer = Renderer {
        recipe,
        ctx: &ctx,
        host: solved.host,
    };
    let reqs = output.requirements;

    // Earlier phases are rendered only when their lists matter here
    let build_specs = if phase == Phase::Build || solved.build.is_some() {
        renderer.render_list(&reqs.build, Phase::Build)?
    } else {
        Vec::new()
    };
    let host_specs = if phase == Phase::Host || solved.build.is_some() || solved.host.is_some() {
        renderer.render_list(&reqs.host, Phase::Host)?
    } else {
        Vec::new()
    };
    let has_host = !host_specs.is_empty();
    let noarch = output.is_noarch();

    let propagated = if phase == Phase::Build {
        Propagated::default()
    } else {
        let build_exports = solved
            .build
            .map(|s| exports::collect(s, &build_specs, output.build))
            .unwrap_or_default();
        let host_exports = solved
            .host
            .map(|s| exports::collect(s, &host_specs, output.build))
            .unwrap_or_default();
        exports::propagate(&build_exports, &host_exports, has_host, noarch)
    };

    let rendered = match phase {
        Phase::Build => RenderedPhase {
            specs: build_specs,
            constraints: Vec::new(),
        },
        Phase::Host => {
            let mut specs = host_specs;
            renderer.add_exported(&mut specs, &propagated.host, phase);
            RenderedPhase {
                specs,
                constraints: Vec::new(),
            }
        }
        Phase::Run | Phase::Test => {
            let mut run = renderer.render_list(&reqs.run, Phase::Run)?;
            renderer.add_exported(&mut run, &propagated.run, Phase::Run);
            let mut constraints = renderer.render_list(&reqs.run_constrained, Phase::Run)?;
            renderer.add_exported(&mut constraints, &propagated.run_constrained, Phase::Run);

            let pin_source = if has_host { solved.host } else { solved.build };
            if let Some(pin_source) = pin_source {
                let pins = &recipe.matrix.pin_run_as_build;
                for spec in run.iter_mut().chain(constraints.iter_mut()) {
                    pin_from_build(spec, pin_source, pins, noarch);
                }
            }

            if phase == Phase::Run {
                RenderedPhase {
                    specs: run,
                    constraints,
                }
            } else {
                let mut specs = renderer.render_list(&reqs.test, Phase::Test)?;
                for mut spec in run {
                    spec.phase = Phase::Test;
                    if !specs.contains(&spec) {
                        specs.push(spec);
                    }
                }
                for spec in &mut constraints {
                    spec.phase = Phase::Test;
                }
                RenderedPhase { specs, constraints }
            }
        }
    };

    trace!(
        config = %config.label(),
        output = output.name,
        phase = %phase,
        specs = rendered.specs.len(),
        constraints = rendered.constraints.len(),
        "Rendered phase"
    );
    Ok(rendered)
}

struct Renderer<'a> {
    recipe: &'a Recipe,
    ctx: &'a Context,
    host: Option<&'a [ResolvedPackage]>,
}

impl Renderer<'_> {
    fn render_list(&self, lines: &[String], phase: Phase) -> Result<Vec<PackageSpec>, RenderError> {
        let own = self.recipe.own_names();
        let mut specs = Vec::new();

        for line in lines {
            let Some(text) = self.render_line(line)? else {
                continue;
            };
            let spec = normalize(&text, phase)?;
            if own.contains(&spec.name.as_str()) || IGNORED_PACKAGES.contains(&spec.name.as_str()) {
                trace!(name = %spec.name, "Dropping requirement on own or ignored package");
                continue;
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    /// Append exported requirements not already requested
    fn add_exported(&self, specs: &mut Vec<PackageSpec>, exported: &[String], phase: Phase) {
        let own = self.recipe.own_names();
        for text in exported {
            let spec = match normalize(text, phase) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("Skipping unusable run export '{}': {}", text, e);
                    continue;
                }
            };
            if own.contains(&spec.name.as_str()) || specs.contains(&spec) {
                continue;
            }
            specs.push(spec);
        }
    }

    fn render_line(&self, line: &str) -> Result<Option<String>, RenderError> {
        let (body, selector) = split_inline_selector(line);
        if let Some(selector) = selector
            && !self.ctx.evaluate(selector)?
        {
            return Ok(None);
        }

        let text = match template::expand(body, self.ctx)? {
            Expanded::Text(text) => text,
            Expanded::Pin(pin) => {
                let host_pkg = self
                    .host
                    .and_then(|pkgs| pkgs.iter().find(|p| p.name == pin.name))
                    .map(|p| (p.version.as_str(), p.build.as_str()));
                pin.resolve(host_pkg)
            }
        };

        let text = text.trim();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text.to_string()))
        }
    }
}

/// Parse a rendered requirement and rewrite its version into canonical form
pub fn normalize(text: &str, phase: Phase) -> Result<PackageSpec, RenderError> {
    let mut spec = PackageSpec::parse(text, phase).map_err(|e| RenderError::InvalidSpec {
        spec: text.to_string(),
        reason: e.to_string(),
    })?;

    if spec.build.is_some() && spec.version.is_none() {
        return Err(RenderError::InvalidSpec {
            spec: text.to_string(),
            reason: "has a build string but no version".to_string(),
        });
    }
    spec.version = spec.version.as_deref().map(canonical_version);
    Ok(spec)
}
