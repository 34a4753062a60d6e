// src/commands/check.rs
//! Solvability check command

use super::load_recipe;
use super::progress::CheckBar;
use crate::cli::CheckArgs;
use anyhow::{Context, Result};
use solvcheck::check::{CheckOptions, Checker};
use solvcheck::config::{CheckerConfig, SOLVER_ENV};
use solvcheck::matrix;
use solvcheck::progress::{CheckProgress, LogProgress};
use solvcheck::solver::create_backend;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration file merged with command-line overrides
fn effective_config(args: &CheckArgs) -> Result<CheckerConfig> {
    let mut config = match &args.config {
        Some(path) => CheckerConfig::load(path)?,
        None => CheckerConfig::default(),
    };

    let env = std::env::var(SOLVER_ENV).ok();
    config.solver = config.effective_solver(args.solver, env.as_deref())?;

    if !args.channels.is_empty() {
        let mut channels = args.channels.clone();
        channels.extend(config.channels.additional.drain(..));
        config.channels.additional = channels;
    }
    if let Some(jobs) = args.jobs {
        config.concurrency = jobs;
    }
    if let Some(timeout) = args.timeout {
        config.solve_timeout_secs = timeout;
    }
    if let Some(timeout) = args.overall_timeout {
        config.overall_timeout_secs = Some(timeout);
    }
    if let Some(retries) = args.retries {
        config.retry.max_attempts = retries;
    }
    config.validate()?;
    Ok(config)
}

/// Check a recipe and print the report
///
/// Returns the process exit code derived from the verdict.
pub fn cmd_check(args: &CheckArgs) -> Result<i32> {
    let recipe = load_recipe(&args.recipe)?;
    let config = effective_config(args)?;
    debug!("Effective configuration: {:?}", config);

    let mut configurations = matrix::expand(&recipe)?;
    if !args.only.is_empty() {
        configurations = matrix::select(configurations, &args.only)?;
    }

    info!(
        "Checking {} with the {} solver ({} configuration(s))",
        recipe.package.name,
        config.solver,
        configurations.len()
    );
    let backend = create_backend(config.solver, &config)
        .with_context(|| format!("Failed to set up the {} solver", config.solver))?;

    let progress: Arc<dyn CheckProgress> = if !args.no_progress && !args.json && std::io::stderr().is_terminal() {
        Arc::new(CheckBar::new())
    } else {
        Arc::new(LogProgress::new())
    };

    let options = CheckOptions::from_config(&config, &recipe);
    let report = Checker::new(backend.as_ref(), options)
        .with_progress(progress)
        .check(&recipe, Some(configurations))?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(report.verdict().exit_code())
}
