// src/check/mod.rs

//! Solvability orchestration
//!
//! Drives every configuration of a recipe through the same state machine:
//!
//! ```text
//! Pending -> Rendering -> Solving(build) -> Solving(host) -> Solving(run) -> Solving(test)
//!                |              |                |               |               |
//!                +--------------+----------------+---------------+---------------+--> terminal
//! ```
//!
//! Recipes with several outputs run this sequence once per output, in
//! declaration order. The first phase that is not solvable decides the
//! outcome; later phases and outputs are never sent to the backend. Configurations are independent and run on a
//! bounded rayon pool, but the report always lists them in expansion order.
//! Backend errors are retried with backoff; conflicts and unsupported
//! targets are final. Nothing a single configuration does can abort the
//! others: every failure ends up as that configuration's outcome.

pub mod cancel;
mod report;
mod retry;

pub use cancel::CancelToken;
pub use report::{
    InconclusiveCause, Outcome, PhaseRecord, PhaseStatus, ReportEntry, SolvabilityReport, Summary, Verdict,
};
pub use retry::{Attempted, RetryPolicy};

use crate::config::CheckerConfig;
use crate::error::{Error, Result};
use crate::matrix::{self, BuildConfiguration};
use crate::package_spec::Phase;
use crate::progress::{CheckProgress, SilentProgress};
use crate::recipe::{Output, Recipe, RenderedPhase, Solved, render_output_phase};
use crate::solver::{self, BackendFailure, BackendVariant, ResolvedPackage, SolveRequest, SolveResult, SolverBackend};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Knobs for one check run
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Channels in priority order
    pub channels: Vec<String>,
    /// Configurations checked at the same time
    pub concurrency: usize,
    /// Limit for a single solve attempt
    pub solve_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Abandons unfinished configurations when triggered
    pub cancel: CancelToken,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            concurrency: 1,
            solve_timeout: None,
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }
}

impl CheckOptions {
    /// Options for `recipe` under `config`
    ///
    /// Configured extra channels come first, then the recipe's own. The
    /// overall timeout, if any, starts counting now.
    pub fn from_config(config: &CheckerConfig, recipe: &Recipe) -> Self {
        let mut channels = config.channels.additional.clone();
        for channel in &recipe.channels.sources {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }
        Self {
            channels,
            concurrency: config.concurrency.max(1),
            solve_timeout: Some(config.solve_timeout()),
            retry: RetryPolicy::from(&config.retry),
            cancel: match config.overall_timeout() {
                Some(timeout) => CancelToken::with_timeout(timeout),
                None => CancelToken::new(),
            },
        }
    }
}

/// Runs solvability checks against one backend
pub struct Checker<'a> {
    backend: &'a dyn SolverBackend,
    options: CheckOptions,
    progress: Arc<dyn CheckProgress>,
}

impl<'a> Checker<'a> {
    pub fn new(backend: &'a dyn SolverBackend, options: CheckOptions) -> Self {
        Self {
            backend,
            options,
            progress: Arc::new(SilentProgress::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn CheckProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    /// Check `configurations`, or the full expansion of `recipe` when `None`
    ///
    /// Only invalid input (a recipe that cannot be expanded) is an error.
    pub fn check(&self, recipe: &Recipe, configurations: Option<Vec<BuildConfiguration>>) -> Result<SolvabilityReport> {
        let configurations = match configurations {
            Some(configurations) => configurations,
            None => matrix::expand(recipe)?,
        };
        if configurations.is_empty() {
            warn!("Recipe {} expands to no configurations", recipe.package.name);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .thread_name(|i| format!("solvcheck-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create worker pool: {}", e)))?;

        info!(
            package = %recipe.package.name,
            backend = %self.backend.variant(),
            configurations = configurations.len(),
            concurrency = self.options.concurrency,
            "Starting solvability check"
        );
        self.progress.start(configurations.len());

        let started = Instant::now();
        let entries: Vec<ReportEntry> = pool.install(|| {
            configurations
                .into_par_iter()
                .map(|configuration| {
                    let entry = self.check_configuration(recipe, configuration);
                    self.progress.configuration_finished(&entry.configuration, &entry.outcome);
                    entry
                })
                .collect()
        });

        let report = SolvabilityReport::new(recipe.package.name.clone(), self.backend.variant(), entries);
        let summary = report.summary();
        info!(
            verdict = %report.verdict(),
            solvable = summary.solvable,
            unsolvable = summary.unsolvable,
            inconclusive = summary.inconclusive,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Solvability check finished"
        );
        self.progress.finish(&report);
        Ok(report)
    }

    /// Take one configuration from `Pending` to its terminal outcome
    pub fn check_configuration(&self, recipe: &Recipe, configuration: BuildConfiguration) -> ReportEntry {
        let mut phases = Vec::new();
        let outcome = self.decide(recipe, &configuration, &mut phases);
        match &outcome {
            Outcome::Solvable => info!(config = %configuration, "Solvable"),
            Outcome::Unsolvable { phase, conflict } => warn!(
                config = %configuration,
                phase = %phase,
                implicated = ?conflict.implicated_names(),
                "Unsolvable"
            ),
            Outcome::Inconclusive { phase, cause } => warn!(
                config = %configuration,
                phase = ?phase,
                "Inconclusive: {}",
                cause
            ),
        }
        ReportEntry {
            configuration,
            outcome,
            phases,
        }
    }

    fn decide(&self, recipe: &Recipe, configuration: &BuildConfiguration, records: &mut Vec<PhaseRecord>) -> Outcome {
        let cancel = &self.options.cancel;
        debug!(config = %configuration, "Pending");
        if cancel.is_cancelled() {
            return inconclusive(None, InconclusiveCause::Cancelled);
        }

        for target in [&configuration.target, &configuration.build_target] {
            if let Some(reason) = self.backend.describe_unsupported(target) {
                return inconclusive(None, InconclusiveCause::Unsupported { reason });
            }
        }

        debug!(config = %configuration, "Rendering");
        let outputs = recipe.checked_outputs();
        for output in &outputs {
            for phase in Phase::ALL {
                if let Err(e) = render_output_phase(recipe, output, configuration, phase, Solved::default()) {
                    warn!(
                        config = %configuration,
                        output = output.name,
                        phase = %phase,
                        "Failed to render requirements: {}",
                        e
                    );
                    return inconclusive(Some(phase), InconclusiveCause::Render { message: e.to_string() });
                }
            }
        }

        for output in &outputs {
            if let Err(outcome) = self.decide_output(recipe, output, configuration, records) {
                return outcome;
            }
        }
        Outcome::Solvable
    }

    /// Solve every phase of one output; `Err` carries the deciding outcome
    fn decide_output(
        &self,
        recipe: &Recipe,
        output: &Output<'_>,
        configuration: &BuildConfiguration,
        records: &mut Vec<PhaseRecord>,
    ) -> std::result::Result<(), Outcome> {
        let cancel = &self.options.cancel;
        let mut build_solution: Option<Vec<ResolvedPackage>> = None;
        let mut host_solution: Option<Vec<ResolvedPackage>> = None;

        for phase in Phase::ALL {
            if cancel.is_cancelled() {
                return Err(inconclusive(Some(phase), InconclusiveCause::Cancelled));
            }

            let solved = Solved {
                build: build_solution.as_deref(),
                host: host_solution.as_deref(),
            };
            let specs = render_output_phase(recipe, output, configuration, phase, solved)
                .map_err(|e| inconclusive(Some(phase), InconclusiveCause::Render { message: e.to_string() }))?;

            if specs.is_empty() {
                debug!(config = %configuration, output = output.name, phase = %phase, "No requirements, skipping phase");
                records.push(PhaseRecord {
                    output: output.name.to_string(),
                    phase,
                    status: PhaseStatus::Empty,
                    attempts: 0,
                    elapsed_ms: 0,
                });
                continue;
            }

            debug!(
                config = %configuration,
                output = output.name,
                phase = %phase,
                specs = specs.specs.len(),
                "Solving"
            );
            self.progress.phase_started(configuration, phase);
            let started = Instant::now();
            let attempted = self.solve_phase(configuration, phase, specs);
            let mut record = PhaseRecord {
                output: output.name.to_string(),
                phase,
                status: PhaseStatus::Failed,
                attempts: attempted.attempts,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };

            match attempted.result {
                SolveResult::Resolved(packages) => {
                    record.status = PhaseStatus::Solved;
                    records.push(record);
                    match phase {
                        Phase::Build => build_solution = Some(packages),
                        Phase::Host => host_solution = Some(packages),
                        Phase::Run | Phase::Test => {}
                    }
                }
                SolveResult::Unresolvable(conflict) => {
                    records.push(record);
                    return Err(Outcome::Unsolvable { phase, conflict });
                }
                SolveResult::Unsupported(reason) => {
                    records.push(record);
                    return Err(inconclusive(Some(phase), InconclusiveCause::Unsupported { reason }));
                }
                SolveResult::BackendError(failure) => {
                    records.push(record);
                    if failure == BackendFailure::Cancelled || cancel.is_cancelled() {
                        return Err(inconclusive(Some(phase), InconclusiveCause::Cancelled));
                    }
                    return Err(inconclusive(
                        Some(phase),
                        InconclusiveCause::BackendError {
                            attempts: attempted.attempts,
                            last_cause: failure,
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    /// One phase through the retry combinator
    fn solve_phase(&self, configuration: &BuildConfiguration, phase: Phase, rendered: RenderedPhase) -> Attempted {
        let target = match phase {
            Phase::Build => configuration.build_target.clone(),
            _ => configuration.target.clone(),
        };
        let mut request = SolveRequest::new(target, self.options.channels.clone(), rendered.specs);
        request.constraints = rendered.constraints;
        request.cancel = self.options.cancel.clone();

        self.options.retry.run(&self.options.cancel, |attempt| {
            request.timeout = attempt_timeout(self.options.solve_timeout, self.options.cancel.remaining());
            let started = Instant::now();
            let result = self.backend.solve(&request);
            info!(
                config = %configuration,
                phase = %phase,
                backend = %self.backend.variant(),
                attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                result = result.kind(),
                "Solve attempt"
            );
            if let SolveResult::BackendError(failure) = &result {
                debug!(config = %configuration, phase = %phase, "Backend error: {}", failure);
            }
            result
        })
    }
}

fn inconclusive(phase: Option<Phase>, cause: InconclusiveCause) -> Outcome {
    Outcome::Inconclusive { phase, cause }
}

/// Per-attempt limit, never past the overall deadline
fn attempt_timeout(solve_timeout: Option<Duration>, remaining: Option<Duration>) -> Option<Duration> {
    match (solve_timeout, remaining) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Check a recipe with the backend selected by `variant`
///
/// Convenience entry point: builds the backend and options from `config`.
pub fn check(
    recipe: &Recipe,
    variant: BackendVariant,
    config: &CheckerConfig,
    configurations: Option<Vec<BuildConfiguration>>,
) -> Result<SolvabilityReport> {
    let backend = solver::create_backend(variant, config)?;
    Checker::new(backend.as_ref(), CheckOptions::from_config(config, recipe)).check(recipe, configurations)
}
