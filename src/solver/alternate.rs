// src/solver/alternate.rs

//! `micromamba` subprocess backend
//!
//! Same dry-run approach as the classic backend, but the platform is passed
//! with `--platform` and specs use the bracket dialect, which micromamba
//! parses unambiguously. Conflicts are reported as libmamba problem text.

use crate::config::CheckerConfig;
use crate::conflict::{RawFailure, interpret};
use crate::matrix::Target;
use crate::solver::classic::{last_line, parse_document, pinned_packages, resolved_packages};
use crate::solver::index::IndexLoader;
use crate::solver::process::{self, ProcessOutput};
use crate::solver::virtual_packages::VirtualChannel;
use crate::solver::{BackendFailure, BackendVariant, SolveRequest, SolveResult, SolverBackend};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Phrases libmamba uses when the request itself is unsatisfiable
const CONFLICT_MARKERS: &[&str] = &["could not solve", "conflicts", "nothing provides"];

pub struct AlternateBackend {
    micromamba: PathBuf,
    loader: IndexLoader,
    max_glibc_minor: u32,
    virtual_channel: Option<VirtualChannel>,
}

impl AlternateBackend {
    pub fn new(config: &CheckerConfig) -> crate::error::Result<Self> {
        let virtual_channel = if config.virtual_packages.enabled {
            Some(VirtualChannel::create(config.virtual_packages.max_glibc_minor)?)
        } else {
            None
        };
        Ok(Self {
            micromamba: config.executables.micromamba.clone(),
            loader: IndexLoader::new()?,
            max_glibc_minor: config.virtual_packages.max_glibc_minor,
            virtual_channel,
        })
    }

    fn command(&self, request: &SolveRequest, prefix: &Path) -> Command {
        let mut command = Command::new(&self.micromamba);
        command
            .args(["create", "--dry-run", "--json", "--yes", "--override-channels"])
            .arg("--platform")
            .arg(request.target.subdir())
            .arg("--prefix")
            .arg(prefix);
        for channel in &request.channels {
            command.arg("-c").arg(channel);
        }
        if let Some(channel) = &self.virtual_channel {
            command.arg("-c").arg(channel.url().as_str());
        }
        command.args(request.specs.iter().map(|s| s.to_bracket_form()));

        command.env("CONDA_OVERRIDE_GLIBC", format!("2.{}", self.max_glibc_minor));
        if !request.constraints.is_empty() {
            let pinned = pinned_packages(request);
            command
                .env("MAMBA_PINNED_PACKAGES", &pinned)
                .env("CONDA_PINNED_PACKAGES", &pinned);
        }
        command
    }
}

impl SolverBackend for AlternateBackend {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Alternate
    }

    fn describe_unsupported(&self, _target: &Target) -> Option<String> {
        if process::is_available(&self.micromamba) {
            None
        } else {
            Some(format!("micromamba executable '{}' not found", self.micromamba.display()))
        }
    }

    fn solve(&self, request: &SolveRequest) -> SolveResult {
        let scratch = match tempfile::Builder::new().prefix("solvcheck-mamba-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return SolveResult::BackendError(BackendFailure::Launch {
                    program: self.micromamba.display().to_string(),
                    message: format!("failed to create scratch prefix: {}", e),
                });
            }
        };
        let prefix = scratch.path().join("env");

        let output = match process::run(
            self.command(request, &prefix),
            &self.micromamba,
            request.timeout,
            &request.cancel,
        ) {
            Ok(output) => output,
            Err(failure) => return SolveResult::BackendError(failure),
        };
        let mut result = classify(&output, request, &self.micromamba.display().to_string());
        if let SolveResult::Resolved(packages) = &mut result {
            self.loader.attach_run_exports(packages, &request.specs);
        }
        info!(subdir = %request.target.subdir(), result = result.kind(), "micromamba solve finished");
        result
    }
}

fn is_conflict_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONFLICT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Map a finished `micromamba` run onto a [`SolveResult`]
pub(crate) fn classify(output: &ProcessOutput, request: &SolveRequest, program: &str) -> SolveResult {
    let combined = format!("{}\n{}", output.stdout, output.stderr);

    match parse_document(&output.stdout) {
        Some(doc) => {
            if let Some(problems) = doc.solver_problems.as_ref().filter(|p| !p.is_empty()) {
                debug!("micromamba solver problems: {:?}", problems);
                return SolveResult::Unresolvable(interpret(&RawFailure::Text(problems.join("\n")), &request.specs));
            }
            if output.success && doc.success != Some(false) {
                return SolveResult::Resolved(resolved_packages(doc));
            }
        }
        None if output.success => {
            return SolveResult::BackendError(BackendFailure::malformed("micromamba output is not a JSON document"));
        }
        None => {}
    }

    if is_conflict_text(&combined) {
        debug!("micromamba reported a conflict:\n{}", combined.trim());
        return SolveResult::Unresolvable(interpret(&RawFailure::Text(combined.trim().to_string()), &request.specs));
    }

    SolveResult::BackendError(BackendFailure::ProcessFailed {
        program: program.to_string(),
        status: output.status,
        message: last_line(&output.stderr),
    })
}
