// src/solver/classic.rs

//! `conda` subprocess backend
//!
//! Runs `conda create --dry-run --json` against a throwaway prefix with the
//! classic solver. The target platform is selected through `CONDA_SUBDIR`
//! and request constraints through `CONDA_PINNED_PACKAGES`. Virtual
//! packages come from a local channel written once per backend.

use crate::config::CheckerConfig;
use crate::conflict::{RawFailure, interpret};
use crate::matrix::Target;
use crate::solver::index::IndexLoader;
use crate::solver::process::{self, ProcessOutput};
use crate::solver::virtual_packages::VirtualChannel;
use crate::solver::{BackendFailure, BackendVariant, ResolvedPackage, SolveRequest, SolveResult, SolverBackend};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Exceptions that mean the request genuinely cannot be satisfied
const CONFLICT_EXCEPTIONS: &[&str] = &[
    "UnsatisfiableError",
    "PackagesNotFoundError",
    "ResolvePackageNotFound",
    "LibMambaUnsatisfiableError",
];

pub struct ClassicBackend {
    conda: PathBuf,
    loader: IndexLoader,
    max_glibc_minor: u32,
    virtual_channel: Option<VirtualChannel>,
}

impl ClassicBackend {
    pub fn new(config: &CheckerConfig) -> crate::error::Result<Self> {
        let virtual_channel = if config.virtual_packages.enabled {
            Some(VirtualChannel::create(config.virtual_packages.max_glibc_minor)?)
        } else {
            None
        };
        Ok(Self {
            conda: config.executables.conda.clone(),
            loader: IndexLoader::new()?,
            max_glibc_minor: config.virtual_packages.max_glibc_minor,
            virtual_channel,
        })
    }

    fn command(&self, request: &SolveRequest, prefix: &Path) -> Command {
        let mut command = Command::new(&self.conda);
        command
            .args(["create", "--dry-run", "--json", "--yes", "--override-channels"])
            .args(["--solver", "classic"])
            .arg("--prefix")
            .arg(prefix);
        for channel in &request.channels {
            command.arg("-c").arg(channel);
        }
        if let Some(channel) = &self.virtual_channel {
            command.arg("-c").arg(channel.url().as_str());
        }
        command.args(request.specs.iter().map(|s| s.to_string()));

        command
            .env("CONDA_SUBDIR", request.target.subdir())
            .env("CONDA_OVERRIDE_GLIBC", format!("2.{}", self.max_glibc_minor));
        if !request.constraints.is_empty() {
            command.env("CONDA_PINNED_PACKAGES", pinned_packages(request));
        }
        command
    }
}

/// Constraints in the `&`-separated form `CONDA_PINNED_PACKAGES` takes
pub(crate) fn pinned_packages(request: &SolveRequest) -> String {
    request
        .constraints
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("&")
}

impl SolverBackend for ClassicBackend {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Classic
    }

    fn describe_unsupported(&self, _target: &Target) -> Option<String> {
        if process::is_available(&self.conda) {
            None
        } else {
            Some(format!("conda executable '{}' not found", self.conda.display()))
        }
    }

    fn solve(&self, request: &SolveRequest) -> SolveResult {
        let scratch = match tempfile::Builder::new().prefix("solvcheck-conda-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return SolveResult::BackendError(BackendFailure::Launch {
                    program: self.conda.display().to_string(),
                    message: format!("failed to create scratch prefix: {}", e),
                });
            }
        };
        let prefix = scratch.path().join("env");

        let output = match process::run(self.command(request, &prefix), &self.conda, request.timeout, &request.cancel) {
            Ok(output) => output,
            Err(failure) => return SolveResult::BackendError(failure),
        };
        let mut result = classify(&output, request, &self.conda.display().to_string());
        if let SolveResult::Resolved(packages) = &mut result {
            self.loader.attach_run_exports(packages, &request.specs);
        }
        info!(subdir = %request.target.subdir(), result = result.kind(), "conda solve finished");
        result
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DryRunDocument {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub actions: Option<DryRunActions>,
    #[serde(default)]
    pub exception_name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub solver_problems: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DryRunActions {
    #[serde(default, rename = "LINK")]
    pub link: Vec<LinkRecord>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinkRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub build_string: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, rename = "fn")]
    pub filename: Option<String>,
    #[serde(default)]
    pub dist_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl From<LinkRecord> for ResolvedPackage {
    fn from(link: LinkRecord) -> Self {
        let from_url = link
            .url
            .as_deref()
            .and_then(|u| u.rsplit('/').next())
            .map(str::to_string);
        Self {
            name: link.name,
            version: link.version,
            build: link.build_string.or(link.build).unwrap_or_default(),
            build_number: link.build_number,
            channel: link.base_url.or(link.channel).unwrap_or_default(),
            subdir: link.subdir.or(link.platform).unwrap_or_default(),
            filename: link.filename.or(link.dist_name).or(from_url).unwrap_or_default(),
            run_exports: Default::default(),
        }
    }
}

/// Locate the JSON document in solver stdout
///
/// Some tools print progress lines before the document.
pub(crate) fn parse_document(stdout: &str) -> Option<DryRunDocument> {
    let trimmed = stdout.trim();
    if let Ok(doc) = serde_json::from_str(trimmed) {
        return Some(doc);
    }
    let start = trimmed.find('{')?;
    serde_json::from_str(&trimmed[start..]).ok()
}

/// Chosen packages from a successful dry run
pub(crate) fn resolved_packages(doc: DryRunDocument) -> Vec<ResolvedPackage> {
    doc.actions
        .map(|a| a.link)
        .unwrap_or_default()
        .into_iter()
        .map(ResolvedPackage::from)
        .collect()
}

/// Map a finished `conda` run onto a [`SolveResult`]
pub(crate) fn classify(output: &ProcessOutput, request: &SolveRequest, program: &str) -> SolveResult {
    let Some(doc) = parse_document(&output.stdout) else {
        debug!(stderr = %output.stderr, "conda printed no JSON document");
        return SolveResult::BackendError(if output.success {
            BackendFailure::malformed("conda output is not a JSON document")
        } else {
            BackendFailure::ProcessFailed {
                program: program.to_string(),
                status: output.status,
                message: last_line(&output.stderr),
            }
        });
    };

    if let Some(exception) = doc.exception_name.as_deref() {
        debug!(exception, "conda reported an exception:\n{}", output.stdout);
        if CONFLICT_EXCEPTIONS.contains(&exception) {
            return SolveResult::Unresolvable(interpret(
                &RawFailure::CondaJson(output.stdout.clone()),
                &request.specs,
            ));
        }
        let message = doc
            .message
            .or(doc.error)
            .unwrap_or_else(|| exception.to_string());
        return SolveResult::BackendError(BackendFailure::ProcessFailed {
            program: program.to_string(),
            status: output.status,
            message: format!("{}: {}", exception, first_line(&message)),
        });
    }

    if !output.success || doc.success == Some(false) {
        return SolveResult::BackendError(BackendFailure::ProcessFailed {
            program: program.to_string(),
            status: output.status,
            message: last_line(&output.stderr),
        });
    }

    SolveResult::Resolved(resolved_packages(doc))
}

fn first_line(text: &str) -> String {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim().to_string()
}

pub(crate) fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string()
}
