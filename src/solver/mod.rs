// src/solver/mod.rs

//! Solver backends
//!
//! Every backend answers the same question: can these specs be installed
//! together for this target from these channels? The answer is a
//! [`SolveResult`], which keeps genuine conflicts (`Unresolvable`) apart from
//! infrastructure failures (`BackendError`) so that a flaky index download
//! is never reported as a dependency conflict.
//!
//! Three variants are available:
//! - `classic`: the `conda` executable in dry-run mode
//! - `sat`: an in-process resolver over `repodata.json`, driven by `resolvo`
//! - `alternate`: the `micromamba` executable in dry-run mode

pub mod alternate;
pub mod channel;
pub mod classic;
pub mod index;
mod process;
pub mod resolver;
pub mod sat;
pub mod virtual_packages;

use crate::check::CancelToken;
use crate::config::CheckerConfig;
use crate::conflict::Conflict;
use crate::error::{Error, Result};
use crate::matrix::Target;
use crate::package_spec::PackageSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use alternate::AlternateBackend;
pub use classic::ClassicBackend;
pub use sat::SatBackend;

/// Which solver implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendVariant {
    #[serde(alias = "conda")]
    Classic,
    #[serde(alias = "resolver", alias = "in-process")]
    Sat,
    #[serde(alias = "micromamba")]
    Alternate,
}

impl BackendVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Sat => "sat",
            Self::Alternate => "alternate",
        }
    }
}

impl FromStr for BackendVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "classic" | "conda" => Ok(Self::Classic),
            "sat" | "resolver" | "in-process" => Ok(Self::Sat),
            "alternate" | "micromamba" => Ok(Self::Alternate),
            other => Err(Error::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirements a package passes on to environments built against it
///
/// `strong` exports apply to host and run, `weak` ones to run only, and
/// `noarch` ones to noarch packages. The `*_constrains` lists end up as run
/// constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunExports {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weak: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strong: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub noarch: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weak_constrains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strong_constrains: Vec<String>,
}

impl RunExports {
    pub fn is_empty(&self) -> bool {
        self.weak.is_empty()
            && self.strong.is_empty()
            && self.noarch.is_empty()
            && self.weak_constrains.is_empty()
            && self.strong_constrains.is_empty()
    }

    /// Add every entry of `other` not already present
    pub fn merge(&mut self, other: &RunExports) {
        fn union(into: &mut Vec<String>, from: &[String]) {
            for item in from {
                if !into.contains(item) {
                    into.push(item.clone());
                }
            }
        }
        union(&mut self.weak, &other.weak);
        union(&mut self.strong, &other.strong);
        union(&mut self.noarch, &other.noarch);
        union(&mut self.weak_constrains, &other.weak_constrains);
        union(&mut self.strong_constrains, &other.strong_constrains);
    }

    /// Copy without entries whose package name is in `ignored`
    pub fn without(&self, ignored: &[String]) -> RunExports {
        let keep = |list: &[String]| -> Vec<String> {
            list.iter()
                .filter(|entry| {
                    let name = entry.split_whitespace().next().unwrap_or(entry);
                    !ignored.iter().any(|i| i == name)
                })
                .cloned()
                .collect()
        };
        RunExports {
            weak: keep(&self.weak),
            strong: keep(&self.strong),
            noarch: keep(&self.noarch),
            weak_constrains: keep(&self.weak_constrains),
            strong_constrains: keep(&self.strong_constrains),
        }
    }
}

/// A package chosen by a solver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subdir: String,
    /// Artifact file name, with or without its extension
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "RunExports::is_empty")]
    pub run_exports: RunExports,
}

impl ResolvedPackage {
    pub fn new(name: &str, version: &str, build: &str, build_number: u64) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            build: build.to_string(),
            build_number,
            channel: String::new(),
            subdir: String::new(),
            filename: String::new(),
            run_exports: RunExports::default(),
        }
    }

    pub fn with_run_exports(mut self, run_exports: RunExports) -> Self {
        self.run_exports = run_exports;
        self
    }
}

impl fmt::Display for ResolvedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.version, self.build)
    }
}

/// Everything a backend needs for one solve
#[derive(Debug, Clone)]
pub struct SolveRequest {
    /// Platform the environment is solved for
    pub target: Target,
    /// Channels in priority order
    pub channels: Vec<String>,
    /// Packages that must be installed
    pub specs: Vec<PackageSpec>,
    /// Restrictions applied only to packages that end up installed
    pub constraints: Vec<PackageSpec>,
    /// Wall-clock limit for this attempt
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl SolveRequest {
    pub fn new(target: Target, channels: Vec<String>, specs: Vec<PackageSpec>) -> Self {
        Self {
            target,
            channels,
            specs,
            constraints: Vec::new(),
            timeout: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Why a backend could not produce an answer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendFailure {
    #[error("solve timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("solve cancelled")]
    Cancelled,

    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("{program} exited with status {status}: {message}")]
    ProcessFailed {
        program: String,
        status: i32,
        message: String,
    },

    #[error("index error: {message}")]
    Index { message: String },

    #[error("malformed solver output: {message}")]
    MalformedOutput { message: String },
}

impl BackendFailure {
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
        }
    }

    /// Whether calling again can produce a different answer
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Outcome of one solve call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveResult {
    /// The specs are installable together; the chosen packages
    Resolved(Vec<ResolvedPackage>),
    /// The specs genuinely conflict
    Unresolvable(Conflict),
    /// This backend cannot serve the requested target
    Unsupported(String),
    /// The backend failed to produce an answer
    BackendError(BackendFailure),
}

impl SolveResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::Unresolvable(_) => "unresolvable",
            Self::Unsupported(_) => "unsupported",
            Self::BackendError(_) => "backend-error",
        }
    }
}

/// Capability interface implemented by each solver variant
///
/// Implementations must not mutate state observable by concurrent calls:
/// each `solve` works on a hypothetical environment of its own.
pub trait SolverBackend: Send + Sync {
    /// Which variant this is
    fn variant(&self) -> BackendVariant;

    /// Reason this backend cannot serve `target`, if any
    fn describe_unsupported(&self, target: &Target) -> Option<String>;

    /// Solve one request
    fn solve(&self, request: &SolveRequest) -> SolveResult;
}

/// Build the backend selected by `variant`
pub fn create_backend(variant: BackendVariant, config: &CheckerConfig) -> Result<Box<dyn SolverBackend>> {
    let backend: Box<dyn SolverBackend> = match variant {
        BackendVariant::Classic => Box::new(ClassicBackend::new(config)?),
        BackendVariant::Sat => Box::new(SatBackend::new(config)?),
        BackendVariant::Alternate => Box::new(AlternateBackend::new(config)?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parse_aliases() {
        assert_eq!("classic".parse::<BackendVariant>().unwrap(), BackendVariant::Classic);
        assert_eq!("conda".parse::<BackendVariant>().unwrap(), BackendVariant::Classic);
        assert_eq!("SAT".parse::<BackendVariant>().unwrap(), BackendVariant::Sat);
        assert_eq!("micromamba".parse::<BackendVariant>().unwrap(), BackendVariant::Alternate);
        assert!(matches!(
            "pip".parse::<BackendVariant>(),
            Err(Error::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(
            BackendFailure::Timeout { seconds: 30 }.to_string(),
            "solve timed out after 30s"
        );
        let json = serde_json::to_string(&BackendFailure::index("404")).unwrap();
        assert!(json.contains("\"kind\":\"index\""));
        assert!(BackendFailure::index("404").is_retryable());
        assert!(!BackendFailure::Cancelled.is_retryable());
    }

    #[test]
    fn test_run_exports_merge_and_ignore() {
        let mut exports = RunExports {
            weak: vec!["libzlib >=1.3,<2.0a0".to_string()],
            ..RunExports::default()
        };
        exports.merge(&RunExports {
            weak: vec!["libzlib >=1.3,<2.0a0".to_string()],
            strong: vec!["libgcc >=13".to_string()],
            ..RunExports::default()
        });
        assert_eq!(exports.weak.len(), 1);
        assert_eq!(exports.strong, vec!["libgcc >=13"]);

        let trimmed = exports.without(&["libgcc".to_string()]);
        assert!(trimmed.strong.is_empty());
        assert_eq!(trimmed.weak, exports.weak);
        assert!(RunExports::default().is_empty());
    }

    #[test]
    fn test_result_kind() {
        assert!(SolveResult::Resolved(Vec::new()).is_resolved());
        assert_eq!(SolveResult::Unsupported("x".into()).kind(), "unsupported");
    }
}
