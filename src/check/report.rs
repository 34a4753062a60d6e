// src/check/report.rs

//! Solvability report: per-configuration outcomes and the overall verdict

use crate::conflict::Conflict;
use crate::matrix::BuildConfiguration;
use crate::package_spec::Phase;
use crate::solver::{BackendFailure, BackendVariant};
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;

/// Why a configuration could not be decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InconclusiveCause {
    /// Requirements could not be rendered for this configuration
    Render { message: String },
    /// The backend kept failing until retries ran out
    BackendError { attempts: u32, last_cause: BackendFailure },
    /// The backend cannot serve this target
    Unsupported { reason: String },
    /// The check was abandoned before this configuration finished
    Cancelled,
}

impl fmt::Display for InconclusiveCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render { message } => write!(f, "render error: {}", message),
            Self::BackendError { attempts, last_cause } => {
                write!(f, "backend error after {} attempt(s): {}", attempts, last_cause)
            }
            Self::Unsupported { reason } => write!(f, "unsupported: {}", reason),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal state of one configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Solvable,
    Unsolvable {
        phase: Phase,
        conflict: Conflict,
    },
    Inconclusive {
        #[serde(skip_serializing_if = "Option::is_none")]
        phase: Option<Phase>,
        cause: InconclusiveCause,
    },
}

impl Outcome {
    pub fn is_solvable(&self) -> bool {
        matches!(self, Self::Solvable)
    }

    pub fn is_unsolvable(&self) -> bool {
        matches!(self, Self::Unsolvable { .. })
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Self::Inconclusive { .. })
    }

    /// Phase that decided a non-solvable outcome
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            Self::Solvable => None,
            Self::Unsolvable { phase, .. } => Some(*phase),
            Self::Inconclusive { phase, .. } => *phase,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Solvable => "solvable",
            Self::Unsolvable { .. } => "unsolvable",
            Self::Inconclusive { .. } => "inconclusive",
        }
    }
}

/// How a single phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Solved,
    /// Nothing to install; not sent to the backend
    Empty,
    Failed,
}

/// Diagnostics for one solve attempt sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    /// Package of the recipe the phase belongs to
    pub output: String,
    pub phase: Phase,
    pub status: PhaseStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub configuration: BuildConfiguration,
    pub outcome: Outcome,
    /// Phases attempted, in order
    pub phases: Vec<PhaseRecord>,
}

/// Overall gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Every configuration is solvable
    Pass,
    /// At least one configuration is confirmed unsolvable
    Block,
    /// Nothing confirmed unsolvable, but something is undecided
    Warn,
}

impl Verdict {
    /// Process exit code for CI gating
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Block => 1,
            Self::Warn => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Block => "BLOCK",
            Self::Warn => "WARN",
        })
    }
}

/// Outcomes of every checked configuration, in expansion order
#[derive(Debug, Clone, Serialize)]
pub struct SolvabilityReport {
    pub recipe: String,
    pub backend: BackendVariant,
    pub entries: Vec<ReportEntry>,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    recipe: &'a str,
    backend: BackendVariant,
    verdict: Verdict,
    passed: bool,
    summary: Summary,
    configurations: &'a [ReportEntry],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub solvable: usize,
    pub unsolvable: usize,
    pub inconclusive: usize,
}

impl SolvabilityReport {
    pub fn new(recipe: impl Into<String>, backend: BackendVariant, entries: Vec<ReportEntry>) -> Self {
        Self {
            recipe: recipe.into(),
            backend,
            entries,
        }
    }

    /// Outcome recorded for `configuration`
    pub fn get(&self, configuration: &BuildConfiguration) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| &e.configuration == configuration)
            .map(|e| &e.outcome)
    }

    /// Outcome recorded for the configuration with this label
    pub fn get_by_label(&self, label: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.configuration.label() == label)
            .map(|e| &e.outcome)
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.entries.len(),
            ..Summary::default()
        };
        for entry in &self.entries {
            match entry.outcome {
                Outcome::Solvable => summary.solvable += 1,
                Outcome::Unsolvable { .. } => summary.unsolvable += 1,
                Outcome::Inconclusive { .. } => summary.inconclusive += 1,
            }
        }
        summary
    }

    /// The gate: every configuration solvable, and at least one checked
    pub fn passed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.outcome.is_solvable())
    }

    pub fn verdict(&self) -> Verdict {
        if self.passed() {
            Verdict::Pass
        } else if self.entries.iter().any(|e| e.outcome.is_unsolvable()) {
            Verdict::Block
        } else {
            Verdict::Warn
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ReportDocument {
            recipe: &self.recipe,
            backend: self.backend,
            verdict: self.verdict(),
            passed: self.passed(),
            summary: self.summary(),
            configurations: &self.entries,
        })
    }

    /// Human-readable report suitable for review feedback
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let summary = self.summary();
        let _ = writeln!(
            out,
            "Solvability of {} ({} solver): {}",
            self.recipe,
            self.backend,
            self.verdict()
        );
        let _ = writeln!(
            out,
            "{} configuration(s): {} solvable, {} unsolvable, {} inconclusive",
            summary.total, summary.solvable, summary.unsolvable, summary.inconclusive
        );
        if self.entries.is_empty() {
            let _ = writeln!(out, "No configurations were checked.");
        }

        for entry in &self.entries {
            let _ = write!(out, "\n[{}] {}", entry.outcome.label(), entry.configuration);
            match &entry.outcome {
                Outcome::Solvable => {
                    let _ = writeln!(out);
                }
                Outcome::Unsolvable { phase, conflict } => {
                    match entry.phases.last().filter(|p| p.output != self.recipe) {
                        Some(record) => {
                            let _ = writeln!(out, " ({} phase of {})", phase, record.output);
                        }
                        None => {
                            let _ = writeln!(out, " ({} phase)", phase);
                        }
                    }
                    for line in conflict.to_string().lines() {
                        let _ = writeln!(out, "    {}", line);
                    }
                }
                Outcome::Inconclusive { phase, cause } => {
                    match phase {
                        Some(phase) => {
                            let _ = writeln!(out, " ({} phase)", phase);
                        }
                        None => {
                            let _ = writeln!(out);
                        }
                    }
                    let _ = writeln!(out, "    {}", cause);
                }
            }
        }
        out
    }
}
