// src/progress.rs

//! Progress reporting for a solvability check
//!
//! The orchestrator reports through the [`CheckProgress`] trait from its
//! worker threads. Implementations:
//! - `SilentProgress`: counts events, prints nothing (library default)
//! - `LogProgress`: one `tracing` line per finished configuration
//!
//! The binary adds an `indicatif` bar on top of the same trait.

use crate::check::{Outcome, SolvabilityReport};
use crate::matrix::BuildConfiguration;
use crate::package_spec::Phase;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Receives events while configurations are being checked
///
/// Implementations must be thread-safe; events for different
/// configurations arrive concurrently and in no particular order.
pub trait CheckProgress: Send + Sync {
    /// Called once before any configuration starts
    fn start(&self, total: usize);

    /// A phase of `configuration` is about to be solved
    fn phase_started(&self, _configuration: &BuildConfiguration, _phase: Phase) {}

    /// `configuration` reached a terminal outcome
    fn configuration_finished(&self, configuration: &BuildConfiguration, outcome: &Outcome);

    /// Called once after every configuration has an outcome
    fn finish(&self, _report: &SolvabilityReport) {}
}

/// No-op progress
#[derive(Debug, Default)]
pub struct SilentProgress {
    total: AtomicU64,
    finished: AtomicU64,
    done: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Configurations that reached an outcome so far
    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }
}

impl CheckProgress for SilentProgress {
    fn start(&self, total: usize) {
        self.total.store(total as u64, Ordering::Relaxed);
    }

    fn configuration_finished(&self, _configuration: &BuildConfiguration, _outcome: &Outcome) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, _report: &SolvabilityReport) {
        self.done.store(true, Ordering::Relaxed);
    }
}

/// Logs progress to tracing at info level
///
/// Useful in CI logs where a progress bar would only add noise.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: AtomicU64,
    finished: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckProgress for LogProgress {
    fn start(&self, total: usize) {
        self.total.store(total as u64, Ordering::Relaxed);
        info!("Checking {} configuration(s)", total);
    }

    fn configuration_finished(&self, configuration: &BuildConfiguration, outcome: &Outcome) {
        let done = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "[{}/{}] {}: {}",
            done,
            self.total.load(Ordering::Relaxed),
            configuration,
            outcome.label()
        );
    }

    fn finish(&self, report: &SolvabilityReport) {
        info!("Check finished: {}", report.verdict());
    }
}
