// src/commands/progress.rs
//! Progress bar for solvability checks
//!
//! Displays an overall bar counting finished configurations with a status
//! line below naming the phase being solved most recently.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use solvcheck::check::{Outcome, SolvabilityReport};
use solvcheck::matrix::BuildConfiguration;
use solvcheck::package_spec::Phase;
use solvcheck::progress::CheckProgress;
use std::time::Duration;

pub struct CheckBar {
    _multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
}

impl CheckBar {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%") {
            overall.set_style(style.progress_chars("##-"));
        }
        overall.set_message("Checking");

        let status = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
            status.set_style(style);
        }
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            _multi: multi,
            overall,
            status,
        }
    }
}

impl CheckProgress for CheckBar {
    fn start(&self, total: usize) {
        self.overall.set_length(total as u64);
    }

    fn phase_started(&self, configuration: &BuildConfiguration, phase: Phase) {
        self.status.set_message(format!("{}: solving {}", configuration, phase));
    }

    fn configuration_finished(&self, configuration: &BuildConfiguration, outcome: &Outcome) {
        if !outcome.is_solvable() {
            self.overall
                .println(format!("  {} {}", outcome.label(), configuration));
        }
        self.overall.inc(1);
    }

    fn finish(&self, report: &SolvabilityReport) {
        self.status.finish_and_clear();
        self.overall
            .finish_with_message(format!("Checked: {}", report.verdict()));
    }
}
