// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use solvcheck::check::{CheckOptions, RetryPolicy};
use solvcheck::matrix::Target;
use solvcheck::package_spec::Phase;
use solvcheck::recipe::{Recipe, parse_recipe};
use solvcheck::solver::{BackendVariant, SolveRequest, SolveResult, SolverBackend};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

type Responder = dyn Fn(&SolveRequest, Phase) -> SolveResult + Send + Sync;

/// One recorded backend call
#[derive(Debug, Clone)]
pub struct Call {
    pub subdir: String,
    pub phase: Phase,
    pub specs: Vec<String>,
    pub constraints: Vec<String>,
}

impl Call {
    pub fn requests(&self, name: &str) -> bool {
        self.specs.iter().any(|s| s.split_whitespace().next() == Some(name))
    }
}

/// Test double answering solves from a closure and recording every call
pub struct ScriptedBackend {
    responder: Box<Responder>,
    unsupported: Vec<String>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn new(responder: impl Fn(&SolveRequest, Phase) -> SolveResult + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            unsupported: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Backend that resolves everything
    pub fn always_resolved() -> Self {
        Self::new(|_, _| SolveResult::Resolved(Vec::new()))
    }

    /// Report `subdir` as unsupported
    pub fn unsupported(mut self, subdir: &str) -> Self {
        self.unsupported.push(subdir.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for_phase(&self, phase: Phase) -> usize {
        self.calls().iter().filter(|c| c.phase == phase).count()
    }
}

impl SolverBackend for ScriptedBackend {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Sat
    }

    fn describe_unsupported(&self, target: &Target) -> Option<String> {
        let subdir = target.subdir();
        self.unsupported
            .contains(&subdir)
            .then(|| format!("{} is not served by the test backend", subdir))
    }

    fn solve(&self, request: &SolveRequest) -> SolveResult {
        let phase = request.specs.first().map(|s| s.phase).unwrap_or(Phase::Run);
        self.calls.lock().unwrap().push(Call {
            subdir: request.target.subdir(),
            phase,
            specs: request.specs.iter().map(|s| s.to_string()).collect(),
            constraints: request.constraints.iter().map(|s| s.to_string()).collect(),
        });
        (self.responder)(request, phase)
    }
}

/// Parse a recipe from TOML text
pub fn recipe(content: &str) -> Recipe {
    parse_recipe(content).unwrap()
}

/// Options with instant retries, `attempts` per solve
pub fn options(attempts: u32) -> CheckOptions {
    CheckOptions {
        channels: vec!["test-channel".to_string()],
        concurrency: 4,
        solve_timeout: Some(Duration::from_secs(30)),
        retry: RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
        },
        ..CheckOptions::default()
    }
}

/// A local channel laid out as `<dir>/<subdir>/repodata.json`
///
/// Keep the value alive while the channel is in use.
pub struct FakeChannel {
    dir: TempDir,
    packages: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    run_exports: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            packages: BTreeMap::new(),
            run_exports: BTreeMap::new(),
        }
    }

    /// Add a package with build `0`
    pub fn package(self, subdir: &str, name: &str, version: &str, depends: &[&str]) -> Self {
        self.build(subdir, name, version, "0", 0, depends)
    }

    pub fn build(
        mut self,
        subdir: &str,
        name: &str,
        version: &str,
        build: &str,
        build_number: u64,
        depends: &[&str],
    ) -> Self {
        let filename = format!("{}-{}-{}.tar.bz2", name, version, build);
        let record = serde_json::json!({
            "name": name,
            "version": version,
            "build": build,
            "build_number": build_number,
            "depends": depends,
            "subdir": subdir,
        });
        self.packages
            .entry(subdir.to_string())
            .or_default()
            .insert(filename, record);
        self
    }

    /// Publish run exports for the build `0` of `name` in `run_exports.json`
    pub fn run_exports(mut self, subdir: &str, name: &str, version: &str, exports: serde_json::Value) -> Self {
        let filename = format!("{}-{}-0.tar.bz2", name, version);
        self.run_exports
            .entry(subdir.to_string())
            .or_default()
            .insert(filename, serde_json::json!({ "run_exports": exports }));
        self
    }

    /// Write every subdir plus an empty `noarch`; returns the channel path
    pub fn write(&self) -> String {
        let mut subdirs = self.packages.clone();
        subdirs.entry("noarch".to_string()).or_default();
        for (subdir, packages) in subdirs {
            let dir = self.dir.path().join(&subdir);
            fs::create_dir_all(&dir).unwrap();
            let repodata = serde_json::json!({
                "info": {"subdir": subdir},
                "packages": packages,
                "repodata_version": 1,
            });
            fs::write(dir.join("repodata.json"), repodata.to_string()).unwrap();
        }
        for (subdir, packages) in &self.run_exports {
            let exports = serde_json::json!({ "packages": packages });
            fs::write(self.dir.path().join(subdir).join("run_exports.json"), exports.to_string()).unwrap();
        }
        self.dir.path().to_str().unwrap().to_string()
    }
}
