// tests/check_workflow.rs

//! Orchestrator behavior against a scripted backend.

mod common;

use common::{ScriptedBackend, options, recipe};
use solvcheck::check::{CancelToken, Checker, InconclusiveCause, Outcome, PhaseStatus, Verdict};
use solvcheck::conflict::Conflict;
use solvcheck::matrix;
use solvcheck::package_spec::{PackageSpec, Phase};
use solvcheck::solver::{BackendFailure, ResolvedPackage, RunExports, SolveRequest, SolveResult};

const MATRIX_RECIPE: &str = r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[[matrix.axes]]
name = "python"
values = ["3.9", "3.10"]

[[matrix.axes]]
name = "cuda_compiler_version"
values = ["None", "11.8"]

[requirements]
host = [
    "python {{ python }}",
    "cudatoolkit {{ cuda_compiler_version }}  # [cuda_compiler_version != 'None']",
]
run = ["python"]
"#;

const PHASED_RECIPE: &str = r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[requirements]
build = ["make"]
host = ["zlib", "openssl >=3"]
run = ["zlib"]
test = ["pytest"]
"#;

fn conflict(requested: &SolveRequest) -> SolveResult {
    SolveResult::Unresolvable(Conflict {
        implicated: requested.specs.clone(),
        chain: Vec::new(),
        explanation: "scripted conflict".to_string(),
    })
}

fn has_spec(request: &SolveRequest, text: &str) -> bool {
    request.specs.iter().any(|s| s.to_string() == text)
}

#[test]
fn test_all_phases_resolved_is_solvable() {
    let recipe = recipe(PHASED_RECIPE);
    let backend = ScriptedBackend::always_resolved();
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].outcome, Outcome::Solvable);
    assert!(report.passed());
    assert_eq!(report.verdict(), Verdict::Pass);
    for phase in Phase::ALL {
        assert_eq!(backend.calls_for_phase(phase), 1, "{phase} solved once");
    }
    let order: Vec<Phase> = backend.calls().iter().map(|c| c.phase).collect();
    assert_eq!(order, Phase::ALL.to_vec());
}

#[test]
fn test_host_conflict_short_circuits_later_phases() {
    let recipe = recipe(PHASED_RECIPE);
    let backend = ScriptedBackend::new(|request, phase| {
        if phase == Phase::Host {
            conflict(request)
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    let entry = &report.entries[0];
    match &entry.outcome {
        Outcome::Unsolvable { phase, conflict } => {
            assert_eq!(*phase, Phase::Host);
            assert_eq!(conflict.implicated_names(), vec!["zlib", "openssl"]);
        }
        other => panic!("expected unsolvable, got {:?}", other),
    }
    assert_eq!(backend.calls_for_phase(Phase::Build), 1);
    assert_eq!(backend.calls_for_phase(Phase::Host), 1);
    assert_eq!(backend.calls_for_phase(Phase::Run), 0);
    assert_eq!(backend.calls_for_phase(Phase::Test), 0);
    assert_eq!(entry.phases.len(), 2);
    assert_eq!(report.verdict(), Verdict::Block);
}

#[test]
fn test_backend_error_until_cap_is_inconclusive() {
    let recipe = recipe(PHASED_RECIPE);
    let backend = ScriptedBackend::new(|_, phase| {
        if phase == Phase::Run {
            SolveResult::BackendError(BackendFailure::Timeout { seconds: 30 })
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    match &report.entries[0].outcome {
        Outcome::Inconclusive {
            phase,
            cause: InconclusiveCause::BackendError { attempts, last_cause },
        } => {
            assert_eq!(*phase, Some(Phase::Run));
            assert_eq!(*attempts, 3);
            assert_eq!(*last_cause, BackendFailure::Timeout { seconds: 30 });
        }
        other => panic!("expected inconclusive, got {:?}", other),
    }
    assert_eq!(backend.calls_for_phase(Phase::Run), 3);
    assert_eq!(backend.calls_for_phase(Phase::Test), 0);
    assert!(!report.passed());
    assert_eq!(report.verdict(), Verdict::Warn);
}

#[test]
fn test_transient_error_then_success() {
    let recipe = recipe(PHASED_RECIPE);
    let failures = std::sync::atomic::AtomicU32::new(0);
    let backend = ScriptedBackend::new(move |_, phase| {
        if phase == Phase::Host && failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
            SolveResult::BackendError(BackendFailure::index("HTTP 503"))
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();
    assert_eq!(report.entries[0].outcome, Outcome::Solvable);
    assert_eq!(backend.calls_for_phase(Phase::Host), 3);
    let host = report.entries[0].phases.iter().find(|p| p.phase == Phase::Host).unwrap();
    assert_eq!(host.attempts, 3);
    assert_eq!(host.status, PhaseStatus::Solved);
}

#[test]
fn test_two_axes_expand_to_four_independent_configurations() {
    let recipe = recipe(MATRIX_RECIPE);
    let backend = ScriptedBackend::always_resolved();
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    let labels: Vec<String> = report.entries.iter().map(|e| e.configuration.label()).collect();
    assert_eq!(
        labels,
        vec![
            "linux-64/python=3.9,cuda_compiler_version=None",
            "linux-64/python=3.9,cuda_compiler_version=11.8",
            "linux-64/python=3.10,cuda_compiler_version=None",
            "linux-64/python=3.10,cuda_compiler_version=11.8",
        ]
    );
    assert!(report.passed());
    assert_eq!(backend.calls_for_phase(Phase::Host), 4);
    assert_eq!(backend.calls_for_phase(Phase::Build), 0);

    let cuda_calls = backend.calls().iter().filter(|c| c.requests("cudatoolkit")).count();
    assert_eq!(cuda_calls, 2);
}

#[test]
fn test_gate_is_and_over_configurations() {
    let recipe = recipe(MATRIX_RECIPE);
    let backend = ScriptedBackend::new(|request, _| {
        if has_spec(request, "python 3.9.*") && has_spec(request, "cudatoolkit 11.8.*") {
            conflict(request)
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    let summary = report.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.solvable, 3);
    assert_eq!(summary.unsolvable, 1);
    assert!(!report.passed());
    assert!(
        report
            .get_by_label("linux-64/python=3.9,cuda_compiler_version=11.8")
            .unwrap()
            .is_unsolvable()
    );
}

#[test]
fn test_timeouts_on_one_target_leave_others_solvable() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64", "osx-64", "win-64"]

[requirements]
host = ["zlib"]
"#,
    );
    let backend = ScriptedBackend::new(|request, _| {
        if request.target.subdir() == "osx-64" {
            SolveResult::BackendError(BackendFailure::Timeout { seconds: 600 })
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    assert_eq!(report.get_by_label("linux-64"), Some(&Outcome::Solvable));
    assert_eq!(report.get_by_label("win-64"), Some(&Outcome::Solvable));
    assert!(matches!(
        report.get_by_label("osx-64"),
        Some(Outcome::Inconclusive {
            cause: InconclusiveCause::BackendError { attempts: 3, .. },
            ..
        })
    ));
    let osx_calls = backend.calls().iter().filter(|c| c.subdir == "osx-64").count();
    assert_eq!(osx_calls, 3);
    assert_eq!(report.verdict(), Verdict::Warn);
}

#[test]
fn test_render_error_is_inconclusive_and_not_solved() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64", "osx-64"]

[requirements]
host = ["cudatoolkit {{ cuda_version }}  # [linux]"]
run = ["zlib"]
"#,
    );
    let backend = ScriptedBackend::always_resolved();
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    assert_eq!(report.entries.len(), 2);
    match report.get_by_label("linux-64").unwrap() {
        Outcome::Inconclusive {
            phase: Some(Phase::Host),
            cause: InconclusiveCause::Render { message },
        } => assert!(message.contains("cuda_version")),
        other => panic!("expected render failure, got {:?}", other),
    }
    assert_eq!(report.get_by_label("osx-64"), Some(&Outcome::Solvable));
    assert!(backend.calls().iter().all(|c| c.subdir == "osx-64"));
}

#[test]
fn test_unsupported_target_is_inconclusive() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64", "win-64"]

[requirements]
run = ["zlib"]
"#,
    );
    let backend = ScriptedBackend::always_resolved().unsupported("win-64");
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    assert!(matches!(
        report.get_by_label("win-64"),
        Some(Outcome::Inconclusive {
            phase: None,
            cause: InconclusiveCause::Unsupported { .. }
        })
    ));
    assert_eq!(report.get_by_label("linux-64"), Some(&Outcome::Solvable));
    assert_eq!(report.verdict(), Verdict::Warn);
}

#[test]
fn test_unsupported_result_is_not_retried() {
    let recipe = recipe(PHASED_RECIPE);
    let backend = ScriptedBackend::new(|_, _| SolveResult::Unsupported("no index".to_string()));
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();
    assert!(report.entries[0].outcome.is_inconclusive());
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn test_empty_phases_are_skipped() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[requirements]
run = ["zlib"]
"#,
    );
    let backend = ScriptedBackend::always_resolved();
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    assert_eq!(report.entries[0].outcome, Outcome::Solvable);
    // test phase repeats the run requirements
    assert_eq!(backend.calls_for_phase(Phase::Run), 1);
    assert_eq!(backend.calls_for_phase(Phase::Test), 1);
    let statuses: Vec<PhaseStatus> = report.entries[0].phases.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![PhaseStatus::Empty, PhaseStatus::Empty, PhaseStatus::Solved, PhaseStatus::Solved]
    );
}

#[test]
fn test_pin_compatible_uses_host_solution() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[requirements]
host = ["numpy"]
run = ["{{ pin_compatible('numpy', max_pin='x.x') }}"]
run_constrained = ["bar <2"]
"#,
    );
    let backend = ScriptedBackend::new(|_, phase| {
        if phase == Phase::Host {
            SolveResult::Resolved(vec![ResolvedPackage::new("numpy", "1.22.4", "py310h1", 0)])
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();
    assert!(report.passed());

    let run = backend.calls().into_iter().find(|c| c.phase == Phase::Run).unwrap();
    assert_eq!(run.specs, vec!["numpy >=1.22.4,<1.23a0"]);
    assert_eq!(run.constraints, vec!["bar <2"]);
}

#[test]
fn test_cross_build_solves_build_phase_on_build_platform() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-aarch64"]

[matrix.build_platform]
"linux-aarch64" = "linux-64"

[requirements]
build = ["{{ compiler('c') }}"]
host = ["zlib"]
"#,
    );
    let backend = ScriptedBackend::always_resolved();
    Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    let calls = backend.calls();
    let build = calls.iter().find(|c| c.phase == Phase::Build).unwrap();
    let host = calls.iter().find(|c| c.phase == Phase::Host).unwrap();
    assert_eq!(build.subdir, "linux-64");
    assert_eq!(build.specs, vec!["gcc_linux-aarch64"]);
    assert_eq!(host.subdir, "linux-aarch64");
}

#[test]
fn test_reports_are_deterministic() {
    let recipe = recipe(MATRIX_RECIPE);
    let backend = ScriptedBackend::new(|request, _| {
        if has_spec(request, "python 3.10.*") {
            conflict(request)
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let first = Checker::new(&backend, options(1)).check(&recipe, None).unwrap();
    let second = Checker::new(&backend, options(1)).check(&recipe, None).unwrap();
    assert_eq!(first.entries.len(), second.entries.len());
    for (a, b) in first.entries.iter().zip(&second.entries) {
        assert_eq!(a.configuration, b.configuration);
        assert_eq!(a.outcome, b.outcome);
    }
    assert_eq!(first.render_text(), second.render_text());
}

#[test]
fn test_explicit_configuration_subset() {
    let recipe = recipe(MATRIX_RECIPE);
    let all = matrix::expand(&recipe).unwrap();
    let subset = matrix::select(all, &["linux-64/python=3.10,cuda_compiler_version=None".to_string()]).unwrap();
    let backend = ScriptedBackend::always_resolved();
    let report = Checker::new(&backend, options(3)).check(&recipe, Some(subset)).unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(backend.calls_for_phase(Phase::Host), 1);
}

#[test]
fn test_empty_expansion_is_not_a_pass() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["win-64"]

[[matrix.skip]]
when = "win"

[requirements]
run = ["zlib"]
"#,
    );
    let backend = ScriptedBackend::always_resolved();
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();
    assert!(report.entries.is_empty());
    assert!(!report.passed());
    assert_eq!(report.verdict(), Verdict::Warn);
    assert!(backend.calls().is_empty());
}

#[test]
fn test_cancelled_before_start() {
    let recipe = recipe(MATRIX_RECIPE);
    let mut opts = options(3);
    opts.cancel = CancelToken::new();
    opts.cancel.cancel();
    let backend = ScriptedBackend::always_resolved();
    let report = Checker::new(&backend, opts).check(&recipe, None).unwrap();

    assert_eq!(report.entries.len(), 4);
    for entry in &report.entries {
        assert_eq!(
            entry.outcome,
            Outcome::Inconclusive {
                phase: None,
                cause: InconclusiveCause::Cancelled
            }
        );
    }
    assert!(backend.calls().is_empty());
}

#[test]
fn test_cancellation_keeps_completed_outcomes() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64", "osx-64"]

[requirements]
host = ["zlib"]
run = ["zlib"]
"#,
    );
    let mut opts = options(3);
    opts.concurrency = 1;
    let cancel = opts.cancel.clone();
    let backend = ScriptedBackend::new(move |request, _| {
        if request.target.subdir() == "osx-64" {
            cancel.cancel();
            SolveResult::BackendError(BackendFailure::Cancelled)
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, opts).check(&recipe, None).unwrap();

    assert_eq!(report.get_by_label("linux-64"), Some(&Outcome::Solvable));
    assert_eq!(
        report.get_by_label("osx-64"),
        Some(&Outcome::Inconclusive {
            phase: Some(Phase::Host),
            cause: InconclusiveCause::Cancelled
        })
    );
    let osx_calls = backend.calls().iter().filter(|c| c.subdir == "osx-64").count();
    assert_eq!(osx_calls, 1);
}

#[test]
fn test_requested_specs_carry_their_phase() {
    let recipe = recipe(PHASED_RECIPE);
    let configuration = matrix::expand(&recipe).unwrap().remove(0);
    let specs = solvcheck::recipe::render(&recipe, &configuration, Phase::Host).unwrap();
    assert_eq!(
        specs,
        vec![
            PackageSpec::parse("zlib", Phase::Host).unwrap(),
            PackageSpec::parse("openssl >=3", Phase::Host).unwrap()
        ]
    );
}

const COMPILED_RECIPE: &str = r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[requirements]
build = ["gcc_linux-64"]
host = ["zlib"]
run = ["zlib"]
"#;

fn compiler_and_zlib(_: &SolveRequest, phase: Phase) -> SolveResult {
    match phase {
        Phase::Build => SolveResult::Resolved(vec![
            ResolvedPackage::new("gcc_linux-64", "12.3.0", "h0", 0).with_run_exports(RunExports {
                strong: vec!["libgcc-ng >=12".to_string()],
                ..RunExports::default()
            }),
        ]),
        Phase::Host => SolveResult::Resolved(vec![
            ResolvedPackage::new("zlib", "1.3.1", "h4ab18f5_1", 1).with_run_exports(RunExports {
                weak: vec!["libzlib >=1.3.1,<2.0a0".to_string()],
                ..RunExports::default()
            }),
        ]),
        _ => SolveResult::Resolved(Vec::new()),
    }
}

#[test]
fn test_run_exports_reach_later_phases() {
    let recipe = recipe(COMPILED_RECIPE);
    let backend = ScriptedBackend::new(compiler_and_zlib);
    let report = Checker::new(&backend, options(1)).check(&recipe, None).unwrap();
    assert!(report.passed());

    let calls = backend.calls();
    let host = calls.iter().find(|c| c.phase == Phase::Host).unwrap();
    assert_eq!(host.specs, vec!["zlib", "libgcc-ng >=12"]);
    let run = calls.iter().find(|c| c.phase == Phase::Run).unwrap();
    assert_eq!(run.specs, vec!["zlib", "libgcc-ng >=12", "libzlib >=1.3.1,<2.0a0"]);
}

#[test]
fn test_ignored_run_exports_are_not_propagated() {
    let recipe = recipe(&format!(
        "{}
[build]
ignore_run_exports_from = [\"gcc_linux-64\"]
ignore_run_exports = [\"libzlib\"]
",
        COMPILED_RECIPE
    ));
    let backend = ScriptedBackend::new(compiler_and_zlib);
    let report = Checker::new(&backend, options(1)).check(&recipe, None).unwrap();
    assert!(report.passed());

    let calls = backend.calls();
    let host = calls.iter().find(|c| c.phase == Phase::Host).unwrap();
    assert_eq!(host.specs, vec!["zlib"]);
    let run = calls.iter().find(|c| c.phase == Phase::Run).unwrap();
    assert_eq!(run.specs, vec!["zlib"]);
}

#[test]
fn test_pin_run_as_build_uses_host_version() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[matrix.pin_run_as_build]
python = "x.x"

[requirements]
host = ["python"]
run = ["python", "six"]
"#,
    );
    let backend = ScriptedBackend::new(|_, phase| {
        if phase == Phase::Host {
            SolveResult::Resolved(vec![ResolvedPackage::new("python", "3.10.13", "h1_cpython", 0)])
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(1)).check(&recipe, None).unwrap();
    assert!(report.passed());

    let run = backend.calls().into_iter().find(|c| c.phase == Phase::Run).unwrap();
    assert_eq!(run.specs, vec!["python >=3.10,<3.11a0", "six"]);
}

#[test]
fn test_unsolvable_second_output_blocks() {
    let recipe = recipe(
        r#"
[package]
name = "foo"
version = "1.0"

[matrix]
targets = ["linux-64"]

[requirements]
host = ["zlib"]
run = ["zlib"]

[[outputs]]
name = "libfoo"

[outputs.requirements]
run = ["zlib", "missing-lib"]
"#,
    );
    let backend = ScriptedBackend::new(|request, phase| {
        if phase == Phase::Run && has_spec(request, "missing-lib") {
            conflict(request)
        } else {
            SolveResult::Resolved(Vec::new())
        }
    });
    let report = Checker::new(&backend, options(3)).check(&recipe, None).unwrap();

    let entry = &report.entries[0];
    match &entry.outcome {
        Outcome::Unsolvable { phase, conflict } => {
            assert_eq!(*phase, Phase::Run);
            assert!(conflict.implicated_names().contains(&"missing-lib"));
        }
        other => panic!("expected unsolvable, got {:?}", other),
    }
    assert_eq!(report.verdict(), Verdict::Block);

    let main: Vec<_> = entry.phases.iter().filter(|p| p.output == "foo").collect();
    assert!(main.iter().all(|p| p.status != PhaseStatus::Failed));
    assert!(main.iter().any(|p| p.phase == Phase::Run && p.status == PhaseStatus::Solved));
    let last = entry.phases.last().unwrap();
    assert_eq!(last.output, "libfoo");
    assert_eq!(last.phase, Phase::Run);
    assert_eq!(last.status, PhaseStatus::Failed);
    assert_eq!(backend.calls_for_phase(Phase::Run), 2);
}
