// tests/sat_backend.rs

//! End-to-end checks with the in-process resolver against local channels.

mod common;

use common::{FakeChannel, recipe};
use solvcheck::check::{InconclusiveCause, Outcome, Verdict};
use solvcheck::config::CheckerConfig;
use solvcheck::package_spec::Phase;
use solvcheck::solver::BackendVariant;

/// Append a `[channels]` table pointing at `channel`
fn with_channel(body: &str, channel: &str) -> String {
    format!("{}\n[channels]\nsources = [{:?}]\n", body, channel)
}

fn config() -> CheckerConfig {
    let mut config = CheckerConfig::default();
    config.concurrency = 2;
    config.retry.max_attempts = 1;
    config
}

#[test]
fn test_conflicting_host_requirements_are_unsolvable() {
    let channel = FakeChannel::new()
        .package("linux-64", "foo", "2.0", &["bar >=1.2"])
        .package("linux-64", "foo", "1.0", &["bar"])
        .package("linux-64", "bar", "0.9", &[])
        .package("linux-64", "bar", "1.2", &[]);
    let path = channel.write();

    let recipe = recipe(&with_channel(
        r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64"]

[requirements]
host = ["foo >=2.0", "bar <1.0"]
"#,
        &path,
    ));

    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config(), None).unwrap();
    assert_eq!(report.entries.len(), 1);
    match &report.entries[0].outcome {
        Outcome::Unsolvable { phase, conflict } => {
            assert_eq!(*phase, Phase::Host);
            let names = conflict.implicated_names();
            assert!(names.contains(&"foo"));
            assert!(names.contains(&"bar"));
            assert!(!conflict.explanation.is_empty());
        }
        other => panic!("expected unsolvable, got {:?}", other),
    }
    assert_eq!(report.verdict(), Verdict::Block);
}

#[test]
fn test_python_matrix_with_pinned_numpy_passes() {
    let channel = FakeChannel::new()
        .package("linux-64", "python", "3.9.18", &[])
        .package("linux-64", "python", "3.10.13", &[])
        .package("linux-64", "numpy", "1.26.0", &["python >=3.9"])
        .package("linux-64", "pytest", "8.0.0", &["python >=3.8"]);
    let path = channel.write();

    let recipe = recipe(&with_channel(
        r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64"]

[[matrix.axes]]
name = "python"
values = ["3.9", "3.10"]

[requirements]
host = ["python {{ python }}", "numpy"]
run = ["python", "{{ pin_compatible('numpy', max_pin='x.x') }}"]
test = ["pytest"]
"#,
        &path,
    ));

    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config(), None).unwrap();
    assert_eq!(report.entries.len(), 2);
    for entry in &report.entries {
        assert_eq!(entry.outcome, Outcome::Solvable, "{}", entry.configuration);
    }
    assert!(report.passed());
    assert_eq!(report.verdict().exit_code(), 0);
}

#[test]
fn test_pinned_run_requirement_can_conflict() {
    // scipy needs an older numpy than the one pinned from host
    let channel = FakeChannel::new()
        .package("linux-64", "python", "3.9.18", &[])
        .package("linux-64", "numpy", "1.26.0", &["python >=3.9"])
        .package("linux-64", "scipy", "1.11.0", &["numpy >=1.22,<1.25"]);
    let path = channel.write();

    let recipe = recipe(&with_channel(
        r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64"]

[requirements]
host = ["python 3.9", "numpy"]
run = ["scipy", "{{ pin_compatible('numpy', max_pin='x.x') }}"]
"#,
        &path,
    ));

    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config(), None).unwrap();
    assert_eq!(report.entries[0].outcome.failed_phase(), Some(Phase::Run));
    assert!(report.entries[0].outcome.is_unsolvable());
}

#[test]
fn test_missing_subdir_is_inconclusive() {
    let channel = FakeChannel::new().package("linux-64", "zlib", "1.3", &[]);
    let path = channel.write();

    let recipe = recipe(&with_channel(
        r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64", "osx-arm64"]

[requirements]
host = ["zlib"]
"#,
        &path,
    ));

    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config(), None).unwrap();
    assert_eq!(report.get_by_label("linux-64"), Some(&Outcome::Solvable));
    assert!(matches!(
        report.get_by_label("osx-arm64"),
        Some(Outcome::Inconclusive {
            phase: Some(Phase::Host),
            cause: InconclusiveCause::Unsupported { .. }
        })
    ));
    assert_eq!(report.verdict(), Verdict::Warn);
}

#[test]
fn test_virtual_glibc_requirement() {
    let channel = FakeChannel::new()
        .package("linux-64", "libfoo", "1.0", &["__glibc >=2.17"])
        .package("linux-64", "libbar", "1.0", &["__glibc >=2.99"]);
    let path = channel.write();

    let body = |host: &str| {
        with_channel(
            &format!(
                r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64"]

[requirements]
host = ["{}"]
"#,
                host
            ),
            &path,
        )
    };

    let report = solvcheck::check(&recipe(&body("libfoo")), BackendVariant::Sat, &config(), None).unwrap();
    assert!(report.passed());

    let report = solvcheck::check(&recipe(&body("libbar")), BackendVariant::Sat, &config(), None).unwrap();
    assert!(report.entries[0].outcome.is_unsolvable());
}

#[test]
fn test_report_json_shape() {
    let channel = FakeChannel::new().package("linux-64", "zlib", "1.3", &[]);
    let path = channel.write();
    let recipe = recipe(&with_channel(
        r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64"]

[requirements]
host = ["zlib"]
run = ["openssl"]
"#,
        &path,
    ));

    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config(), None).unwrap();
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["recipe"], "mypkg");
    assert_eq!(json["backend"], "sat");
    assert_eq!(json["verdict"], "block");
    let entry = &json["configurations"][0];
    assert_eq!(entry["configuration"]["label"], "linux-64");
    assert_eq!(entry["outcome"]["status"], "unsolvable");
    assert_eq!(entry["outcome"]["phase"], "run");
}

#[test]
fn test_deep_unsatisfiable_host_blocks_without_retry() {
    let mut channel = FakeChannel::new();
    for (name, dep) in [("a", vec!["b"]), ("b", vec!["c"]), ("c", vec!["d"]), ("d", vec![])] {
        for minor in 0..60 {
            channel = channel.package("linux-64", name, &format!("1.{}", minor), &dep);
        }
    }
    let channel = channel
        .package("linux-64", "z", "1.0", &["y"])
        .package("linux-64", "y", "1.0", &["missing-pkg"]);
    let path = channel.write();

    let recipe = recipe(&with_channel(
        r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64"]

[requirements]
host = ["a", "z"]
"#,
        &path,
    ));

    let mut config = config();
    config.retry.max_attempts = 3;
    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config, None).unwrap();
    let entry = &report.entries[0];
    assert!(entry.outcome.is_unsolvable(), "{:?}", entry.outcome);
    assert_eq!(entry.outcome.failed_phase(), Some(Phase::Host));
    let host = entry.phases.iter().find(|p| p.phase == Phase::Host).unwrap();
    assert_eq!(host.attempts, 1);
    assert_eq!(report.verdict(), Verdict::Block);
}

const COMPILED: &str = r#"
[package]
name = "mypkg"
version = "0.1"

[matrix]
targets = ["linux-64"]

[requirements]
build = ["cc"]
host = ["zlib"]
run = ["zlib"]
"#;

fn exporting_channel() -> FakeChannel {
    FakeChannel::new()
        .package("linux-64", "cc", "1.0", &[])
        .package("linux-64", "zlib", "1.3", &[])
        .package("linux-64", "libcc-rt", "1.0", &[])
        .run_exports("linux-64", "cc", "1.0", serde_json::json!({"strong": ["libcc-rt >=99"]}))
}

#[test]
fn test_missing_run_export_blocks_host() {
    let channel = exporting_channel();
    let path = channel.write();
    let recipe = recipe(&with_channel(COMPILED, &path));

    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config(), None).unwrap();
    match &report.entries[0].outcome {
        Outcome::Unsolvable { phase, conflict } => {
            assert_eq!(*phase, Phase::Host);
            assert!(conflict.explanation.contains("libcc-rt"));
        }
        other => panic!("expected unsolvable, got {:?}", other),
    }
    assert_eq!(report.verdict(), Verdict::Block);
}

#[test]
fn test_ignored_run_export_passes() {
    let channel = exporting_channel();
    let path = channel.write();
    let body = format!("{}\n[build]\nignore_run_exports_from = [\"cc\"]\n", COMPILED);
    let recipe = recipe(&with_channel(&body, &path));

    let report = solvcheck::check(&recipe, BackendVariant::Sat, &config(), None).unwrap();
    assert_eq!(report.entries[0].outcome, Outcome::Solvable);
    assert!(report.passed());
}
