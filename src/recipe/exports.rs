// src/recipe/exports.rs

//! Run exports propagation
//!
//! Packages requested in the build and host phases can export requirements
//! onto the phases that follow. Only packages named in the phase's own
//! requirements export anything; their transitive dependencies do not.
//!
//! With a host section:
//! - strong build exports join host, and run unless the package is noarch
//! - weak and strong host exports join run (noarch packages take the
//!   `noarch` exports instead)
//! - constraint exports of both phases join `run_constrained`
//!
//! Without one, the build environment doubles as host and its weak, strong
//! and constraint exports go straight to run.

use crate::package_spec::PackageSpec;
use crate::recipe::format::BuildSection;
use crate::solver::{ResolvedPackage, RunExports};

/// Requirements added to the later phases of one output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Propagated {
    pub host: Vec<String>,
    pub run: Vec<String>,
    pub run_constrained: Vec<String>,
}

/// Exports of the solved packages that `requested` names
pub fn collect(solution: &[ResolvedPackage], requested: &[PackageSpec], build: &BuildSection) -> RunExports {
    let mut exports = RunExports::default();
    for package in solution {
        if !requested.iter().any(|s| s.name == package.name) {
            continue;
        }
        if build.ignore_run_exports_from.iter().any(|n| first_name(n) == package.name) {
            continue;
        }
        exports.merge(&package.run_exports.without(&build.ignore_run_exports));
    }
    exports
}

fn first_name(spec: &str) -> &str {
    spec.split_whitespace().next().unwrap_or(spec)
}

/// Distribute build and host exports over host, run and `run_constrained`
pub fn propagate(build: &RunExports, host: &RunExports, has_host: bool, noarch: bool) -> Propagated {
    let mut out = Propagated::default();
    extend(&mut out.run_constrained, &build.strong_constrains);

    if has_host {
        extend(&mut out.host, &build.strong);
        if !noarch {
            extend(&mut out.run, &build.strong);
        }

        if noarch {
            extend(&mut out.run, &host.noarch);
        } else {
            extend(&mut out.run, &host.weak);
            extend(&mut out.run, &host.strong);
        }
        extend(&mut out.run_constrained, &host.weak_constrains);
        extend(&mut out.run_constrained, &host.strong_constrains);
    } else if noarch {
        extend(&mut out.run, &build.noarch);
    } else {
        extend(&mut out.run, &build.strong);
        extend(&mut out.run, &build.weak);
        extend(&mut out.run_constrained, &build.weak_constrains);
    }
    out
}

fn extend(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}
