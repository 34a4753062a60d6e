// src/solver/resolver.rs

//! In-process dependency resolver
//!
//! Candidates from the channel indices are grouped by name in a [`Pool`] and
//! handed to `resolvo` through a [`DependencyProvider`]. Preference order is
//! newest version, then highest build number, then newest timestamp.
//! `constrains` entries of chosen records and request-level constraints
//! restrict candidates without requiring them.
//!
//! An unsatisfiable request comes back as a [`ProblemTree`] built from the
//! solver's own explanation. The search can be stopped by a deadline or a
//! cancellation token; it has no other bound.

use crate::check::CancelToken;
use crate::conflict::ProblemTree;
use crate::error::{Error, Result};
use crate::package_spec::{PackageSpec, Phase};
use crate::solver::RunExports;
use crate::solver::index::PackageRecord;
use crate::version::{Version, VersionSpec};
use glob::Pattern;
use resolvo::utils::{Pool as InternPool, VersionSet};
use resolvo::{
    Candidates, Condition, ConditionId, Dependencies, DependencyProvider, Interner, KnownDependencies, NameId,
    Requirement, SolvableId, Solver, SolverCache, StringId, UnsolvableOrCancelled, VersionSetId, VersionSetUnionId,
};
use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, trace};

/// A compiled package match specification
#[derive(Debug, Clone)]
pub struct MatchSpec {
    pub name: String,
    pub version: VersionSpec,
    pub build: Option<Pattern>,
    text: String,
}

impl MatchSpec {
    /// Parse a dependency string as found in `repodata.json`
    pub fn parse(s: &str) -> Result<Self> {
        // The phase tag is irrelevant for index dependencies
        Self::from_spec(&PackageSpec::parse(s, Phase::Run)?)
    }

    pub fn from_spec(spec: &PackageSpec) -> Result<Self> {
        let build = match &spec.build {
            Some(b) => Some(Pattern::new(b).map_err(|e| Error::InvalidSpec {
                spec: spec.to_string(),
                reason: format!("invalid build pattern: {}", e),
            })?),
            None => None,
        };
        Ok(Self {
            name: spec.name.clone(),
            version: spec.version_spec()?,
            build,
            text: spec.to_string(),
        })
    }

    pub fn matches(&self, candidate: &Candidate) -> bool {
        self.name == candidate.name
            && self.version.matches(&candidate.version)
            && self.build.as_ref().is_none_or(|p| p.matches(&candidate.build))
    }

    /// Everything after the name, `*` when unconstrained
    pub fn constraint(&self) -> &str {
        let rest = self.text.strip_prefix(self.name.as_str()).unwrap_or(&self.text).trim();
        if rest.is_empty() { "*" } else { rest }
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A record that can be chosen by the resolver
#[derive(Debug)]
pub struct Candidate {
    pub name: String,
    pub version: Version,
    pub build: String,
    pub build_number: u64,
    pub timestamp: u64,
    pub channel: String,
    pub subdir: String,
    pub filename: String,
    pub run_exports: RunExports,
    depends: Vec<String>,
    constrains: Vec<String>,
    parsed: OnceLock<Option<Relations>>,
}

#[derive(Debug)]
struct Relations {
    depends: Vec<MatchSpec>,
    constrains: Vec<MatchSpec>,
}

impl Candidate {
    /// Build from an index record; `None` when the version does not parse
    pub fn from_record(record: PackageRecord, channel: &str) -> Option<Self> {
        let version = Version::parse(&record.version).ok()?;
        Some(Self {
            name: record.name,
            version,
            build: record.build,
            build_number: record.build_number,
            timestamp: record.timestamp.unwrap_or(0),
            channel: channel.to_string(),
            subdir: record.subdir.unwrap_or_default(),
            filename: record.filename,
            run_exports: record.run_exports,
            depends: record.depends,
            constrains: record.constrains,
            parsed: OnceLock::new(),
        })
    }

    /// Preference order: better candidates sort first
    fn preference(&self, other: &Self) -> Ordering {
        other
            .version
            .cmp(&self.version)
            .then(other.build_number.cmp(&self.build_number))
            .then(other.timestamp.cmp(&self.timestamp))
    }

    /// Dependencies parsed on first use; `None` if any of them is unreadable
    fn relations(&self) -> Option<&Relations> {
        self.parsed
            .get_or_init(|| {
                let parse_all = |list: &[String]| list.iter().map(|d| MatchSpec::parse(d)).collect::<Result<Vec<_>>>();
                match (parse_all(&self.depends), parse_all(&self.constrains)) {
                    (Ok(depends), Ok(constrains)) => Some(Relations { depends, constrains }),
                    (Err(e), _) | (_, Err(e)) => {
                        trace!(candidate = %self, error = %e, "Unusable dependency metadata");
                        None
                    }
                }
            })
            .as_ref()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.version, self.build)
    }
}

/// Candidates grouped by name, in preference order
#[derive(Debug, Default)]
pub struct Pool {
    by_name: HashMap<String, Vec<Arc<Candidate>>>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one channel's candidates
    ///
    /// Channels must be added in priority order. A name already provided by
    /// an earlier channel hides every record of that name in this one.
    pub fn add_channel<'a>(&mut self, candidates: impl IntoIterator<Item = &'a Arc<Candidate>>) {
        let provided: HashSet<String> = self.by_name.keys().cloned().collect();
        let mut touched = HashSet::new();
        for candidate in candidates {
            if provided.contains(&candidate.name) {
                continue;
            }
            touched.insert(candidate.name.clone());
            self.by_name
                .entry(candidate.name.clone())
                .or_default()
                .push(Arc::clone(candidate));
        }
        for name in touched {
            if let Some(list) = self.by_name.get_mut(&name) {
                list.sort_by(|a, b| a.preference(b));
            }
        }
    }

    pub fn candidates(&self, name: &str) -> &[Arc<Candidate>] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Bounds on a search
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

/// Why a search stopped without an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAbort {
    Timeout,
    Cancelled,
}

/// Answer of a completed search
#[derive(Debug)]
pub enum Resolution {
    Solved(Vec<Arc<Candidate>>),
    Conflict(ProblemTree),
}

/// Find one set of candidates satisfying `specs` under `constraints`
pub fn solve(
    pool: &Pool,
    specs: &[MatchSpec],
    constraints: &[MatchSpec],
    limits: SearchLimits,
) -> std::result::Result<Resolution, SearchAbort> {
    let provider = PoolProvider::new(pool, limits);
    if let Some(reason) = provider.should_cancel_with_value() {
        return Err(abort_reason(reason));
    }

    let problem = resolvo::Problem::new()
        .requirements(
            specs
                .iter()
                .map(|spec| Requirement::from(provider.version_set(spec)).into())
                .collect(),
        )
        .constraints(constraints.iter().map(|spec| provider.version_set(spec)).collect());

    let mut solver = Solver::new(provider);
    match solver.solve(problem) {
        Ok(solvables) => {
            let provider = solver.provider();
            let chosen: Vec<Arc<Candidate>> = solvables
                .into_iter()
                .map(|id| Arc::clone(&provider.interned.resolve_solvable(id).record))
                .collect();
            debug!(chosen = chosen.len(), "Search finished");
            Ok(Resolution::Solved(chosen))
        }
        Err(UnsolvableOrCancelled::Unsolvable(conflict)) => {
            let report = conflict.display_user_friendly(&solver).to_string();
            let known = solver.provider().names.borrow();
            debug!("Search found no solution");
            Ok(Resolution::Conflict(ProblemTree::from_report(&report, &known)))
        }
        Err(UnsolvableOrCancelled::Cancelled(reason)) => Err(abort_reason(reason)),
    }
}

fn abort_reason(value: Box<dyn Any>) -> SearchAbort {
    value.downcast::<SearchAbort>().map(|r| *r).unwrap_or(SearchAbort::Cancelled)
}

/// A match spec as a resolvo version set, compared by its text
#[derive(Debug, Clone)]
struct SpecSet(Arc<MatchSpec>);

impl PartialEq for SpecSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.text == other.0.text
    }
}

impl Eq for SpecSet {}

impl Hash for SpecSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.text.hash(state);
    }
}

impl fmt::Display for SpecSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.constraint())
    }
}

impl VersionSet for SpecSet {
    type V = Arc<Candidate>;
}

/// Exposes a [`Pool`] to resolvo, interning candidates on demand
struct PoolProvider<'p> {
    pool: &'p Pool,
    interned: InternPool<SpecSet>,
    /// Every package name handed to the solver
    names: RefCell<HashSet<String>>,
    limits: SearchLimits,
}

impl<'p> PoolProvider<'p> {
    fn new(pool: &'p Pool, limits: SearchLimits) -> Self {
        Self {
            pool,
            interned: InternPool::default(),
            names: RefCell::new(HashSet::new()),
            limits,
        }
    }

    fn name(&self, name: &str) -> NameId {
        self.names.borrow_mut().insert(name.to_string());
        self.interned.intern_package_name(name.to_string())
    }

    fn version_set(&self, spec: &MatchSpec) -> VersionSetId {
        let name = self.name(&spec.name);
        self.interned.intern_version_set(name, SpecSet(Arc::new(spec.clone())))
    }

    fn candidate(&self, id: SolvableId) -> &Arc<Candidate> {
        &self.interned.resolve_solvable(id).record
    }
}

impl Interner for PoolProvider<'_> {
    fn display_solvable(&self, solvable: SolvableId) -> impl Display + '_ {
        self.candidate(solvable).to_string()
    }

    fn display_merged_solvables(&self, solvables: &[SolvableId]) -> impl Display + '_ {
        let Some(first) = solvables.first() else {
            return String::new();
        };
        let versions: Vec<String> = solvables
            .iter()
            .map(|&s| {
                let c = self.candidate(s);
                format!("{} {}", c.version, c.build)
            })
            .collect();
        format!("{} {}", self.candidate(*first).name, versions.join(" | "))
    }

    fn display_name(&self, name: NameId) -> impl Display + '_ {
        self.interned.resolve_package_name(name).clone()
    }

    fn display_version_set(&self, version_set: VersionSetId) -> impl Display + '_ {
        self.interned.resolve_version_set(version_set).to_string()
    }

    fn display_string(&self, string_id: StringId) -> impl Display + '_ {
        self.interned.resolve_string(string_id).to_string()
    }

    fn version_set_name(&self, version_set: VersionSetId) -> NameId {
        self.interned.resolve_version_set_package_name(version_set)
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.interned.resolve_solvable(solvable).name
    }

    fn version_sets_in_union(&self, version_set_union: VersionSetUnionId) -> impl Iterator<Item = VersionSetId> {
        self.interned.resolve_version_set_union(version_set_union)
    }

    fn resolve_condition(&self, condition: ConditionId) -> Condition {
        self.interned.resolve_condition(condition).clone()
    }
}

impl DependencyProvider for PoolProvider<'_> {
    async fn filter_candidates(
        &self,
        candidates: &[SolvableId],
        version_set: VersionSetId,
        inverse: bool,
    ) -> Vec<SolvableId> {
        let spec = &self.interned.resolve_version_set(version_set).0;
        candidates
            .iter()
            .copied()
            .filter(|&id| spec.matches(self.candidate(id)) != inverse)
            .collect()
    }

    async fn get_candidates(&self, name: NameId) -> Option<Candidates> {
        let name = self.interned.resolve_package_name(name).clone();
        let found = self.pool.candidates(&name);
        if found.is_empty() {
            return None;
        }
        let name_id = self.name(&name);
        let candidates = found
            .iter()
            .map(|c| self.interned.intern_solvable(name_id, Arc::clone(c)))
            .collect();
        Some(Candidates {
            candidates,
            ..Default::default()
        })
    }

    async fn sort_candidates(&self, _solver: &SolverCache<Self>, solvables: &mut [SolvableId]) {
        solvables.sort_by(|&a, &b| self.candidate(a).preference(self.candidate(b)));
    }

    async fn get_dependencies(&self, solvable: SolvableId) -> Dependencies {
        let candidate = Arc::clone(self.candidate(solvable));
        let Some(relations) = candidate.relations() else {
            let reason = self
                .interned
                .intern_string(format!("{} has unreadable dependency metadata", candidate));
            return Dependencies::Unknown(reason);
        };

        let mut known = KnownDependencies::default();
        for dep in &relations.depends {
            known.requirements.push(Requirement::from(self.version_set(dep)).into());
        }
        for constraint in &relations.constrains {
            known.constrains.push(self.version_set(constraint));
        }
        Dependencies::Known(known)
    }

    fn should_cancel_with_value(&self) -> Option<Box<dyn Any>> {
        if self.limits.cancel.is_cancelled() {
            return Some(Box::new(SearchAbort::Cancelled));
        }
        if self.limits.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(Box::new(SearchAbort::Timeout));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: &str, depends: &[&str]) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            version: version.to_string(),
            build: "0".to_string(),
            build_number: 0,
            depends: depends.iter().map(|d| d.to_string()).collect(),
            constrains: Vec::new(),
            timestamp: None,
            subdir: None,
            filename: String::new(),
            run_exports: RunExports::default(),
        }
    }

    fn channel(records: Vec<PackageRecord>, name: &str) -> Vec<Arc<Candidate>> {
        records
            .into_iter()
            .filter_map(|r| Candidate::from_record(r, name))
            .map(Arc::new)
            .collect()
    }

    fn specs(list: &[&str]) -> Vec<MatchSpec> {
        list.iter().map(|s| MatchSpec::parse(s).unwrap()).collect()
    }

    fn run(pool: &Pool, requested: &[&str]) -> Resolution {
        solve(pool, &specs(requested), &[], SearchLimits::default()).unwrap()
    }

    fn chosen(resolution: Resolution) -> Vec<String> {
        match resolution {
            Resolution::Solved(c) => {
                let mut labels: Vec<String> = c.iter().map(|c| format!("{} {}", c.name, c.version)).collect();
                labels.sort();
                labels
            }
            Resolution::Conflict(tree) => panic!("unexpected conflict: {tree}"),
        }
    }

    fn conflict(resolution: Resolution) -> ProblemTree {
        match resolution {
            Resolution::Conflict(tree) => tree,
            Resolution::Solved(c) => panic!("expected a conflict, got {} packages", c.len()),
        }
    }

    fn sample_pool() -> Pool {
        let mut pool = Pool::new();
        pool.add_channel(&channel(
            vec![
                record("foo", "1.0", &["bar"]),
                record("foo", "2.0", &["bar >=1.2"]),
                record("bar", "0.9", &[]),
                record("bar", "1.2", &[]),
            ],
            "test",
        ));
        pool
    }

    #[test]
    fn test_match_spec_constraint() {
        assert_eq!(MatchSpec::parse("numpy").unwrap().constraint(), "*");
        assert_eq!(MatchSpec::parse("numpy >=1.20").unwrap().constraint(), ">=1.20");
    }

    #[test]
    fn test_prefers_newest() {
        let pool = sample_pool();
        assert_eq!(chosen(run(&pool, &["foo"])), vec!["bar 1.2", "foo 2.0"]);
    }

    #[test]
    fn test_backtracks_to_older_version() {
        let pool = sample_pool();
        assert_eq!(chosen(run(&pool, &["foo", "bar <1.0"])), vec!["bar 0.9", "foo 1.0"]);
    }

    #[test]
    fn test_conflict_names_both_sides() {
        let pool = sample_pool();
        let tree = conflict(run(&pool, &["foo >=2.0", "bar <1.0"]));
        let names = tree.names();
        assert!(names.contains(&"foo"));
        assert!(names.contains(&"bar"));
    }

    #[test]
    fn test_nothing_provides() {
        let pool = sample_pool();
        let tree = conflict(run(&pool, &["missing"]));
        assert_eq!(tree.names(), vec!["missing"]);
    }

    #[test]
    fn test_request_constraints() {
        let pool = sample_pool();
        let resolution = solve(&pool, &specs(&["foo"]), &specs(&["bar <1.0"]), SearchLimits::default()).unwrap();
        assert_eq!(chosen(resolution), vec!["bar 0.9", "foo 1.0"]);

        // constraints on packages that are not installed are ignored
        let resolution = solve(&pool, &specs(&["bar"]), &specs(&["baz <1"]), SearchLimits::default()).unwrap();
        assert_eq!(chosen(resolution), vec!["bar 1.2"]);
    }

    #[test]
    fn test_record_constrains() {
        let mut pool = Pool::new();
        let mut qux = record("qux", "1.0", &[]);
        qux.constrains = vec!["bar <1.0".to_string()];
        pool.add_channel(&channel(vec![qux, record("bar", "1.2", &[])], "test"));
        assert!(!conflict(run(&pool, &["bar", "qux"])).is_empty());
    }

    #[test]
    fn test_strict_channel_priority() {
        let mut pool = Pool::new();
        pool.add_channel(&channel(vec![record("bar", "0.9", &[])], "high"));
        pool.add_channel(&channel(vec![record("bar", "1.2", &[]), record("baz", "1.0", &[])], "low"));
        assert_eq!(chosen(run(&pool, &["bar", "baz"])), vec!["bar 0.9", "baz 1.0"]);
        assert!(matches!(run(&pool, &["bar >=1"]), Resolution::Conflict(_)));
    }

    #[test]
    fn test_build_string_matching() {
        let mut pool = Pool::new();
        let mut py = record("python", "3.10.4", &[]);
        py.build = "h12_cpython".to_string();
        let mut pypy = record("python", "3.10.12", &[]);
        pypy.build = "0_pypy".to_string();
        pool.add_channel(&channel(vec![py, pypy], "test"));
        assert_eq!(chosen(run(&pool, &["python 3.10.* *_cpython"])), vec!["python 3.10.4"]);
    }

    #[test]
    fn test_deep_unsatisfiable_request_is_a_conflict() {
        let mut records = Vec::new();
        let chain = [("a", Some("b")), ("b", Some("c")), ("c", Some("d")), ("d", None)];
        for (name, dep) in chain {
            for minor in 0..60 {
                let depends: Vec<&str> = dep.into_iter().collect();
                records.push(record(name, &format!("1.{}", minor), &depends));
            }
        }
        records.push(record("z", "1.0", &["y"]));
        records.push(record("y", "1.0", &["missing-pkg"]));

        let mut pool = Pool::new();
        pool.add_channel(&channel(records, "test"));

        let tree = conflict(run(&pool, &["a", "z"]));
        let names = tree.names();
        assert!(names.contains(&"z"));
        assert!(names.contains(&"missing-pkg"));
    }

    #[test]
    fn test_unreadable_metadata_skips_candidate() {
        let mut pool = Pool::new();
        pool.add_channel(&channel(
            vec![record("foo", "2.0", &["bar >=>=1"]), record("foo", "1.0", &[])],
            "test",
        ));
        assert_eq!(chosen(run(&pool, &["foo"])), vec!["foo 1.0"]);
    }

    #[test]
    fn test_cancelled() {
        let pool = sample_pool();
        let cancel = CancelToken::new();
        cancel.cancel();
        let limits = SearchLimits { deadline: None, cancel };
        let result = solve(&pool, &specs(&["foo"]), &[], limits);
        assert!(matches!(result, Err(SearchAbort::Cancelled)));
    }

    #[test]
    fn test_deadline_passed() {
        let pool = sample_pool();
        let limits = SearchLimits {
            deadline: Some(Instant::now()),
            cancel: CancelToken::new(),
        };
        let result = solve(&pool, &specs(&["foo"]), &[], limits);
        assert!(matches!(result, Err(SearchAbort::Timeout)));
    }
}
