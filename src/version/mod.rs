// src/version/mod.rs

//! Version handling and constraint satisfaction for package specs
//!
//! Versions follow the conda ordering rules: an optional `epoch!` prefix,
//! dot/dash/underscore separated segments, each segment a run of numeric and
//! alphabetic components. Missing segments and components compare as zero,
//! strings sort before numbers, `dev` sorts before every other string and
//! `post` after every number.
//!
//! Constraints use the canonical (conda-build) dialect: `,` binds tighter
//! than `|`, `1.2.*` is a prefix match and a bare version is exact.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One alphanumeric run inside a version segment
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Dev,
    Str(String),
    Num(u64),
    Post,
}

impl Component {
    fn rank(&self) -> u8 {
        match self {
            Self::Dev => 0,
            Self::Str(_) => 1,
            Self::Num(_) => 2,
            Self::Post => 3,
        }
    }

    fn from_run(run: &str) -> Self {
        if let Ok(n) = run.parse::<u64>() {
            return Self::Num(n);
        }
        match run {
            "dev" => Self::Dev,
            "post" => Self::Post,
            other => Self::Str(other.to_string()),
        }
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

const ZERO: Component = Component::Num(0);

type Segment = Vec<Component>;

/// A parsed package version
#[derive(Debug, Clone)]
pub struct Version {
    source: String,
    epoch: u64,
    segments: Vec<Segment>,
    local: Vec<Segment>,
}

impl Version {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → segments [1] [2] [3]
    /// - "2!1.0" → epoch 2
    /// - "1.0a1" → segments [1] [0 a 1]
    /// - "1.0+local.1" → local version segments [local] [1]
    pub fn parse(s: &str) -> Result<Self> {
        let source = s.trim();
        if source.is_empty() {
            return Err(Error::InvalidVersion(s.to_string()));
        }
        let lowered = source.to_lowercase();

        let (epoch, rest) = match lowered.split_once('!') {
            Some((e, r)) => {
                let epoch = e
                    .parse::<u64>()
                    .map_err(|_| Error::InvalidVersion(s.to_string()))?;
                (epoch, r)
            }
            None => (0, lowered.as_str()),
        };

        let (public, local) = match rest.split_once('+') {
            Some((p, l)) => (p, Some(l)),
            None => (rest, None),
        };

        let segments = parse_segments(public).ok_or_else(|| Error::InvalidVersion(s.to_string()))?;
        let local = match local {
            Some(l) => parse_segments(l).ok_or_else(|| Error::InvalidVersion(s.to_string()))?,
            None => Vec::new(),
        };

        Ok(Self {
            source: source.to_string(),
            epoch,
            segments,
            local,
        })
    }

    /// The version as originally written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of dot-separated segments in the public part
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Leading numeric value of segment `index`, if it is numeric
    pub fn numeric_segment(&self, index: usize) -> Option<u64> {
        match self.segments.get(index)?.first()? {
            Component::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Check whether `self` begins with every segment of `prefix`
    ///
    /// The last prefix segment only needs to be a component-prefix of the
    /// matching segment, so `1.2` is a prefix of `1.2a1` but not of `1.20`.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        let last = prefix.segments.len().saturating_sub(1);
        for (i, want) in prefix.segments.iter().enumerate() {
            let have = self.segments.get(i).map(|s| s.as_slice()).unwrap_or(&[]);
            if i == last {
                if want.len() > have.len() {
                    // "1.0" still starts with "1.0.0" style padding
                    if !want[have.len()..].iter().all(|c| *c == ZERO)
                        || want[..have.len()] != *have
                    {
                        return false;
                    }
                } else if have[..want.len()] != *want {
                    return false;
                }
            } else if compare_segment(have, want) != Ordering::Equal {
                return false;
            }
        }
        true
    }

    /// Compare two versions
    pub fn compare(&self, other: &Version) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match compare_segments(&self.segments, &other.segments) {
            Ordering::Equal => {}
            ord => return ord,
        }
        compare_segments(&self.local, &other.local)
    }
}

fn parse_segments(s: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for raw in s.split(['.', '-', '_']) {
        if raw.is_empty() {
            return None;
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }

        let mut segment = Vec::new();
        let mut run = String::new();
        let mut run_is_digit = None;
        for c in raw.chars() {
            let is_digit = c.is_ascii_digit();
            if run_is_digit.is_some_and(|d| d != is_digit) {
                segment.push(Component::from_run(&run));
                run.clear();
            }
            run.push(c);
            run_is_digit = Some(is_digit);
        }
        if !run.is_empty() {
            segment.push(Component::from_run(&run));
        }

        // A segment starting with letters gets an implicit leading zero
        if !matches!(segment.first(), Some(Component::Num(_))) {
            segment.insert(0, ZERO);
        }
        segments.push(segment);
    }
    Some(segments)
}

fn compare_segment(a: &[Component], b: &[Component]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).unwrap_or(&ZERO);
        let y = b.get(i).unwrap_or(&ZERO);
        match x.cmp(y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

fn compare_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    let zero = vec![ZERO];
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).unwrap_or(&zero);
        let y = b.get(i).unwrap_or(&zero);
        match compare_segment(x, y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Version constraint in the canonical dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Any version is acceptable
    Any,
    /// `==1.2` or a bare `1.2`
    Exact(Version),
    /// `!=1.2`
    NotEqual(Version),
    /// `>1.2`
    GreaterThan(Version),
    /// `>=1.2`
    GreaterOrEqual(Version),
    /// `<1.2`
    LessThan(Version),
    /// `<=1.2`
    LessOrEqual(Version),
    /// `1.2.*`, `1.2*` or `=1.2`
    StartsWith(Version),
    /// `!=1.2.*`
    NotStartsWith(Version),
    /// `~=1.2.3`: at least 1.2.3 and still 1.2.*
    Compatible(Version),
    /// Comma-joined constraints, all must hold
    All(Vec<VersionSpec>),
    /// Pipe-joined alternatives, one must hold
    AnyOf(Vec<VersionSpec>),
}

impl VersionSpec {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">=1.2,<2" → All[GreaterOrEqual(1.2), LessThan(2)]
    /// - "1.2.*" → StartsWith(1.2)
    /// - "1.1|>=3" → AnyOf[Exact(1.1), GreaterOrEqual(3)]
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::Any);
        }

        if s.contains('|') {
            let alternatives = s
                .split('|')
                .map(Self::parse_conjunction)
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self::AnyOf(alternatives));
        }
        Self::parse_conjunction(s)
    }

    fn parse_conjunction(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains(',') {
            let parts = s
                .split(',')
                .map(Self::parse_atom)
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self::All(parts));
        }
        Self::parse_atom(s)
    }

    fn parse_atom(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidConstraint {
                constraint: s.to_string(),
                reason: "empty constraint".to_string(),
            });
        }
        if s == "*" {
            return Ok(Self::Any);
        }

        let version = |rest: &str| -> Result<Version> {
            Version::parse(rest.trim()).map_err(|_| Error::InvalidConstraint {
                constraint: s.to_string(),
                reason: format!("invalid version '{}'", rest.trim()),
            })
        };
        let strip_star = |rest: &str| -> Option<String> {
            let rest = rest.trim();
            rest.strip_suffix(".*")
                .or_else(|| rest.strip_suffix('*'))
                .map(|r| r.to_string())
        };

        // Longer operators first
        if let Some(rest) = s.strip_prefix(">=") {
            let rest = strip_star(rest).unwrap_or_else(|| rest.to_string());
            Ok(Self::GreaterOrEqual(version(&rest)?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(Self::LessOrEqual(version(rest)?))
        } else if let Some(rest) = s.strip_prefix("==") {
            match strip_star(rest) {
                Some(prefix) => Ok(Self::StartsWith(version(&prefix)?)),
                None => Ok(Self::Exact(version(rest)?)),
            }
        } else if let Some(rest) = s.strip_prefix("!=") {
            match strip_star(rest) {
                Some(prefix) => Ok(Self::NotStartsWith(version(&prefix)?)),
                None => Ok(Self::NotEqual(version(rest)?)),
            }
        } else if let Some(rest) = s.strip_prefix("~=") {
            Ok(Self::Compatible(version(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(Self::GreaterThan(version(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(Self::LessThan(version(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            let prefix = strip_star(rest).unwrap_or_else(|| rest.to_string());
            Ok(Self::StartsWith(version(&prefix)?))
        } else {
            match strip_star(s) {
                Some(prefix) if prefix.is_empty() => Ok(Self::Any),
                Some(prefix) => Ok(Self::StartsWith(version(&prefix)?)),
                None => Ok(Self::Exact(version(s)?)),
            }
        }
    }

    /// Check if a version satisfies this constraint
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => version == v,
            Self::NotEqual(v) => version != v,
            Self::GreaterThan(v) => version > v,
            Self::GreaterOrEqual(v) => version >= v,
            Self::LessThan(v) => version < v,
            Self::LessOrEqual(v) => version <= v,
            Self::StartsWith(v) => version.starts_with(v),
            Self::NotStartsWith(v) => !version.starts_with(v),
            Self::Compatible(v) => version >= v && version.starts_with(&compatible_prefix(v)),
            Self::All(specs) => specs.iter().all(|s| s.matches(version)),
            Self::AnyOf(specs) => specs.iter().any(|s| s.matches(version)),
        }
    }
}

/// `~=1.2.3` keeps everything but the last segment as the prefix
fn compatible_prefix(v: &Version) -> Version {
    let mut prefix = v.clone();
    if prefix.segments.len() > 1 {
        prefix.segments.pop();
    }
    prefix
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "=={}", v),
            Self::NotEqual(v) => write!(f, "!={}", v),
            Self::GreaterThan(v) => write!(f, ">{}", v),
            Self::GreaterOrEqual(v) => write!(f, ">={}", v),
            Self::LessThan(v) => write!(f, "<{}", v),
            Self::LessOrEqual(v) => write!(f, "<={}", v),
            Self::StartsWith(v) => write!(f, "{}.*", v),
            Self::NotStartsWith(v) => write!(f, "!={}.*", v),
            Self::Compatible(v) => write!(f, "~={}", v),
            Self::All(specs) => {
                let parts: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Self::AnyOf(specs) => {
                let parts: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", parts.join("|"))
            }
        }
    }
}

impl FromStr for VersionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Check whether a string looks like a version (starts with a digit)
pub fn looks_like_version(s: &str) -> bool {
    s.trim().starts_with(|c: char| c.is_ascii_digit()) && Version::parse(s).is_ok()
}
