// src/package_spec.rs

//! Package specifications requested from a solver
//!
//! A spec is a package name plus optional version constraint and build-string
//! pattern, tagged with the dependency phase it was rendered for. Specs are
//! written in the canonical conda-build dialect: `name [version [build]]`.

use crate::error::{Error, Result};
use crate::version::VersionSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dependency phase of a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Host,
    Run,
    Test,
}

impl Phase {
    /// Phases in the order they are checked
    pub const ALL: [Phase; 4] = [Phase::Build, Phase::Host, Phase::Run, Phase::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Host => "host",
            Self::Run => "run",
            Self::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "build" => Ok(Self::Build),
            "host" => Ok(Self::Host),
            "run" => Ok(Self::Run),
            "test" => Ok(Self::Test),
            other => Err(Error::ParseError(format!(
                "Unknown phase '{}' (expected build, host, run or test)",
                other
            ))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested package with its constraint text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    pub phase: Phase,
}

impl PackageSpec {
    /// Create an unconstrained spec
    pub fn new(name: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            version: None,
            build: None,
            phase,
        }
    }

    /// Parse a spec string such as `python >=3.9,<3.11` or `numpy>=1.22`
    ///
    /// Whitespace around `,` and `|` is dropped before splitting, so
    /// `python >=3.9, <3.11` is read as a single constraint.
    pub fn parse(s: &str, phase: Phase) -> Result<Self> {
        let compact = collapse_operator_spacing(s.trim());
        if compact.is_empty() {
            return Err(Error::InvalidSpec {
                spec: s.to_string(),
                reason: "empty spec".to_string(),
            });
        }
        if compact.ends_with(']') {
            return Self::parse_bracketed(s, &compact, phase);
        }

        let mut tokens: Vec<String> = compact.split_whitespace().map(String::from).collect();

        // name>=1.0 with the operator glued to the name
        if let Some(pos) = tokens[0].find(['<', '>', '=', '!', '~']) {
            if pos == 0 {
                return Err(Error::InvalidSpec {
                    spec: s.to_string(),
                    reason: "missing package name".to_string(),
                });
            }
            let constraint = tokens[0].split_off(pos);
            tokens.insert(1, constraint);
        }

        if tokens.len() > 3 {
            return Err(Error::InvalidSpec {
                spec: s.to_string(),
                reason: "expected 'name [version [build]]'".to_string(),
            });
        }

        let name = tokens[0].to_lowercase();
        if !is_valid_name(&name) {
            return Err(Error::InvalidSpec {
                spec: s.to_string(),
                reason: format!("invalid package name '{}'", name),
            });
        }

        let version = tokens.get(1).cloned();
        if let Some(v) = &version {
            VersionSpec::parse(v).map_err(|e| Error::InvalidSpec {
                spec: s.to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(Self {
            name,
            version,
            build: tokens.get(2).cloned(),
            phase,
        })
    }

    /// `name[version='>=1',build='py*']`
    fn parse_bracketed(original: &str, s: &str, phase: Phase) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSpec {
            spec: original.to_string(),
            reason: reason.to_string(),
        };
        let (name, rest) = s.split_once('[').ok_or_else(|| invalid("unbalanced ']'"))?;
        let body = rest.strip_suffix(']').unwrap_or(rest);

        let name = name.trim().to_lowercase();
        if !is_valid_name(&name) {
            return Err(invalid("invalid package name"));
        }

        let mut spec = Self::new(name, phase);
        for field in split_unquoted(body, ',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| invalid("expected key=value inside brackets"))?;
            let value = value.trim().trim_matches(['\'', '"']).to_string();
            match key.trim() {
                "version" => {
                    VersionSpec::parse(&value).map_err(|e| invalid(&e.to_string()))?;
                    spec.version = Some(value);
                }
                "build" => spec.build = Some(value),
                other => return Err(invalid(&format!("unsupported bracket key '{}'", other))),
            }
        }
        Ok(spec)
    }

    /// Bracket form understood by solvers that reject positional build strings
    pub fn to_bracket_form(&self) -> String {
        let mut fields = Vec::new();
        if let Some(version) = &self.version {
            fields.push(format!("version='{}'", version));
        }
        if let Some(build) = &self.build {
            fields.push(format!("build='{}'", build));
        }
        if fields.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, fields.join(","))
        }
    }

    /// Parsed version constraint, `Any` when unconstrained
    pub fn version_spec(&self) -> Result<VersionSpec> {
        match &self.version {
            Some(v) => VersionSpec::parse(v),
            None => Ok(VersionSpec::Any),
        }
    }

    /// Same spec tagged with another phase
    pub fn with_phase(&self, phase: Phase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {}", version)?;
        }
        if let Some(build) = &self.build {
            write!(f, " {}", build)?;
        }
        Ok(())
    }
}

/// Package names: lowercase alphanumerics plus `-`, `_` and `.`
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Split on `sep` outside single or double quotes
pub(crate) fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == sep => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn collapse_operator_spacing(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for part in s.split_whitespace() {
        let joins = out.ends_with([',', '|', '<', '>', '='])
            || part.starts_with([',', '|']);
        if !out.is_empty() && !joins {
            out.push(' ');
        }
        out.push_str(part);
    }
    out
}

/// Rewrite a version constraint into the canonical conda-build form
///
/// Bare versions and `=`-prefixed versions become prefix matches
/// (`1.1` → `1.1.*`, `=1.1` → `1.1.*`, `1.1*` → `1.1.*`); explicit operators
/// are left alone. Each `|` alternative and `,` part is handled on its own.
pub fn canonical_version(raw: &str) -> String {
    raw.split('|')
        .map(|alt| {
            alt.split(',')
                .map(|part| canonical_part(part.trim()))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn canonical_part(part: &str) -> String {
    let bare = match part.strip_prefix('=') {
        Some(rest) if !rest.starts_with('=') => rest,
        _ => part,
    };
    if bare.is_empty() || bare == "*" || bare.starts_with(['<', '>', '=', '!', '~']) {
        return part.to_string();
    }
    if let Some(prefix) = bare.strip_suffix(".*") {
        return format!("{}.*", prefix);
    }
    if let Some(prefix) = bare.strip_suffix('*') {
        return format!("{}.*", prefix.trim_end_matches('.'));
    }
    if bare.contains('*') {
        return bare.to_string();
    }
    format!("{}.*", bare)
}
