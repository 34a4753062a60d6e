// src/conflict/mod.rs

//! Conflict interpretation
//!
//! Backends report failures in their own shapes: a conda JSON error
//! document, free text, or the in-process resolver's problem tree.
//! [`interpret`] turns any of them into a backend-agnostic [`Conflict`].
//! Extraction is best effort. Output it cannot make sense of still yields a
//! conflict implicating every requested spec, with the raw text kept as the
//! explanation, so the failure signal is never lost.

mod problem;

pub use problem::{ProblemNode, ProblemTree};

use crate::package_spec::PackageSpec;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Box-drawing glyphs used by libmamba-style problem trees
const TREE_GLYPHS: &[char] = &['├', '└', '│', '─', '┬', '┌'];

/// Backend-agnostic description of why specs cannot be installed together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Requested specs involved in the conflict
    pub implicated: Vec<PackageSpec>,
    /// Chain of incompatible constraints, when the backend exposed one
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    /// Human-readable explanation as reported by the backend
    pub explanation: String,
}

impl Conflict {
    /// Names of the implicated specs
    pub fn implicated_names(&self) -> Vec<&str> {
        self.implicated.iter().map(|s| s.name.as_str()).collect()
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specs: Vec<String> = self.implicated.iter().map(|s| s.to_string()).collect();
        writeln!(f, "Conflicting requirements: {}", specs.join(", "))?;
        for link in &self.chain {
            writeln!(f, "  {}", link)?;
        }
        if !self.explanation.is_empty() {
            for line in self.explanation.lines() {
                writeln!(f, "  | {}", line)?;
            }
        }
        Ok(())
    }
}

/// Raw failure output from a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// JSON error document printed by `conda --json`
    CondaJson(String),
    /// Free-form text, possibly a libmamba problem tree
    Text(String),
    /// Problem tree from the in-process resolver
    Structured(ProblemTree),
}

/// Normalize a backend failure into a [`Conflict`]
///
/// Never fails: when nothing can be extracted, every requested spec is
/// implicated and the raw output becomes the explanation.
pub fn interpret(raw: &RawFailure, requested: &[PackageSpec]) -> Conflict {
    let (explanation, chain, names) = match raw {
        RawFailure::CondaJson(text) => {
            let (explanation, chain) = conda_json(text);
            (explanation, chain, None)
        }
        RawFailure::Text(text) => (text.trim().to_string(), text_chain(text), None),
        RawFailure::Structured(tree) => {
            let chain = tree
                .edges()
                .into_iter()
                .map(|(parent, child)| format!("{} -> {}", parent, child))
                .collect();
            let names: Vec<String> = tree.names().into_iter().map(|n| n.to_string()).collect();
            (tree.to_string().trim_end().to_string(), chain, Some(names))
        }
    };

    let mut implicated: Vec<PackageSpec> = Vec::new();
    for spec in requested {
        let mentioned = match &names {
            Some(names) => names.iter().any(|n| n == &spec.name),
            None => mentions(&explanation, &spec.name) || chain.iter().any(|c| mentions(c, &spec.name)),
        };
        if mentioned && !implicated.contains(spec) {
            implicated.push(spec.clone());
        }
    }

    if implicated.is_empty() {
        debug!("No requested spec found in solver output; implicating all of them");
        implicated = requested.to_vec();
    }

    Conflict {
        implicated,
        chain,
        explanation,
    }
}

/// Whole-token match: `foo` does not match `foobar` or `foo-bar`
fn mentions(text: &str, name: &str) -> bool {
    let pattern = format!(
        r"(?:^|[^A-Za-z0-9_.\-]){}(?:$|[^A-Za-z0-9_\-])",
        regex::escape(name)
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => text.contains(name),
    }
}

/// Explanation and dependency chains from a conda JSON error document
fn conda_json(text: &str) -> (String, Vec<String>) {
    let doc: serde_json::Value = match serde_json::from_str(text) {
        Ok(doc) => doc,
        Err(_) => return (text.trim().to_string(), text_chain(text)),
    };

    let explanation = ["message", "error"]
        .iter()
        .find_map(|key| doc.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| text.trim().to_string());

    let mut chain = Vec::new();
    if let Some(bad_deps) = doc.get("bad_deps").and_then(|v| v.as_array()) {
        for deps in bad_deps {
            if let Some(links) = deps.as_array() {
                let links: Vec<&str> = links.iter().filter_map(|l| l.as_str()).collect();
                if !links.is_empty() {
                    chain.push(links.join(" -> "));
                }
            }
        }
    }
    if chain.is_empty() {
        chain = text_chain(&explanation);
    }
    (explanation, chain)
}

/// Lines that describe a dependency chain: `a -> b` or tree-glyph lines
fn text_chain(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.contains(" -> ") {
                return Some(trimmed.trim_start_matches(['-', ' ']).to_string());
            }
            if trimmed.starts_with(TREE_GLYPHS) {
                let stripped = trimmed.trim_start_matches(|c: char| TREE_GLYPHS.contains(&c) || c.is_whitespace());
                if !stripped.is_empty() {
                    return Some(stripped.to_string());
                }
            }
            None
        })
        .collect()
}
