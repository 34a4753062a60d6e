// src/conflict/problem.rs

//! Problem tree produced by the in-process resolver
//!
//! The resolver renders an unsatisfiable request as an indented tree, one
//! statement per line, children drawn under their parent with box glyphs.
//! [`ProblemTree::from_report`] keeps that shape as a list of nodes with
//! their depth and the package names each line mentions.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Width of one indentation level in the rendered report
const INDENT: usize = 3;

/// Characters that make up the indentation prefix of a report line
const PREFIX_GLYPHS: &[char] = &['├', '└', '│', '─', ' '];

/// Phrases that end the subject of a statement
const VERBS: &[&str] = &[
    " would require",
    " can be installed",
    " cannot be installed",
    " is locked",
    " is excluded",
    " is forbidden",
    ", which",
    ", for which",
    ", but",
    " is ",
];

/// One statement of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemNode {
    /// Nesting level; 0 is the headline
    pub depth: usize,
    pub text: String,
    /// Known package names mentioned in the statement, in order
    pub names: Vec<String>,
}

impl ProblemNode {
    /// The package or requirement the statement is about
    pub fn subject(&self) -> &str {
        let end = VERBS
            .iter()
            .filter_map(|verb| self.text.find(verb))
            .min()
            .unwrap_or(self.text.len());
        self.text[..end].trim_end_matches([':', ',', '.'])
    }
}

/// Report of a failed search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProblemTree {
    pub nodes: Vec<ProblemNode>,
}

impl ProblemTree {
    /// Parse a rendered report, recognizing the names in `known`
    pub fn from_report(report: &str, known: &HashSet<String>) -> Self {
        let nodes = report
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let prefix = line.chars().take_while(|c| PREFIX_GLYPHS.contains(c)).count();
                let text: String = line.chars().skip(prefix).collect();
                ProblemNode {
                    depth: prefix.div_ceil(INDENT),
                    names: mentioned(&text, known),
                    text: text.trim_end().to_string(),
                }
            })
            .collect();
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parent to child subjects, headline excluded
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut stack: Vec<&ProblemNode> = Vec::new();
        let mut edges = Vec::new();
        for node in &self.nodes {
            while stack.last().is_some_and(|top| top.depth >= node.depth) {
                stack.pop();
            }
            if let Some(parent) = stack.last()
                && parent.depth > 0
            {
                edges.push((parent.subject().to_string(), node.subject().to_string()));
            }
            stack.push(node);
        }
        edges
    }

    /// Every package name mentioned, without duplicates
    pub fn names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .flat_map(|n| n.names.iter())
            .filter(|n| seen.insert(n.as_str()))
            .map(|n| n.as_str())
            .collect()
    }
}

fn mentioned(text: &str, known: &HashSet<String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for token in text.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))) {
        let token = token.trim_end_matches('.');
        if known.contains(token) && !names.iter().any(|n| n == token) {
            names.push(token.to_string());
        }
    }
    names
}

impl fmt::Display for ProblemTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{}{}", "  ".repeat(node.depth), node.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "The following packages are incompatible\n\
                          ├─ foo >=2.0 cannot be installed because there are no viable options:\n\
                          │  └─ foo 2.0 0 would require\n\
                          │     └─ bar >=1.2, which cannot be installed because there are no viable options:\n\
                          │        └─ bar 1.2 0, which conflicts with the versions reported above.\n\
                          └─ bar <1.0 can be installed with any of the following options:\n   \
                             └─ bar 0.9 0\n";

    fn known() -> HashSet<String> {
        ["foo", "bar"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_depths_and_names() {
        let tree = ProblemTree::from_report(REPORT, &known());
        let depths: Vec<usize> = tree.nodes.iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 3, 4, 1, 2]);
        assert!(tree.nodes[0].names.is_empty());
        assert_eq!(tree.nodes[1].names, vec!["foo"]);
        assert_eq!(tree.names(), vec!["foo", "bar"]);
    }

    #[test]
    fn test_edges_follow_nesting() {
        let tree = ProblemTree::from_report(REPORT, &known());
        let edges = tree.edges();
        assert_eq!(edges[0], ("foo >=2.0".to_string(), "foo 2.0 0".to_string()));
        assert_eq!(edges[1], ("foo 2.0 0".to_string(), "bar >=1.2".to_string()));
        assert!(edges.contains(&("bar <1.0".to_string(), "bar 0.9 0".to_string())));
    }

    #[test]
    fn test_names_are_whole_tokens() {
        let known: HashSet<String> = ["foo", "foo-utils"].iter().map(|s| s.to_string()).collect();
        let tree = ProblemTree::from_report("└─ foo-utils 1.0, for which no candidates were found.", &known);
        assert_eq!(tree.names(), vec!["foo-utils"]);
    }

    #[test]
    fn test_display_reindents() {
        let tree = ProblemTree::from_report(REPORT, &known());
        let text = tree.to_string();
        assert!(text.starts_with("The following packages are incompatible\n  foo >=2.0"));
        assert!(text.contains("\n    foo 2.0 0 would require"));
    }
}
