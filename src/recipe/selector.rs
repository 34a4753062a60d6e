// src/recipe/selector.rs

//! Selector expression evaluation
//!
//! Selectors are small boolean expressions such as
//! `linux and python >= '3.10'` or `not (win or cuda_compiler_version == 'None')`.
//! They are evaluated against a fixed variable set derived from a build
//! configuration: the target platform and architecture, a handful of
//! platform flags and every variant axis value.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := not_expr ("and" not_expr)*
//! not_expr   := "not" not_expr | comparison
//! comparison := atom (("==" | "!=" | "<" | "<=" | ">" | ">=") atom)?
//! atom       := identifier | string | number | True | False | None | "(" or_expr ")"
//! ```

use crate::matrix::{BuildConfiguration, Target};
use crate::recipe::RenderError;
use crate::version::{Version, looks_like_version};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Architecture flags exposed as boolean variables
const ARCH_FLAGS: &[(&str, &str)] = &[
    ("x86_64", "64"),
    ("aarch64", "aarch64"),
    ("arm64", "arm64"),
    ("ppc64le", "ppc64le"),
];

/// A selector value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Variables visible to selectors and templates for one configuration
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: HashMap<String, Value>,
}

impl Context {
    /// Variables describing a target, with the build phase running on `build`
    pub fn for_target(target: &Target, build: &Target) -> Self {
        let mut ctx = Self::default();
        ctx.set("platform", target.platform());
        ctx.set("arch", target.arch());
        ctx.set("target_platform", &target.subdir());
        ctx.set("build_platform", &build.subdir());

        for os in ["linux", "osx", "win"] {
            ctx.set_flag(os, target.platform() == os);
        }
        ctx.set_flag("unix", target.is_unix());
        for (flag, arch) in ARCH_FLAGS {
            ctx.set_flag(flag, target.arch() == *arch);
        }
        ctx
    }

    /// Full variable set of a configuration, axes included
    pub fn for_configuration(config: &BuildConfiguration) -> Self {
        let mut ctx = Self::for_target(&config.target, &config.build_target);
        for (name, value) in &config.axes {
            ctx.set(name, value);
        }
        ctx
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), Value::Str(value.to_string()));
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.vars.insert(name.to_string(), Value::Bool(value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Look up a variable, failing with the expression that referenced it
    pub fn require(&self, name: &str, expression: &str) -> Result<&Value, RenderError> {
        self.get(name).ok_or_else(|| RenderError::UndefinedVariable {
            variable: name.to_string(),
            expression: expression.to_string(),
        })
    }

    /// Evaluate a selector expression to a boolean
    pub fn evaluate(&self, expression: &str) -> Result<bool, RenderError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            ctx: self,
            source: expression,
        };
        let value = parser.or_expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(value.truthy())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(String),
    Op(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(source: &str) -> Result<Vec<Token>, RenderError> {
    let invalid = |reason: String| RenderError::InvalidExpression {
        expression: source.to_string(),
        reason,
    };

    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| invalid("unterminated string".to_string()))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CmpOp::Eq, 2),
                    ('!', Some('=')) => (CmpOp::Ne, 2),
                    ('<', Some('=')) => (CmpOp::Le, 2),
                    ('>', Some('=')) => (CmpOp::Ge, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    ('>', _) => (CmpOp::Gt, 1),
                    _ => return Err(invalid(format!("unexpected '{}'", c))),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(invalid(format!("unexpected '{}'", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ctx: &'a Context,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> RenderError {
        RenderError::InvalidExpression {
            expression: self.source.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(k)) if k == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Value, RenderError> {
        let mut value = self.and_expr()?;
        while self.eat_keyword("or") {
            let rhs = self.and_expr()?;
            value = Value::Bool(value.truthy() || rhs.truthy());
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<Value, RenderError> {
        let mut value = self.not_expr()?;
        while self.eat_keyword("and") {
            let rhs = self.not_expr()?;
            value = Value::Bool(value.truthy() && rhs.truthy());
        }
        Ok(value)
    }

    fn not_expr(&mut self) -> Result<Value, RenderError> {
        if self.eat_keyword("not") {
            let value = self.not_expr()?;
            return Ok(Value::Bool(!value.truthy()));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, RenderError> {
        let lhs = self.atom()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.atom()?;
        Ok(Value::Bool(compare(&lhs, op, &rhs)))
    }

    fn atom(&mut self) -> Result<Value, RenderError> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::Str(s) | Token::Number(s) => Ok(Value::Str(s)),
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Value::Bool(true)),
                "False" | "false" => Ok(Value::Bool(false)),
                "None" => Ok(Value::Str("None".to_string())),
                "and" | "or" | "not" => Err(self.error(&format!("unexpected '{}'", name))),
                _ => self.ctx.require(&name, self.source).cloned(),
            },
            Token::LParen => {
                let value = self.or_expr()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Token::RParen | Token::Op(_) => Err(self.error("expected a value")),
        }
    }
}

/// Version-like operands compare by package version order, anything else as text
fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> bool {
    let (a, b) = (lhs.to_string(), rhs.to_string());
    let ordering = if looks_like_version(&a) && looks_like_version(&b) {
        match (Version::parse(&a), Version::parse(&b)) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(&b),
        }
    } else {
        match op {
            CmpOp::Eq | CmpOp::Ne => {
                if a == b {
                    Ordering::Equal
                } else {
                    Ordering::Less
                }
            }
            _ => a.cmp(&b),
        }
    };

    match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    }
}

/// Split a requirement line into its body and inline `# [selector]`
pub fn split_inline_selector(line: &str) -> (&str, Option<&str>) {
    if let Some(hash) = line.find('#') {
        let body = line[..hash].trim_end();
        let comment = line[hash + 1..].trim();
        if let Some(inner) = comment.strip_prefix('[').and_then(|c| c.strip_suffix(']')) {
            return (body, Some(inner.trim()));
        }
        return (body, None);
    }
    (line.trim_end(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_ctx() -> Context {
        let target = Target::parse("linux-64").unwrap();
        let mut ctx = Context::for_target(&target, &target);
        ctx.set("python", "3.10");
        ctx.set("cuda_compiler_version", "None");
        ctx
    }

    #[test]
    fn test_platform_flags() {
        let ctx = linux_ctx();
        assert!(ctx.evaluate("linux").unwrap());
        assert!(ctx.evaluate("unix and x86_64").unwrap());
        assert!(!ctx.evaluate("win or osx").unwrap());
        assert!(!ctx.evaluate("aarch64").unwrap());
        assert!(ctx.evaluate("target_platform == 'linux-64'").unwrap());
    }

    #[test]
    fn test_version_comparison() {
        let ctx = linux_ctx();
        assert!(ctx.evaluate("python >= '3.9'").unwrap());
        assert!(ctx.evaluate("python > 3.9").unwrap());
        assert!(!ctx.evaluate("python < '3.10'").unwrap());
        assert!(ctx.evaluate("python == '3.10'").unwrap());
    }

    #[test]
    fn test_string_comparison() {
        let ctx = linux_ctx();
        assert!(ctx.evaluate("cuda_compiler_version == 'None'").unwrap());
        assert!(!ctx.evaluate("cuda_compiler_version != None").unwrap());
    }

    #[test]
    fn test_precedence() {
        let ctx = linux_ctx();
        // and binds tighter than or
        assert!(ctx.evaluate("win and osx or linux").unwrap());
        assert!(!ctx.evaluate("win and (osx or linux)").unwrap());
        assert!(ctx.evaluate("not win and linux").unwrap());
        assert!(ctx.evaluate("not (win or osx)").unwrap());
    }

    #[test]
    fn test_undefined_variable() {
        let ctx = linux_ctx();
        let err = ctx.evaluate("cuda_version == '11.8'").unwrap_err();
        match err {
            RenderError::UndefinedVariable { variable, expression } => {
                assert_eq!(variable, "cuda_version");
                assert_eq!(expression, "cuda_version == '11.8'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_expression() {
        let ctx = linux_ctx();
        assert!(ctx.evaluate("linux and").is_err());
        assert!(ctx.evaluate("(linux").is_err());
        assert!(ctx.evaluate("linux linux").is_err());
        assert!(ctx.evaluate("python = 3").is_err());
        assert!(ctx.evaluate("'open").is_err());
    }

    #[test]
    fn test_split_inline_selector() {
        assert_eq!(
            split_inline_selector("cudatoolkit 11.8  # [linux]"),
            ("cudatoolkit 11.8", Some("linux"))
        );
        assert_eq!(split_inline_selector("numpy"), ("numpy", None));
        assert_eq!(split_inline_selector("numpy  # pinned"), ("numpy", None));
    }
}
