// src/recipe/template.rs

//! `{{ }}` template expansion inside requirement strings
//!
//! Only a fixed set of forms is understood: a variable name, `compiler()`,
//! `stdlib()` and `pin_compatible()`. `pin_compatible` cannot be resolved
//! here because it depends on the host solution, so a requirement made of a
//! single `pin_compatible` call comes back as [`Expanded::Pin`].

use crate::package_spec::split_unquoted;
use crate::recipe::RenderError;
use crate::recipe::pin::PinCompatible;
use crate::recipe::selector::Context;

/// Result of expanding one requirement string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expanded {
    Text(String),
    Pin(PinCompatible),
}

/// Expand every `{{ }}` block in `line`
pub fn expand(line: &str, ctx: &Context) -> Result<Expanded, RenderError> {
    let trimmed = line.trim();
    if let Some(inner) = whole_template(trimmed) {
        if let Some(args) = call_args(inner, "pin_compatible") {
            return PinCompatible::from_args(&parse_args(args, inner)?, inner).map(Expanded::Pin);
        }
    }

    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| RenderError::InvalidExpression {
            expression: line.to_string(),
            reason: "unterminated '{{'".to_string(),
        })?;
        out.push_str(&evaluate(after[..end].trim(), ctx)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(Expanded::Text(out))
}

fn whole_template(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") {
        return None;
    }
    Some(inner.trim())
}

fn call_args<'a>(expr: &'a str, func: &str) -> Option<&'a str> {
    expr.strip_prefix(func)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn evaluate(expr: &str, ctx: &Context) -> Result<String, RenderError> {
    if let Some(args) = call_args(expr, "compiler") {
        let lang = single_string_arg(args, expr)?;
        return toolchain_package(&lang, "compiler", ctx, expr);
    }
    if let Some(args) = call_args(expr, "stdlib") {
        let lang = single_string_arg(args, expr)?;
        return toolchain_package(&lang, "stdlib", ctx, expr);
    }
    if call_args(expr, "pin_compatible").is_some() {
        return Err(RenderError::InvalidExpression {
            expression: expr.to_string(),
            reason: "pin_compatible must be the whole requirement".to_string(),
        });
    }
    if expr.contains('(') {
        return Err(RenderError::InvalidExpression {
            expression: expr.to_string(),
            reason: "unsupported function".to_string(),
        });
    }
    if !expr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') || expr.is_empty() {
        return Err(RenderError::InvalidExpression {
            expression: expr.to_string(),
            reason: "expected a variable name".to_string(),
        });
    }
    Ok(ctx.require(expr, expr)?.to_string())
}

/// Parsed call arguments: positional values then `key=value` pairs
#[derive(Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<String>,
    pub keyword: Vec<(String, Option<String>)>,
}

fn parse_args(args: &str, expr: &str) -> Result<CallArgs, RenderError> {
    let mut parsed = CallArgs::default();
    for raw in split_unquoted(args, ',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match raw.split_once('=') {
            Some((key, value)) if !key.trim().starts_with(['\'', '"']) => {
                parsed
                    .keyword
                    .push((key.trim().to_string(), literal(value.trim(), expr)?));
            }
            _ => {
                let value = literal(raw, expr)?.ok_or_else(|| RenderError::InvalidExpression {
                    expression: expr.to_string(),
                    reason: "positional argument cannot be None".to_string(),
                })?;
                parsed.positional.push(value);
            }
        }
    }
    Ok(parsed)
}

/// A literal argument; `None` maps to `Option::None`
fn literal(raw: &str, expr: &str) -> Result<Option<String>, RenderError> {
    if raw == "None" {
        return Ok(None);
    }
    for quote in ['\'', '"'] {
        if let Some(inner) = raw.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return Ok(Some(inner.to_string()));
        }
    }
    if raw == "True" || raw == "False" || raw.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Ok(Some(raw.to_string()));
    }
    Err(RenderError::InvalidExpression {
        expression: expr.to_string(),
        reason: format!("unsupported argument '{}'", raw),
    })
}

fn single_string_arg(args: &str, expr: &str) -> Result<String, RenderError> {
    let parsed = parse_args(args, expr)?;
    match (parsed.positional.as_slice(), parsed.keyword.is_empty()) {
        ([lang], true) => Ok(lang.clone()),
        _ => Err(RenderError::InvalidExpression {
            expression: expr.to_string(),
            reason: "expected exactly one quoted argument".to_string(),
        }),
    }
}

/// `compiler('c')` → `gcc_linux-64`, with `<lang>_compiler` axes overriding
/// the platform default and `<lang>_compiler_version` appended when set
fn toolchain_package(lang: &str, kind: &str, ctx: &Context, expr: &str) -> Result<String, RenderError> {
    let target_platform = ctx.require("target_platform", expr)?.to_string();
    let platform = ctx.require("platform", expr)?.to_string();

    let name = match ctx.get(&format!("{}_{}", lang, kind)) {
        Some(value) => value.to_string(),
        None => default_toolchain(lang, kind, &platform)
            .ok_or_else(|| RenderError::InvalidExpression {
                expression: expr.to_string(),
                reason: format!("no default {} for '{}' on {}", kind, lang, platform),
            })?
            .to_string(),
    };

    let mut package = format!("{}_{}", name, target_platform);
    if let Some(version) = ctx.get(&format!("{}_{}_version", lang, kind)) {
        let version = version.to_string();
        if version != "None" && !version.is_empty() {
            package.push(' ');
            package.push_str(&version);
        }
    }
    Ok(package)
}

fn default_toolchain(lang: &str, kind: &str, platform: &str) -> Option<&'static str> {
    let name = match (kind, lang, platform) {
        ("compiler", "c", "linux") => "gcc",
        ("compiler", "c", "osx") => "clang",
        ("compiler", "c", "win") => "vs2019",
        ("compiler", "cxx", "linux") => "gxx",
        ("compiler", "cxx", "osx") => "clangxx",
        ("compiler", "cxx", "win") => "vs2019",
        ("compiler", "fortran", "linux" | "osx") => "gfortran",
        ("compiler", "fortran", "win") => "flang",
        ("compiler", "cuda", _) => "cuda_compiler",
        ("compiler", "rust", _) => "rust",
        ("compiler", "go", _) => "go",
        ("stdlib", "c", "linux") => "sysroot",
        ("stdlib", "c", "osx") => "macosx_deployment_target",
        ("stdlib", "c", "win") => "vs",
        _ => return None,
    };
    Some(name)
}
