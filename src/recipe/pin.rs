// src/recipe/pin.rs

//! Version pins derived from solved environments
//!
//! `pin_compatible` pins a run requirement to the host solution on request;
//! `pin_run_as_build` does the same for every bare requirement named in the
//! matrix.

use crate::package_spec::PackageSpec;
use crate::recipe::RenderError;
use crate::recipe::format::PinRunAsBuild;
use crate::recipe::template::CallArgs;
use crate::solver::ResolvedPackage;
use std::collections::BTreeMap;
use tracing::trace;

const DEFAULT_MIN_PIN: &str = "x.x.x.x.x.x";
const DEFAULT_MAX_PIN: &str = "x";

/// A deferred `pin_compatible(...)` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinCompatible {
    pub name: String,
    pub min_pin: Option<String>,
    pub max_pin: Option<String>,
    pub lower_bound: Option<String>,
    pub upper_bound: Option<String>,
    pub exact: bool,
}

impl PinCompatible {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_pin: Some(DEFAULT_MIN_PIN.to_string()),
            max_pin: Some(DEFAULT_MAX_PIN.to_string()),
            lower_bound: None,
            upper_bound: None,
            exact: false,
        }
    }

    pub(crate) fn from_args(args: &CallArgs, expr: &str) -> Result<Self, RenderError> {
        let invalid = |reason: String| RenderError::InvalidExpression {
            expression: expr.to_string(),
            reason,
        };

        let name = match args.positional.as_slice() {
            [name] => name.clone(),
            _ => return Err(invalid("pin_compatible takes one package name".to_string())),
        };

        let mut pin = Self::new(name);
        for (key, value) in &args.keyword {
            match key.as_str() {
                "min_pin" => pin.min_pin = value.clone(),
                "max_pin" => pin.max_pin = value.clone(),
                "lower_bound" => pin.lower_bound = value.clone(),
                "upper_bound" => pin.upper_bound = value.clone(),
                "exact" => pin.exact = value.as_deref() == Some("True"),
                other => return Err(invalid(format!("unknown pin_compatible argument '{}'", other))),
            }
        }
        Ok(pin)
    }

    /// Render the requirement given the host solution's version and build
    ///
    /// A package missing from the host solution renders as its bare name
    /// unless an explicit lower bound makes the pin computable anyway.
    pub fn resolve(&self, host: Option<(&str, &str)>) -> String {
        if self.exact {
            return match host {
                Some((version, build)) => format!("{} {} {}", self.name, version, build),
                None => self.name.clone(),
            };
        }

        let version = match self.lower_bound.as_deref().or(host.map(|(v, _)| v)) {
            Some(v) => v,
            None => return self.name.clone(),
        };

        let compatibility = match &self.upper_bound {
            Some(upper) => {
                if self.min_pin.is_some() || self.lower_bound.is_some() {
                    format!(">={},<{}", version, upper)
                } else {
                    format!("<{}", upper)
                }
            }
            None => apply_pin_expressions(version, self.min_pin.as_deref(), self.max_pin.as_deref()),
        };

        if compatibility.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, compatibility)
        }
    }
}

/// Turn `x.x` style pins into a `>=lower,<upper` range around `version`
///
/// The upper bound keeps as many segments as `max_pin` has places,
/// increments the last one and appends `a0` so pre-releases of the next
/// version stay excluded.
pub fn apply_pin_expressions(version: &str, min_pin: Option<&str>, max_pin: Option<&str>) -> String {
    let public = version.split('+').next().unwrap_or(version);
    let parts: Vec<&str> = public.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return String::new();
    }

    let places = |pin: &str| pin.split('.').count();
    let mut ranges = Vec::new();

    if let Some(min_pin) = min_pin {
        let n = places(min_pin).min(parts.len());
        ranges.push(format!(">={}", parts[..n].join(".")));
    }

    if let Some(max_pin) = max_pin {
        let n = places(max_pin).min(parts.len());
        let mut upper: Vec<String> = parts[..n].iter().map(|p| p.to_string()).collect();
        if let Some(last) = upper.last_mut() {
            *last = increment(last);
        }
        ranges.push(format!("<{}a0", upper.join(".")));
    }

    ranges.join(",")
}

/// Pin a bare requirement to the version solved at build time
///
/// Only specs without a version or build are touched, and only when
/// `pins` names the package and `solved` contains it. `python` stays
/// unpinned for noarch packages.
pub fn pin_from_build(
    spec: &mut PackageSpec,
    solved: &[ResolvedPackage],
    pins: &BTreeMap<String, PinRunAsBuild>,
    noarch: bool,
) {
    if spec.version.is_some() || spec.build.is_some() || (noarch && spec.name == "python") {
        return;
    }
    let Some(pin) = pins.get(&spec.name) else {
        return;
    };
    let Some(found) = solved.iter().find(|p| p.name == spec.name) else {
        return;
    };

    let range = apply_pin_expressions(&found.version, pin.min_pin(), pin.max_pin());
    if !range.is_empty() {
        trace!(name = %spec.name, range = %range, "Pinned run requirement to build version");
        spec.version = Some(range);
    }
}

/// `22` → `23`, `1k` → `2`; a segment with no leading digits is kept
fn increment(segment: &str) -> String {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u64>() {
        Ok(n) => (n + 1).to_string(),
        Err(_) => segment.to_string(),
    }
}
