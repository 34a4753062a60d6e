// src/recipe/format.rs

//! Recipe metadata format definitions
//!
//! Recipes are TOML documents holding already-rendered package metadata:
//! the build matrix, the channels to search and the per-phase requirement
//! lists. Requirement strings may still carry `{{ }}` templates and inline
//! `# [selector]` comments keyed on the matrix values.
//!
//! The top-level `[requirements]` belong to the package named in
//! `[package]`. Each `[[outputs]]` entry with its own `requirements` table is
//! checked as a separate package after it; entries without one only name a
//! package built by the recipe.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Channel used when a recipe does not declare any
pub const DEFAULT_CHANNEL: &str = "conda-forge";

/// Rendered recipe metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Package metadata
    pub package: PackageSection,

    /// Build matrix declaration
    pub matrix: MatrixSection,

    /// Channels searched by the solver
    #[serde(default)]
    pub channels: ChannelsSection,

    /// Per-phase requirement lists
    #[serde(default)]
    pub requirements: RequirementsSection,

    /// Build options of the top-level package
    #[serde(default)]
    pub build: BuildSection,

    /// Other packages built from the same recipe
    #[serde(default)]
    pub outputs: Vec<OutputSection>,
}

impl Recipe {
    /// Names produced by this recipe (the package itself plus extra outputs)
    pub fn own_names(&self) -> Vec<&str> {
        let mut names = vec![self.package.name.as_str()];
        names.extend(self.outputs.iter().map(|o| o.name.as_str()));
        names
    }

    /// Packages whose requirements are checked, in order
    pub fn checked_outputs(&self) -> Vec<Output<'_>> {
        let mut outputs = vec![Output {
            name: &self.package.name,
            requirements: &self.requirements,
            build: &self.build,
        }];
        outputs.extend(self.outputs.iter().filter_map(|o| {
            o.requirements.as_ref().map(|requirements| Output {
                name: &o.name,
                requirements,
                build: &o.build,
            })
        }));
        outputs
    }

    /// The checked output called `name`
    pub fn output(&self, name: &str) -> Option<Output<'_>> {
        self.checked_outputs().into_iter().find(|o| o.name == name)
    }
}

/// A package of the recipe together with its requirements
#[derive(Debug, Clone, Copy)]
pub struct Output<'a> {
    pub name: &'a str,
    pub requirements: &'a RequirementsSection,
    pub build: &'a BuildSection,
}

impl Output<'_> {
    pub fn is_noarch(&self) -> bool {
        self.build.noarch.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
}

/// One `[[outputs]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<RequirementsSection>,

    #[serde(default)]
    pub build: BuildSection,
}

/// Build options that affect which requirements are solved
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// `python` or `generic` for architecture independent packages
    #[serde(default)]
    pub noarch: Option<String>,

    /// Run exports dropped by name, whichever package exports them
    #[serde(default)]
    pub ignore_run_exports: Vec<String>,

    /// Packages whose run exports are dropped entirely
    #[serde(default)]
    pub ignore_run_exports_from: Vec<String>,
}

/// Build matrix: targets crossed with variant axes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixSection {
    /// Target subdirs such as `linux-64` or `osx-arm64`
    pub targets: Vec<String>,

    /// Variant axes, expanded in declared order
    #[serde(default)]
    pub axes: Vec<AxisDecl>,

    /// Groups of axes whose values vary in lockstep
    #[serde(default)]
    pub zip: Vec<Vec<String>>,

    /// Conditions that remove a configuration entirely
    #[serde(default)]
    pub skip: Vec<SkipRule>,

    /// Platform the build phase runs on, keyed by target subdir
    #[serde(default)]
    pub build_platform: BTreeMap<String, String>,

    /// Run requirements pinned to the version found at build time
    #[serde(default)]
    pub pin_run_as_build: BTreeMap<String, PinRunAsBuild>,
}

/// A `pin_run_as_build` entry: `"x.x"` or `{ min_pin, max_pin }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PinRunAsBuild {
    /// Same places for the lower and upper bound
    Places(String),
    Bounds {
        #[serde(default)]
        min_pin: Option<String>,
        #[serde(default)]
        max_pin: Option<String>,
    },
}

impl PinRunAsBuild {
    pub fn min_pin(&self) -> Option<&str> {
        match self {
            Self::Places(places) => Some(places),
            Self::Bounds { min_pin, .. } => min_pin.as_deref(),
        }
    }

    pub fn max_pin(&self) -> Option<&str> {
        match self {
            Self::Places(places) => Some(places),
            Self::Bounds { max_pin, .. } => max_pin.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisDecl {
    pub name: String,
    #[serde(default)]
    pub values: Vec<AxisValue>,
}

/// One permitted value of an axis, optionally guarded by a selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValue {
    Plain(String),
    Conditional { value: String, when: String },
}

impl AxisValue {
    pub fn value(&self) -> &str {
        match self {
            Self::Plain(v) => v,
            Self::Conditional { value, .. } => value,
        }
    }

    pub fn condition(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Conditional { when, .. } => Some(when),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipRule {
    pub when: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsSection {
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
}

impl Default for ChannelsSection {
    fn default() -> Self {
        Self {
            sources: default_sources(),
        }
    }
}

fn default_sources() -> Vec<String> {
    vec![DEFAULT_CHANNEL.to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementsSection {
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub host: Vec<String>,
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default)]
    pub run_constrained: Vec<String>,
    #[serde(default)]
    pub test: Vec<String>,
}
