// src/matrix/mod.rs

//! Build matrix: targets and the configurations expanded from a recipe
//!
//! A [`BuildConfiguration`] is one fully resolved combination of target
//! platform and variant-axis values. It is the unit the checker iterates
//! over and the key of every report entry.

mod expand;

pub use expand::{expand, select};

use crate::error::{Error, Result};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

const PLATFORMS: &[&str] = &["linux", "osx", "win"];
const ARCHES: &[&str] = &["64", "32", "aarch64", "arm64", "ppc64le", "armv7l", "s390x"];

/// A conda subdir split into platform and architecture
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    platform: String,
    arch: String,
}

impl Target {
    /// Parse a subdir such as `linux-64` or `osx-arm64`
    pub fn parse(subdir: &str) -> Result<Self> {
        let subdir = subdir.trim();
        let (platform, arch) = subdir
            .split_once('-')
            .ok_or_else(|| Error::InvalidMatrix(format!("'{}' is not a <platform>-<arch> target", subdir)))?;

        if !PLATFORMS.contains(&platform) {
            return Err(Error::InvalidMatrix(format!(
                "unknown platform '{}' in target '{}'",
                platform, subdir
            )));
        }
        if !ARCHES.contains(&arch) {
            return Err(Error::InvalidMatrix(format!(
                "unknown architecture '{}' in target '{}'",
                arch, subdir
            )));
        }

        Ok(Self {
            platform: platform.to_string(),
            arch: arch.to_string(),
        })
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// The conda subdir, e.g. `linux-64`
    pub fn subdir(&self) -> String {
        format!("{}-{}", self.platform, self.arch)
    }

    pub fn is_unix(&self) -> bool {
        self.platform != "win"
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.arch)
    }
}

/// One concrete point of the build matrix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildConfiguration {
    /// Platform the package is built for
    pub target: Target,
    /// Platform the build phase runs on (differs from `target` when cross-compiling)
    pub build_target: Target,
    /// Variant axis values in declared order
    pub axes: Vec<(String, String)>,
}

impl BuildConfiguration {
    pub fn new(target: Target, build_target: Target, axes: Vec<(String, String)>) -> Self {
        Self {
            target,
            build_target,
            axes,
        }
    }

    /// Value of a variant axis
    pub fn axis(&self, name: &str) -> Option<&str> {
        self.axes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_cross(&self) -> bool {
        self.target != self.build_target
    }

    /// Stable identifier, e.g. `linux-64/python=3.10,cuda_compiler_version=None`
    pub fn label(&self) -> String {
        if self.axes.is_empty() {
            return self.target.subdir();
        }
        let axes: Vec<String> = self.axes.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        format!("{}/{}", self.target, axes.join(","))
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for BuildConfiguration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("label", &self.label())?;
        map.serialize_entry("target", &self.target.subdir())?;
        map.serialize_entry("build_platform", &self.build_target.subdir())?;
        map.serialize_entry("axes", &OrderedAxes(&self.axes))?;
        map.end()
    }
}

/// Axes serialized as a JSON object in declared order
struct OrderedAxes<'a>(&'a [(String, String)]);

impl Serialize for OrderedAxes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
