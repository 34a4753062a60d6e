// src/config.rs

//! Checker configuration
//!
//! Loaded from an optional TOML file. Every field has a default, so an empty
//! file (or no file) is a valid configuration. Command-line flags override
//! the file, and `SOLVCHECK_SOLVER` overrides the file's backend choice.
//!
//! ```toml
//! solver = "sat"
//! concurrency = 4
//! solve_timeout_secs = 600
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//!
//! [channels]
//! additional = ["file:///srv/local-channel"]
//! ```

use crate::error::{Error, Result};
use crate::solver::BackendVariant;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the solver backend
pub const SOLVER_ENV: &str = "SOLVCHECK_SOLVER";

/// Highest `__glibc` minor version offered by the virtual-package channel
pub const MAX_GLIBC_MINOR: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Solver backend variant
    #[serde(default = "default_solver")]
    pub solver: BackendVariant,

    /// Configurations checked in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Limit for a single solve attempt
    #[serde(default = "default_solve_timeout")]
    pub solve_timeout_secs: u64,

    /// Limit for the whole check; unfinished configurations become inconclusive
    #[serde(default)]
    pub overall_timeout_secs: Option<u64>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub executables: ExecutableConfig,

    #[serde(default)]
    pub virtual_packages: VirtualPackageConfig,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            solver: default_solver(),
            concurrency: default_concurrency(),
            solve_timeout_secs: default_solve_timeout(),
            overall_timeout_secs: None,
            retry: RetryConfig::default(),
            channels: ChannelConfig::default(),
            executables: ExecutableConfig::default(),
            virtual_packages: VirtualPackageConfig::default(),
        }
    }
}

fn default_solver() -> BackendVariant {
    BackendVariant::Sat
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

fn default_solve_timeout() -> u64 {
    600
}

/// Retry policy for backend errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per solve, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channels searched before the recipe's own
    #[serde(default)]
    pub additional: Vec<String>,
}

/// External solver executables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableConfig {
    #[serde(default = "default_conda")]
    pub conda: PathBuf,

    #[serde(default = "default_micromamba")]
    pub micromamba: PathBuf,
}

impl Default for ExecutableConfig {
    fn default() -> Self {
        Self {
            conda: default_conda(),
            micromamba: default_micromamba(),
        }
    }
}

fn default_conda() -> PathBuf {
    PathBuf::from("conda")
}

fn default_micromamba() -> PathBuf {
    PathBuf::from("micromamba")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualPackageConfig {
    /// Offer `__glibc`, `__cuda`, `__osx` and friends to the solver
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_glibc_minor")]
    pub max_glibc_minor: u32,
}

impl Default for VirtualPackageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_glibc_minor: MAX_GLIBC_MINOR,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_glibc_minor() -> u32 {
    MAX_GLIBC_MINOR
}

impl CheckerConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be at least 1.0".to_string()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Pick the backend: command line, then environment, then this config
    pub fn effective_solver(&self, cli: Option<BackendVariant>, env: Option<&str>) -> Result<BackendVariant> {
        if let Some(variant) = cli {
            return Ok(variant);
        }
        match env.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => value.parse(),
            None => Ok(self.solver),
        }
    }

    pub fn solve_timeout(&self) -> Duration {
        Duration::from_secs(self.solve_timeout_secs)
    }

    pub fn overall_timeout(&self) -> Option<Duration> {
        self.overall_timeout_secs.map(Duration::from_secs)
    }
}
